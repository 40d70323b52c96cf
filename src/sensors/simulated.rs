use super::hardware::{SamplingHint, SensorHardware, SensorInfo, SensorListener, SensorSubscription};
use super::kind::{SensorKind, SensorSample, SensorTable};
use crate::error::HardwareError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

struct Registration {
    id: u64,
    hint: SamplingHint,
    listener: Arc<dyn SensorListener>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: SensorTable<Option<Registration>>,
}

/// In-process sensor hardware with a configurable set of present sensors
pub struct SimulatedHardware {
    sensors: SensorTable<Option<SensorInfo>>,
    registry: Arc<Mutex<Registry>>,
}

impl SimulatedHardware {
    /// Create hardware exposing only the given kinds
    pub fn new(present: impl IntoIterator<Item = SensorKind>) -> Self {
        let mut sensors: SensorTable<Option<SensorInfo>> = SensorTable::default();
        for kind in present {
            sensors[kind] = Some(SensorInfo {
                name: format!("Simulated {}", kind),
                min_delay_us: if kind.axis_count() == 3 { 2_500 } else { 200_000 },
            });
        }

        Self {
            sensors,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Create hardware exposing every sensor kind
    pub fn with_all_sensors() -> Self {
        Self::new(SensorKind::ALL)
    }

    /// Deliver a sample to the listener registered for its kind.
    /// Returns false when nothing is registered.
    pub fn emit(&self, sample: &SensorSample) -> bool {
        let listener = {
            let registry = self.registry.lock();
            registry.listeners[sample.kind]
                .as_ref()
                .map(|registration| Arc::clone(&registration.listener))
        };

        match listener {
            Some(listener) => {
                listener.on_sample(sample);
                true
            }
            None => {
                trace!("No listener for {} sample", sample.kind);
                false
            }
        }
    }

    pub fn is_registered(&self, kind: SensorKind) -> bool {
        self.registry.lock().listeners[kind].is_some()
    }

    pub fn registered_hint(&self, kind: SensorKind) -> Option<SamplingHint> {
        self.registry.lock().listeners[kind]
            .as_ref()
            .map(|registration| registration.hint)
    }

    pub fn registered_kinds(&self) -> Vec<SensorKind> {
        let registry = self.registry.lock();
        registry
            .listeners
            .iter()
            .filter(|(_, registration)| registration.is_some())
            .map(|(kind, _)| kind)
            .collect()
    }

    /// Emit synthetic readings for every registered kind on each tick until cancelled
    pub fn spawn_synthetic_feed(
        self: &Arc<Self>,
        period: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let hardware = Arc::clone(self);
        info!("Starting synthetic sensor feed every {:?}", period);

        tokio::spawn(async move {
            let origin = Instant::now();
            let mut interval = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let elapsed = origin.elapsed();
                        let timestamp_ns = elapsed.as_nanos() as i64;
                        let phase = elapsed.as_secs_f32();

                        for kind in hardware.registered_kinds() {
                            let values = synthetic_values(kind, phase);
                            hardware.emit(&SensorSample::new(kind, values, timestamp_ns));
                        }
                    }
                }
            }

            debug!("Synthetic sensor feed stopped");
        })
    }
}

fn synthetic_values(kind: SensorKind, phase: f32) -> Vec<f32> {
    match kind {
        SensorKind::Accelerometer => vec![0.1 * phase.sin(), 0.1 * phase.cos(), 9.81],
        SensorKind::Gravity => vec![0.0, 0.0, 9.81],
        SensorKind::Gyroscope => vec![0.02 * phase.cos(), 0.01 * phase.sin(), 0.0],
        SensorKind::Magnetic => vec![22.0 + phase.sin(), -5.0, 41.0],
        SensorKind::Thermometer => vec![21.5],
        SensorKind::Barometer => vec![1013.25 + 0.05 * phase.sin()],
        SensorKind::Humidity => vec![45.0],
    }
}

impl SensorHardware for SimulatedHardware {
    fn default_sensor(&self, kind: SensorKind) -> Option<SensorInfo> {
        self.sensors[kind].clone()
    }

    fn register(
        &self,
        kind: SensorKind,
        hint: SamplingHint,
        listener: Arc<dyn SensorListener>,
    ) -> Result<SensorSubscription, HardwareError> {
        if self.sensors[kind].is_none() {
            return Err(HardwareError::NotPresent { kind });
        }

        let id = {
            let mut registry = self.registry.lock();
            registry.next_id += 1;
            let id = registry.next_id;
            registry.listeners[kind] = Some(Registration { id, hint, listener });
            id
        };
        debug!("Registered {} listener #{} at {}", kind, id, hint);

        let registry = Arc::downgrade(&self.registry);
        Ok(SensorSubscription::new(kind, move || {
            if let Some(registry) = registry.upgrade() {
                let mut registry = registry.lock();
                // A newer registration for the same kind stays in place
                if registry.listeners[kind].as_ref().map(|r| r.id) == Some(id) {
                    registry.listeners[kind] = None;
                }
            }
        }))
    }
}
