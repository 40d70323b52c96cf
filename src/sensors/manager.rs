use super::hardware::{SamplingHint, SensorHardware, SensorInfo, SensorListener, SensorSubscription};
use super::kind::{SensorKind, SensorSample, SensorTable};
use crate::writer::SensorWriterPool;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Lifecycle of one sensor kind inside the capture manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    Unsupported,
    Idle,
    Active,
}

/// Routes delivered samples into the session's writer pool.
///
/// The pool reference is held under a read lock while each sample is
/// queued; clearing it takes the write lock, so once `stop` returns no sample
/// is being queued and none will be. Queuing never waits on I/O.
struct SampleRouter {
    target: RwLock<Option<Arc<SensorWriterPool>>>,
    discarded: AtomicU64,
}

impl SampleRouter {
    fn start(&self, pool: Arc<SensorWriterPool>) {
        *self.target.write() = Some(pool);
    }

    fn stop(&self) -> bool {
        self.target.write().take().is_some()
    }

    fn is_recording(&self) -> bool {
        self.target.read().is_some()
    }
}

impl SensorListener for SampleRouter {
    fn on_sample(&self, sample: &SensorSample) {
        let target = self.target.read();
        match target.as_ref() {
            Some(pool) => {
                pool.write(sample);
            }
            None => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                trace!("Not recording, discarding {} sample", sample.kind);
            }
        }
    }
}

/// Owns the hardware sensor bindings and forwards samples to the writer pool
pub struct SensorCaptureManager {
    hardware: Arc<dyn SensorHardware>,
    sensors: SensorTable<Option<SensorInfo>>,
    subscriptions: Mutex<SensorTable<Option<SensorSubscription>>>,
    router: Arc<SampleRouter>,
}

impl SensorCaptureManager {
    /// Probe the hardware once; kinds without a sensor stay unsupported
    pub fn new(hardware: Arc<dyn SensorHardware>) -> Self {
        let sensors = SensorTable::from_fn(|kind| hardware.default_sensor(kind));

        let supported: Vec<&str> = sensors
            .iter()
            .filter(|(_, info)| info.is_some())
            .map(|(kind, _)| kind.short_name())
            .collect();
        info!("Sensor probe found: {}", supported.join(", "));

        Self {
            hardware,
            sensors,
            subscriptions: Mutex::new(SensorTable::default()),
            router: Arc::new(SampleRouter {
                target: RwLock::new(None),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_available(&self, kind: SensorKind) -> bool {
        self.sensors[kind].is_some()
    }

    /// Minimum sampling period in microseconds, 0 for unsupported kinds
    pub fn min_delay(&self, kind: SensorKind) -> u32 {
        match &self.sensors[kind] {
            Some(info) => info.min_delay_us,
            None => {
                debug!("Unsupported sensor kind {} queried for min delay", kind);
                0
            }
        }
    }

    pub fn state(&self, kind: SensorKind) -> SensorState {
        if self.sensors[kind].is_none() {
            SensorState::Unsupported
        } else if self.subscriptions.lock()[kind].is_some() {
            SensorState::Active
        } else {
            SensorState::Idle
        }
    }

    /// Register for delivery of `kind`. Returns false if the sensor is absent
    /// or the hardware refused the registration. Re-enabling replaces the
    /// previous registration.
    pub fn enable_sensor(&self, kind: SensorKind, hint: SamplingHint) -> bool {
        if self.sensors[kind].is_none() {
            debug!("Cannot enable unsupported sensor {}", kind);
            return false;
        }

        let mut subscriptions = self.subscriptions.lock();
        // Drop the old registration before asking for a new one
        subscriptions[kind] = None;

        let listener: Arc<dyn SensorListener> = self.router.clone();
        match self.hardware.register(kind, hint, listener) {
            Ok(subscription) => {
                info!("Enabled {} at {}", kind, hint);
                subscriptions[kind] = Some(subscription);
                true
            }
            Err(e) => {
                warn!("Failed to enable {}: {}", kind, e);
                false
            }
        }
    }

    pub fn disable_sensor(&self, kind: SensorKind) {
        if self.subscriptions.lock()[kind].take().is_some() {
            info!("Disabled {}", kind);
        }
    }

    /// Start forwarding samples of active kinds into `pool`
    pub fn start_recording(&self, pool: Arc<SensorWriterPool>) {
        self.router.start(pool);
        debug!("Sensor sample routing started");
    }

    pub fn is_recording(&self) -> bool {
        self.router.is_recording()
    }

    /// Unregister every active kind and stop routing. When this returns no
    /// further write reaches the pool, even if delivery is still in progress.
    pub fn disable_all_sensors(&self) {
        let released: Vec<SensorSubscription> = {
            let mut subscriptions = self.subscriptions.lock();
            subscriptions
                .iter_mut()
                .filter_map(|(_, slot)| slot.take())
                .collect()
        };
        let count = released.len();
        drop(released);

        if self.router.stop() {
            debug!("Sensor sample routing stopped");
        }
        if count > 0 {
            info!("Disabled {} sensors", count);
        }
    }

    /// Samples delivered while no recording was in progress
    pub fn discarded_samples(&self) -> u64 {
        self.router.discarded.load(Ordering::Relaxed)
    }
}

impl Drop for SensorCaptureManager {
    fn drop(&mut self) {
        self.disable_all_sensors();
    }
}
