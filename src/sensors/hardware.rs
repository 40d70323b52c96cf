use super::kind::{SensorKind, SensorSample};
use crate::error::HardwareError;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Static description of a sensor found on the device
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInfo {
    pub name: String,
    /// Smallest supported sampling period in microseconds
    pub min_delay_us: u32,
}

/// Requested sampling period in microseconds; 0 asks for the fastest rate.
/// Advisory only, hardware may deliver faster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplingHint(pub u32);

impl SamplingHint {
    pub const FASTEST: SamplingHint = SamplingHint(0);

    pub fn period_us(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SamplingHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            f.write_str("fastest")
        } else {
            write!(f, "{}us", self.0)
        }
    }
}

/// Receives samples from the hardware delivery context
pub trait SensorListener: Send + Sync {
    fn on_sample(&self, sample: &SensorSample);

    fn on_accuracy_changed(&self, kind: SensorKind, accuracy: i32) {
        debug!("{} accuracy changed to {}", kind, accuracy);
    }
}

/// Hardware seam: probes sensors and registers listeners for delivery
pub trait SensorHardware: Send + Sync {
    fn default_sensor(&self, kind: SensorKind) -> Option<SensorInfo>;

    fn register(
        &self,
        kind: SensorKind,
        hint: SamplingHint,
        listener: Arc<dyn SensorListener>,
    ) -> Result<SensorSubscription, HardwareError>;
}

/// Live registration for one sensor kind. Dropping it unregisters the listener.
pub struct SensorSubscription {
    kind: SensorKind,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SensorSubscription {
    pub fn new(kind: SensorKind, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kind,
            release: Some(Box::new(release)),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }
}

impl Drop for SensorSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            debug!("Unregistering {} listener", self.kind);
            release();
        }
    }
}

impl fmt::Debug for SensorSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorSubscription")
            .field("kind", &self.kind)
            .finish()
    }
}
