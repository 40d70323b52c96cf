mod hardware;
mod kind;
mod manager;
mod simulated;

pub use hardware::{SamplingHint, SensorHardware, SensorInfo, SensorListener, SensorSubscription};
pub use kind::{SensorKind, SensorSample, SensorTable};
pub use manager::{SensorCaptureManager, SensorState};
pub use simulated::SimulatedHardware;
