mod collaborators;
mod orchestrator;
mod policy;
mod session;
#[cfg(test)]
mod tests;

pub use collaborators::{FlashSignal, HeadlessVideoPipeline, VideoPipeline};
pub use orchestrator::{RecordingOrchestrator, RecordingOrchestratorBuilder, SessionPolicy};
pub use policy::{should_prepare_next, AppLifecycle, RearmInputs};
pub use session::{SessionReport, SessionStamp, SessionSummary, StopCause};
