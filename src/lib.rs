pub mod config;
pub mod error;
pub mod events;
pub mod preferences;
pub mod recording;
pub mod sensors;
pub mod storage;
pub mod sync;
pub mod writer;

pub use config::SyncRecConfig;
pub use error::{Result, SessionError, StorageError, SyncRecError};
pub use events::{EventBus, Notice, NoticeLevel, SyncRecEvent};
pub use preferences::{MemoryPreferenceStore, PreferenceStore, Preferences, RecordingSettings};
pub use recording::{
    AppLifecycle, FlashSignal, HeadlessVideoPipeline, RecordingOrchestrator, SessionPolicy,
    SessionReport, SessionStamp, SessionSummary, StopCause, VideoPipeline,
};
pub use sensors::{
    SamplingHint, SensorCaptureManager, SensorHardware, SensorKind, SensorSample, SimulatedHardware,
};
pub use storage::{build_backend, FileRef, StorageBackend};
pub use sync::{LinkEvent, LinkStateSource, LoopbackSyncProtocol, SyncProtocol, SyncRole};
pub use writer::{SensorWriterPool, StreamSummary};
