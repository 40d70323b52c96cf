use crate::sensors::SensorKind;
use crate::sync::SyncRole;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncRecError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sensor hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Link watchdog error: {0}")]
    Watchdog(#[from] WatchdogError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Recording session {id} is already active")]
    SessionActive { id: String },

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl SyncRecError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Failures while creating or writing an output stream
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File descriptor unavailable for {uri}")]
    DescriptorUnavailable { uri: String },

    #[error("Permission denied for {path}")]
    PermissionDenied { path: String },

    #[error("Path {path} is not writable")]
    NotWritable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Output stream for {stream} is already open")]
    AlreadyOpen { stream: String },

    #[error("Writer for {stream} unavailable: {details}")]
    WriterUnavailable { stream: String, details: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone)]
pub enum HardwareError {
    #[error("Sensor {kind} is not present on this device")]
    NotPresent { kind: SensorKind },

    #[error("Registration for {kind} rejected: {details}")]
    RegistrationRejected { kind: SensorKind, details: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WatchdogError {
    #[error("Link watchdog is already monitoring as {role}")]
    AlreadyMonitoring { role: SyncRole },

    #[error("Link watchdog cannot monitor an inactive sync role")]
    InactiveRole,
}

/// Session-level failure taxonomy. Each variant maps to exactly one user notice.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0} is not available on this device")]
    SensorUnavailable(SensorKind),

    #[error("Failed to store {kind} data: {source}")]
    Storage {
        kind: SensorKind,
        #[source]
        source: StorageError,
    },

    #[error("Inconsistent configuration: {reason}")]
    Configuration { reason: String },

    #[error("Network link lost while running as {0}")]
    LinkLost(SyncRole),

    #[error("Synchronized session could not start: {reason}")]
    ProtocolUnavailable { reason: String },

    #[error("Flash signal failed: {source}")]
    FlashSignal {
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, SyncRecError>;
