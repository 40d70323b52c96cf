use crate::sensors::SensorKind;
use crate::storage::StorageBackend;
use crate::writer::{SensorWriterPool, StreamSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Start time of a recording session. Every output of the session is named after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionStamp(DateTime<Utc>);

impl SessionStamp {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self(started_at)
    }

    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.0
    }

    /// Identifier in the form YYYYMMDD_HHMMSS_mmm
    pub fn id(&self) -> String {
        self.0.format("%Y%m%d_%H%M%S_%3f").to_string()
    }
}

impl fmt::Display for SessionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// What ended a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopCause {
    User,
    RemoteLeader,
    LinkLost,
    Shutdown,
}

/// Returned by a successful session start
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    /// Kinds the configuration asked for
    pub requested: Vec<SensorKind>,
    /// Kinds that are enabled and have an open log
    pub recording: Vec<SensorKind>,
    /// Number of notices raised while starting
    pub notices: usize,
}

/// Outcome of a finished session, also persisted as the session manifest
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub cause: StopCause,
    pub requested: Vec<SensorKind>,
    pub streams: Vec<StreamSummary>,
}

impl SessionSummary {
    pub fn stream(&self, kind: SensorKind) -> Option<&StreamSummary> {
        self.streams.iter().find(|stream| stream.kind == kind)
    }
}

/// The live session. Tracks exactly what was set up so teardown undoes only that.
pub(crate) struct RecordingSession {
    pub stamp: SessionStamp,
    pub backend: Arc<dyn StorageBackend>,
    pub requested: Vec<SensorKind>,
    pub recording: Vec<SensorKind>,
    pub pool: Option<Arc<SensorWriterPool>>,
    pub flash_active: bool,
}

impl RecordingSession {
    pub fn new(stamp: SessionStamp, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            stamp,
            backend,
            requested: Vec::new(),
            recording: Vec::new(),
            pool: None,
            flash_active: false,
        }
    }
}
