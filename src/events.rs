use crate::error::SessionError;
use crate::recording::StopCause;
use crate::sensors::SensorKind;
use crate::sync::SyncRole;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// How a notice is presented to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    /// Transient, non-blocking message
    Toast,
    /// Blocking alert the user must acknowledge
    Alert,
}

/// User-visible message. Never carries internal cause chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn toast<S: Into<String>>(message: S) -> Self {
        Self {
            level: NoticeLevel::Toast,
            title: String::new(),
            message: message.into(),
        }
    }

    pub fn alert<S: Into<String>>(title: S, message: S) -> Self {
        Self {
            level: NoticeLevel::Alert,
            title: title.into(),
            message: message.into(),
        }
    }
}

const LINK_REMEDIATION: &str = "Stopping synchronized recording. Enable either Wi-Fi or hotspot \
and re-enable synchronized recording in the settings.";

impl SessionError {
    /// The single notice shown for this failure
    pub fn notice(&self) -> Notice {
        match self {
            SessionError::SensorUnavailable(kind) => Notice::toast(format!("{} unavailable", kind)),
            SessionError::Storage { kind, .. } => {
                Notice::toast(format!("Couldn't save {} data", kind))
            }
            SessionError::Configuration { reason } => Notice::toast(reason.clone()),
            SessionError::LinkLost(SyncRole::Leader) => {
                Notice::alert("Hotspot was stopped", LINK_REMEDIATION)
            }
            SessionError::LinkLost(_) => Notice::alert("Wi-Fi was stopped", LINK_REMEDIATION),
            SessionError::ProtocolUnavailable { .. } => Notice::alert(
                "Cannot start synchronized recording",
                "Enable either Wi-Fi or hotspot for synchronized recording to be able to start.",
            ),
            SessionError::FlashSignal { .. } => Notice::toast("Couldn't start the flash signal"),
        }
    }
}

/// Events published by the recording core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncRecEvent {
    /// A recording session started
    SessionStarted {
        session_id: String,
        sensors: Vec<SensorKind>,
        timestamp: SystemTime,
    },
    /// A recording session stopped
    SessionStopped {
        session_id: String,
        cause: StopCause,
        timestamp: SystemTime,
    },
    /// Something the user has to be told about
    Notice(Notice),
    /// A synchronized session started with the negotiated role
    SyncStarted { role: SyncRole },
    /// The synchronized session was torn down
    SyncStopped,
    /// The next synchronized recording was prepared
    RecordingPrepared,
}

impl SyncRecEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncRecEvent::SessionStarted { .. } => "session_started",
            SyncRecEvent::SessionStopped { .. } => "session_stopped",
            SyncRecEvent::Notice(_) => "notice",
            SyncRecEvent::SyncStarted { .. } => "sync_started",
            SyncRecEvent::SyncStopped => "sync_stopped",
            SyncRecEvent::RecordingPrepared => "recording_prepared",
        }
    }
}

/// Async event bus for component coordination using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<SyncRecEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<SyncRecEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers. Returns the number of receivers;
    /// having none is not an error.
    pub async fn publish(&self, event: SyncRecEvent) -> usize {
        match &event {
            SyncRecEvent::Notice(notice) => {
                info!("Notice ({:?}): {} {}", notice.level, notice.title, notice.message);
            }
            SyncRecEvent::SessionStarted { session_id, sensors, .. } => {
                info!("Session {} started with {} sensor logs", session_id, sensors.len());
            }
            SyncRecEvent::SessionStopped { session_id, cause, .. } => {
                info!("Session {} stopped ({:?})", session_id, cause);
            }
            other => debug!("Event: {}", other.event_type()),
        }

        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                warn!("Event published with no subscribers");
                0
            }
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
