use super::SyncRole;
use crate::error::SessionError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Camera settings the leader asks followers to apply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedSettings {
    pub values: BTreeMap<String, String>,
}

/// Handle to a running synchronized session. Its protocol state is opaque here.
#[async_trait]
pub trait SyncController: Send + Sync {
    fn is_leader(&self) -> bool;

    fn is_video_preparation_needed(&self) -> bool;

    async fn prepare_video_recording(&self);

    /// Settings waiting to be applied to the camera, consumed on read
    fn take_pending_settings(&self) -> Option<SharedSettings>;

    async fn close(&self);
}

/// Starts synchronized sessions
pub trait SyncProtocol: Send + Sync {
    /// Fails with [`SessionError::ProtocolUnavailable`] when no usable
    /// network interface exists
    fn start(&self) -> Result<Arc<dyn SyncController>, SessionError>;
}

/// Single-device protocol that always negotiates a fixed role
pub struct LoopbackSyncProtocol {
    role: SyncRole,
    network_available: AtomicBool,
    last_controller: Mutex<Option<Arc<LoopbackSyncController>>>,
}

impl LoopbackSyncProtocol {
    pub fn new(role: SyncRole) -> Self {
        Self {
            role,
            network_available: AtomicBool::new(true),
            last_controller: Mutex::new(None),
        }
    }

    pub fn set_network_available(&self, available: bool) {
        self.network_available.store(available, Ordering::SeqCst);
    }

    /// Controller handed out by the most recent successful `start`
    pub fn last_controller(&self) -> Option<Arc<LoopbackSyncController>> {
        self.last_controller.lock().clone()
    }
}

impl SyncProtocol for LoopbackSyncProtocol {
    fn start(&self) -> Result<Arc<dyn SyncController>, SessionError> {
        if !self.network_available.load(Ordering::SeqCst) {
            return Err(SessionError::ProtocolUnavailable {
                reason: "Wi-Fi and hotspot are disabled".to_string(),
            });
        }

        let controller = Arc::new(LoopbackSyncController::new(self.role == SyncRole::Leader));
        *self.last_controller.lock() = Some(Arc::clone(&controller));
        info!("Loopback sync session started as {}", self.role);
        Ok(controller)
    }
}

pub struct LoopbackSyncController {
    leader: bool,
    preparation_needed: AtomicBool,
    preparations: AtomicU64,
    pending: Mutex<Option<SharedSettings>>,
    closed: AtomicBool,
}

impl LoopbackSyncController {
    pub fn new(leader: bool) -> Self {
        Self {
            leader,
            preparation_needed: AtomicBool::new(true),
            preparations: AtomicU64::new(0),
            pending: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_preparation_needed(&self, needed: bool) {
        self.preparation_needed.store(needed, Ordering::SeqCst);
    }

    pub fn queue_settings(&self, settings: SharedSettings) {
        *self.pending.lock() = Some(settings);
    }

    pub fn preparations(&self) -> u64 {
        self.preparations.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncController for LoopbackSyncController {
    fn is_leader(&self) -> bool {
        self.leader
    }

    fn is_video_preparation_needed(&self) -> bool {
        self.preparation_needed.load(Ordering::SeqCst)
    }

    async fn prepare_video_recording(&self) {
        let count = self.preparations.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Prepared synchronized recording #{}", count);
    }

    fn take_pending_settings(&self) -> Option<SharedSettings> {
        self.pending.lock().take()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!("Loopback sync controller closed");
    }
}
