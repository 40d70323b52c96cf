use super::StopCause;
use std::sync::atomic::{AtomicBool, Ordering};

/// Host application state the orchestrator consults after a stop
#[derive(Debug, Default)]
pub struct AppLifecycle {
    paused: AtomicBool,
    settings_active: AtomicBool,
}

impl AppLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_settings_active(&self, active: bool) {
        self.settings_active.store(active, Ordering::SeqCst);
    }

    pub fn is_settings_active(&self) -> bool {
        self.settings_active.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RearmInputs {
    pub sync_running: bool,
    pub preparation_needed: bool,
    pub app_paused: bool,
    pub settings_active: bool,
}

/// Whether to prepare the next synchronized recording right after a stop.
///
/// A paused app or an open settings screen always wins, including over a
/// stop triggered by the leader. Link loss and shutdown never re-arm.
pub fn should_prepare_next(cause: StopCause, inputs: &RearmInputs) -> bool {
    match cause {
        StopCause::LinkLost | StopCause::Shutdown => false,
        StopCause::User | StopCause::RemoteLeader => {
            inputs.sync_running
                && inputs.preparation_needed
                && !inputs.app_paused
                && !inputs.settings_active
        }
    }
}
