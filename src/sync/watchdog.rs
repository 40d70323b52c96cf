use super::link::{is_link_loss, LinkStateSource};
use super::SyncRole;
use crate::error::WatchdogError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reacts to the loss of the link a synchronized session depends on
#[async_trait]
pub trait LinkLossHandler: Send + Sync {
    /// `generation` identifies the synchronized session being watched
    async fn on_link_lost(&self, role: SyncRole, generation: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkWatchState {
    Idle,
    Monitoring(SyncRole),
}

struct Subscription {
    role: SyncRole,
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Holds at most one link-state subscription while a synchronized session runs
pub struct NetworkLinkWatchdog {
    source: LinkStateSource,
    subscription: Mutex<Option<Subscription>>,
}

impl NetworkLinkWatchdog {
    pub fn new(source: LinkStateSource) -> Self {
        Self {
            source,
            subscription: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LinkWatchState {
        match self.subscription.lock().as_ref() {
            Some(subscription) => LinkWatchState::Monitoring(subscription.role),
            None => LinkWatchState::Idle,
        }
    }

    /// Subscribe to link notifications for `role`. The handler fires at most
    /// once per subscription and runs on its own task, so it may call `stop`.
    pub fn start(
        &self,
        role: SyncRole,
        generation: u64,
        handler: Arc<dyn LinkLossHandler>,
    ) -> Result<(), WatchdogError> {
        if role == SyncRole::Inactive {
            return Err(WatchdogError::InactiveRole);
        }

        let mut slot = self.subscription.lock();
        if let Some(existing) = slot.as_ref() {
            return Err(WatchdogError::AlreadyMonitoring {
                role: existing.role,
            });
        }

        // Subscribe before spawning so no notification is missed
        let mut receiver = self.source.subscribe();
        let source = self.source.clone();
        let token = CancellationToken::new();
        let task_token = token.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    received = receiver.recv() => match received {
                        Ok(event) => {
                            if is_link_loss(role, &event) {
                                warn!("Link lost while {} ({:?}), stopping synchronized session", role, event);
                                fire(&handler, role, generation);
                                break;
                            }
                            debug!("Link event ignored for {}: {:?}", role, event);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            // The skipped notifications are gone; fall back to the latest state
                            let latest = source.latest();
                            if latest.indicates_loss(role) {
                                warn!(
                                    "Link lost while {} (lagged by {} notifications, last state {:?}), stopping synchronized session",
                                    role, skipped, latest
                                );
                                fire(&handler, role, generation);
                                break;
                            }
                            warn!("Link watchdog lagged by {} notifications; link still up", skipped);
                        }
                        Err(RecvError::Closed) => {
                            debug!("Link state source closed");
                            break;
                        }
                    }
                }
            }
        });

        info!("Link watchdog monitoring as {}", role);
        *slot = Some(Subscription { role, token, task });
        Ok(())
    }

    /// Drop the subscription. Returns false if nothing was being monitored.
    pub fn stop(&self) -> bool {
        match self.subscription.lock().take() {
            Some(subscription) => {
                subscription.token.cancel();
                if subscription.task.is_finished() {
                    debug!("Link watchdog task had already finished");
                }
                info!("Link watchdog stopped ({})", subscription.role);
                true
            }
            None => false,
        }
    }
}

fn fire(handler: &Arc<dyn LinkLossHandler>, role: SyncRole, generation: u64) {
    let handler = Arc::clone(handler);
    tokio::spawn(async move {
        handler.on_link_lost(role, generation).await;
    });
}

impl Drop for NetworkLinkWatchdog {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.get_mut().take() {
            subscription.token.cancel();
        }
    }
}
