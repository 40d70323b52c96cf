use super::SyncRole;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HotspotState {
    Enabling,
    Enabled,
    Disabling,
    Disabled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkType {
    Wifi,
    Cellular,
    Ethernet,
    Other,
}

/// Discrete link-state change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkEvent {
    HotspotStateChanged(HotspotState),
    ConnectivityChanged { active: Option<NetworkType> },
}

/// Whether `event` means the link a session in `role` depends on is gone.
/// Leaders watch their hotspot, followers watch their Wi-Fi connection.
pub fn is_link_loss(role: SyncRole, event: &LinkEvent) -> bool {
    match (role, event) {
        (SyncRole::Leader, LinkEvent::HotspotStateChanged(state)) => {
            *state != HotspotState::Enabled
        }
        (SyncRole::Follower, LinkEvent::ConnectivityChanged { active }) => {
            *active != Some(NetworkType::Wifi)
        }
        _ => false,
    }
}

/// Most recent link state seen by a [`LinkStateSource`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub hotspot: Option<HotspotState>,
    /// Outer `None` until the first connectivity notification
    pub connectivity: Option<Option<NetworkType>>,
}

impl LinkSnapshot {
    fn apply(&mut self, event: &LinkEvent) {
        match *event {
            LinkEvent::HotspotStateChanged(state) => self.hotspot = Some(state),
            LinkEvent::ConnectivityChanged { active } => self.connectivity = Some(active),
        }
    }

    /// Whether the last known state already means `role` has lost its link
    pub fn indicates_loss(&self, role: SyncRole) -> bool {
        let hotspot = self.hotspot.map(LinkEvent::HotspotStateChanged);
        let connectivity = self
            .connectivity
            .map(|active| LinkEvent::ConnectivityChanged { active });
        hotspot
            .into_iter()
            .chain(connectivity)
            .any(|event| is_link_loss(role, &event))
    }
}

/// Broadcast source of link-state notifications, fed by the host.
/// Also keeps the latest state so a subscriber that lagged can catch up.
#[derive(Clone)]
pub struct LinkStateSource {
    sender: broadcast::Sender<LinkEvent>,
    latest: Arc<watch::Sender<LinkSnapshot>>,
}

impl LinkStateSource {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let (latest, _) = watch::channel(LinkSnapshot::default());
        Self {
            sender,
            latest: Arc::new(latest),
        }
    }

    /// Deliver a notification; returns how many subscribers received it
    pub fn publish(&self, event: LinkEvent) -> usize {
        trace!("Link event: {:?}", event);
        self.latest.send_modify(|snapshot| snapshot.apply(&event));
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.sender.subscribe()
    }

    pub fn latest(&self) -> LinkSnapshot {
        *self.latest.borrow()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
