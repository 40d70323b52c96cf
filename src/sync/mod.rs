//! Boundary to the network synchronization protocol and the link watchdog
//! that guards a synchronized session.

mod controller;
mod link;
mod watchdog;

pub use controller::{
    LoopbackSyncController, LoopbackSyncProtocol, SharedSettings, SyncController, SyncProtocol,
};
pub use link::{is_link_loss, HotspotState, LinkEvent, LinkSnapshot, LinkStateSource, NetworkType};
pub use watchdog::{LinkLossHandler, LinkWatchState, NetworkLinkWatchdog};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of this device in the synchronized session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRole {
    Leader,
    Follower,
    Inactive,
}

impl fmt::Display for SyncRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncRole::Leader => f.write_str("leader"),
            SyncRole::Follower => f.write_str("follower"),
            SyncRole::Inactive => f.write_str("inactive"),
        }
    }
}
