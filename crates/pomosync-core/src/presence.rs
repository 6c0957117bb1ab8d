//! Presence roster: who else is in the room.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::replica::{PresenceChannel, Subscription};

/// One connected peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    /// Per-connection id assigned by the presence channel.
    pub id: u64,
    pub username: String,
    /// CSS color, e.g. `hsl(137.5,50%,75%)`.
    pub color: String,
}

/// Materialises the presence channel into an ordered peer list and keeps the
/// local entry published.
pub struct PresenceRoster {
    channel: Arc<dyn PresenceChannel>,
    local: PresenceEntry,
    peers: Arc<watch::Sender<Vec<PresenceEntry>>>,
    subscription: Option<Subscription>,
}

impl PresenceRoster {
    /// Publish the local entry and start following remote changes.
    pub fn join(channel: Arc<dyn PresenceChannel>, username: String, color: String) -> Self {
        let local = PresenceEntry {
            id: channel.client_id(),
            username,
            color,
        };
        let (tx, _rx) = watch::channel(Vec::new());
        let peers = Arc::new(tx);

        let sink = Arc::clone(&peers);
        let subscription = channel.on_change(Box::new(move |states| {
            let roster = Self::on_presence_change(states);
            debug!(peers = roster.len(), "presence changed");
            sink.send_replace(roster);
        }));

        info!(id = local.id, username = %local.username, "joining presence");
        channel.set_local_state(local.clone());
        peers.send_replace(Self::on_presence_change(channel.states()));

        Self {
            channel,
            local,
            peers,
            subscription: Some(subscription),
        }
    }

    /// Turn the channel's state table into a display list ordered by id.
    pub fn on_presence_change(states: BTreeMap<u64, PresenceEntry>) -> Vec<PresenceEntry> {
        states.into_values().collect()
    }

    /// This peer's published entry.
    pub fn local(&self) -> &PresenceEntry {
        &self.local
    }

    /// Everyone currently connected, this peer included.
    pub fn peers(&self) -> Vec<PresenceEntry> {
        self.peers.borrow().clone()
    }

    /// Receiver that wakes on every roster change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<PresenceEntry>> {
        self.peers.subscribe()
    }

    /// Change the local username and re-publish it under the same id.
    pub fn rename(&mut self, username: String) {
        if self.local.username == username {
            return;
        }
        info!(id = self.local.id, from = %self.local.username, to = %username, "renaming");
        self.local.username = username;
        self.channel.set_local_state(self.local.clone());
    }

    /// Stop following changes and withdraw the local entry.
    pub fn leave(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
            self.channel.leave();
            debug!(id = self.local.id, "left presence");
        }
    }
}

impl Drop for PresenceRoster {
    fn drop(&mut self) {
        self.leave();
    }
}
