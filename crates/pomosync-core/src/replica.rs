//! Interfaces to the replicated document.
//!
//! The shared map and the presence channel are provided by whatever
//! replication layer hosts the room. This crate only relies on the contracts
//! below: per-field last-writer-wins convergence for the map, and
//! per-connection liveness for presence.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::presence::PresenceEntry;
use crate::timer::Snapshot;

/// Called with the full map contents after any field changes.
pub type ChangeCallback = Box<dyn Fn(Snapshot) + Send + Sync>;

/// Called with every connected peer's presence entry after any change.
pub type PresenceCallback = Box<dyn Fn(BTreeMap<u64, PresenceEntry>) + Send + Sync>;

/// Handle to a registered callback. Dropping it unregisters the callback.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap the function that unregisters the callback.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unregister now.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A convergent key/value map shared by every peer in a room.
pub trait ReplicatedMap: Send + Sync {
    /// Current value of `field`, if any peer has written it.
    fn get(&self, field: &str) -> Option<Value>;

    /// Write one field.
    fn set(&self, field: &str, value: Value);

    /// Write several fields. Implementations that support transactions should
    /// override this so observers see one change instead of one per field.
    fn set_all(&self, fields: Vec<(String, Value)>) {
        for (field, value) in fields {
            self.set(&field, value);
        }
    }

    /// Register a callback fired after any field changes, whoever wrote it.
    fn observe(&self, callback: ChangeCallback) -> Subscription;

    /// Copy of every field.
    fn to_snapshot(&self) -> Snapshot;
}

/// Ephemeral per-connection broadcast.
pub trait PresenceChannel: Send + Sync {
    /// This connection's id.
    fn client_id(&self) -> u64;

    /// Publish (or replace) this connection's entry.
    fn set_local_state(&self, entry: PresenceEntry);

    /// Register a callback fired whenever any connection's entry changes.
    fn on_change(&self, callback: PresenceCallback) -> Subscription;

    /// Every live connection's entry, keyed by connection id.
    fn states(&self) -> BTreeMap<u64, PresenceEntry>;

    /// Withdraw this connection's entry.
    fn leave(&self);
}
