//! In-process replication hub.
//!
//! Every [`MemoryMap`] opened for the same room id shares one field table, so
//! writes converge immediately and the last write to a field wins by arrival
//! order. Writes and their change callbacks are serialized per room, so the
//! last snapshot an observer receives is always the table's current contents.
//! Callbacks must therefore not write to the same room synchronously.
//!
//! Presence works the same way, with an entry removed when its
//! [`MemoryPresence`] leaves or is dropped. This is a loopback stand-in for a
//! network transport: it lets several peers run in one process.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rand::Rng;
use serde_json::Value;
use tracing::{debug, trace};

use crate::presence::PresenceEntry;
use crate::replica::{
    ChangeCallback, PresenceCallback, PresenceChannel, ReplicatedMap, Subscription,
};
use crate::timer::Snapshot;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registered callbacks, keyed by subscription id.
struct Observers<F: ?Sized> {
    next_id: AtomicU64,
    callbacks: Mutex<BTreeMap<u64, Arc<F>>>,
}

impl<F: ?Sized> Observers<F> {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(BTreeMap::new()),
        }
    }

    fn add(&self, callback: Arc<F>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.callbacks).insert(id, callback);
        id
    }

    fn remove(&self, id: u64) {
        lock(&self.callbacks).remove(&id);
    }

    /// Snapshot of the callbacks so they run without the lock held.
    fn current(&self) -> Vec<Arc<F>> {
        lock(&self.callbacks).values().cloned().collect()
    }
}

type SnapshotFn = dyn Fn(Snapshot) + Send + Sync;
type PresenceFn = dyn Fn(BTreeMap<u64, PresenceEntry>) + Send + Sync;

/// Shared state of one room.
struct RoomDoc {
    room: String,
    // Held from mutation until the last callback returns.
    field_dispatch: Mutex<()>,
    fields: Mutex<Snapshot>,
    field_observers: Observers<SnapshotFn>,
    presence_dispatch: Mutex<()>,
    presence: Mutex<BTreeMap<u64, PresenceEntry>>,
    presence_observers: Observers<PresenceFn>,
}

impl RoomDoc {
    fn new(room: &str) -> Self {
        Self {
            room: room.to_string(),
            field_dispatch: Mutex::new(()),
            fields: Mutex::new(Snapshot::new()),
            field_observers: Observers::new(),
            presence_dispatch: Mutex::new(()),
            presence: Mutex::new(BTreeMap::new()),
            presence_observers: Observers::new(),
        }
    }

    fn write(&self, fields: Vec<(String, Value)>) {
        let _dispatch = lock(&self.field_dispatch);
        let snapshot = {
            let mut table = lock(&self.fields);
            for (field, value) in fields {
                table.insert(field, value);
            }
            table.clone()
        };
        trace!(room = %self.room, "fields written");
        for callback in self.field_observers.current() {
            callback(snapshot.clone());
        }
    }

    fn publish_presence(&self, change: impl FnOnce(&mut BTreeMap<u64, PresenceEntry>) -> bool) {
        let _dispatch = lock(&self.presence_dispatch);
        let states = {
            let mut presence = lock(&self.presence);
            if !change(&mut presence) {
                return;
            }
            presence.clone()
        };
        for callback in self.presence_observers.current() {
            callback(states.clone());
        }
    }
}

/// Registry of rooms living in this process. Clones share the registry.
#[derive(Clone, Default)]
pub struct MemoryHub {
    rooms: Arc<Mutex<HashMap<String, Arc<RoomDoc>>>>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    fn doc(&self, room: &str) -> Arc<RoomDoc> {
        let mut rooms = lock(&self.rooms);
        Arc::clone(
            rooms
                .entry(room.to_string())
                .or_insert_with(|| {
                    debug!(room, "creating in-memory room document");
                    Arc::new(RoomDoc::new(room))
                }),
        )
    }

    /// Open the shared map of `room`.
    pub fn map(&self, room: &str) -> MemoryMap {
        MemoryMap { doc: self.doc(room) }
    }

    /// Open a new presence connection to `room` with a fresh random id.
    pub fn presence(&self, room: &str) -> MemoryPresence {
        let doc = self.doc(room);
        let client_id = {
            let presence = lock(&doc.presence);
            let mut rng = rand::thread_rng();
            loop {
                let id = u64::from(rng.gen::<u32>());
                if !presence.contains_key(&id) {
                    break id;
                }
            }
        };
        MemoryPresence { doc, client_id }
    }

    /// Room ids opened so far.
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<_> = lock(&self.rooms).keys().cloned().collect();
        rooms.sort();
        rooms
    }
}

/// One peer's handle on a room's shared map.
#[derive(Clone)]
pub struct MemoryMap {
    doc: Arc<RoomDoc>,
}

impl ReplicatedMap for MemoryMap {
    fn get(&self, field: &str) -> Option<Value> {
        lock(&self.doc.fields).get(field).cloned()
    }

    fn set(&self, field: &str, value: Value) {
        self.doc.write(vec![(field.to_string(), value)]);
    }

    fn set_all(&self, fields: Vec<(String, Value)>) {
        self.doc.write(fields);
    }

    fn observe(&self, callback: ChangeCallback) -> Subscription {
        let id = self.doc.field_observers.add(Arc::from(callback));
        let doc: Weak<RoomDoc> = Arc::downgrade(&self.doc);
        Subscription::new(move || {
            if let Some(doc) = doc.upgrade() {
                doc.field_observers.remove(id);
            }
        })
    }

    fn to_snapshot(&self) -> Snapshot {
        lock(&self.doc.fields).clone()
    }
}

/// One peer's presence connection. Dropping it disconnects.
pub struct MemoryPresence {
    doc: Arc<RoomDoc>,
    client_id: u64,
}

impl PresenceChannel for MemoryPresence {
    fn client_id(&self) -> u64 {
        self.client_id
    }

    fn set_local_state(&self, entry: PresenceEntry) {
        let id = self.client_id;
        self.doc.publish_presence(|presence| {
            presence.insert(id, entry);
            true
        });
    }

    fn on_change(&self, callback: PresenceCallback) -> Subscription {
        let id = self.doc.presence_observers.add(Arc::from(callback));
        let doc: Weak<RoomDoc> = Arc::downgrade(&self.doc);
        Subscription::new(move || {
            if let Some(doc) = doc.upgrade() {
                doc.presence_observers.remove(id);
            }
        })
    }

    fn states(&self) -> BTreeMap<u64, PresenceEntry> {
        lock(&self.doc.presence).clone()
    }

    fn leave(&self) {
        let id = self.client_id;
        self.doc
            .publish_presence(|presence| presence.remove(&id).is_some());
    }
}

impl Drop for MemoryPresence {
    fn drop(&mut self) {
        self.leave();
    }
}
