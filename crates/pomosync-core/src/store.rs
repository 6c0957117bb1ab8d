//! Timer state store.
//!
//! Two paths touch the local timer:
//!
//! - **Local writes** ([`TimerStore::update`]) apply a transform to the cached
//!   state, write every field to the shared map and adopt the result at once,
//!   without waiting for any acknowledgement.
//! - **Remote merges** ([`TimerStore::on_remote_change`]) replace the cache with
//!   the map's contents laid over the defaults. They arrive asynchronously via
//!   [`RemoteSync`].
//!
//! Snapshots leave the store as `Copy` values on a `watch` channel and as posts
//! to the notification scheduler; nothing else shares the cache.
//!
//! The map merges per field, so two peers updating at the same moment can
//! leave a mix of both writes (for example one peer's `running` with another's
//! `session`). That window is accepted: the next update from either peer
//! rewrites every field.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::clock::Clock;
use crate::notify::NotificationHandle;
use crate::policy::phase_duration;
use crate::replica::{ReplicatedMap, Subscription};
use crate::timer::{Snapshot, TimerState};

/// Padding added to every computed expiration, in milliseconds, so peers that
/// receive a start late do not see negative time on their first render.
pub const CORRECTION_FACTOR_MS: u64 = 1100;

/// Local cache of the shared timer and sole writer of the shared map.
pub struct TimerStore {
    map: Arc<dyn ReplicatedMap>,
    clock: Arc<dyn Clock>,
    defaults: TimerState,
    state: watch::Sender<TimerState>,
    notifier: Option<NotificationHandle>,
}

impl TimerStore {
    /// Adopt whatever the map already holds, over `defaults`.
    ///
    /// An empty map is not written to here. The defaults reach the map with
    /// the first update, so a late-syncing peer cannot clobber a running timer.
    pub fn new(map: Arc<dyn ReplicatedMap>, clock: Arc<dyn Clock>, defaults: TimerState) -> Self {
        let initial = TimerState::from_snapshot(&defaults, &map.to_snapshot());
        let (state, _rx) = watch::channel(initial);
        Self {
            map,
            clock,
            defaults,
            state,
            notifier: None,
        }
    }

    /// Forward every state change to a notification scheduler.
    pub fn with_notifier(mut self, notifier: NotificationHandle) -> Self {
        notifier.post(self.read());
        self.notifier = Some(notifier);
        self
    }

    /// Latest locally known state.
    pub fn read(&self) -> TimerState {
        *self.state.borrow()
    }

    /// Receiver woken whenever the local state changes.
    pub fn subscribe(&self) -> watch::Receiver<TimerState> {
        self.state.subscribe()
    }

    /// Apply `transform`, write the result to the map and adopt it locally.
    pub fn update(&self, transform: impl FnOnce(TimerState) -> TimerState) -> TimerState {
        let mut result = self.read();
        self.state.send_if_modified(|state| {
            let next = transform(*state);
            self.map.set_all(next.to_fields());
            let changed = next != *state;
            *state = next;
            result = next;
            changed
        });
        trace!(?result, "local update");
        self.post(result);
        result
    }

    /// Replace local state with `snapshot` laid over the defaults.
    ///
    /// Returns whether the local state changed. Echoes of this peer's own
    /// writes usually do not.
    pub fn on_remote_change(&self, snapshot: &Snapshot) -> bool {
        let next = TimerState::from_snapshot(&self.defaults, snapshot);
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            debug!(
                running = next.running,
                session = next.session,
                expiration = next.expiration,
                "remote change adopted"
            );
            self.post(next);
        }
        changed
    }

    /// Start the next phase.
    pub fn start(&self) -> TimerState {
        let now = self.clock.now_ms();
        let state = self.update(|timer| TimerState {
            expiration: now
                .saturating_add(phase_duration(Some(&timer)).saturating_mul(1000))
                .saturating_add(CORRECTION_FACTOR_MS),
            running: true,
            ..timer
        });
        info!(session = state.session, expiration = state.expiration, "timer started");
        state
    }

    /// Stop the countdown without completing the phase.
    pub fn reset(&self) -> TimerState {
        let state = self.update(|timer| TimerState {
            expiration: 0,
            running: false,
            ..timer
        });
        info!(session = state.session, "timer reset");
        state
    }

    /// Complete the current phase if it is still running and has expired at
    /// `now_ms`. Returns whether the session counter moved.
    ///
    /// The check runs inside the transform, against the state being replaced,
    /// so two ticks racing over the same expiration advance only once.
    pub fn advance(&self, now_ms: u64) -> bool {
        let mut advanced = false;
        self.update(|timer| {
            if !timer.running || timer.remaining_ms(now_ms) > 0 {
                return timer;
            }
            advanced = true;
            TimerState {
                expiration: 0,
                running: false,
                session: timer.session.saturating_add(1),
                ..timer
            }
        });
        advanced
    }

    fn post(&self, timer: TimerState) {
        if let Some(notifier) = &self.notifier {
            notifier.post(timer);
        }
    }
}

/// Feeds map change notifications into a store from a background task.
///
/// A notification only wakes the task; the task then reads the map itself, so
/// a callback payload that arrives out of order cannot leave the store behind
/// the map. Dropping it unregisters the map observer and stops the task.
pub struct RemoteSync {
    subscription: Option<Subscription>,
    task: JoinHandle<()>,
}

impl RemoteSync {
    /// Observe `map` and apply every change to `store`.
    ///
    /// Writes that landed after `store` was built but before the observer was
    /// registered are applied here, before this returns.
    pub fn follow(map: Arc<dyn ReplicatedMap>, store: Arc<TimerStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let subscription = map.observe(Box::new(move |_snapshot| {
            let _ = tx.send(());
        }));

        if store.on_remote_change(&map.to_snapshot()) {
            debug!("caught up with writes made while joining");
        }

        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Coalesce a burst of notifications into one read.
                while rx.try_recv().is_ok() {}
                store.on_remote_change(&map.to_snapshot());
            }
        });

        Self {
            subscription: Some(subscription),
            task,
        }
    }

    /// Stop following the map.
    pub fn stop(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.task.abort();
    }
}

impl Drop for RemoteSync {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::{MemoryHub, MemoryMap};
    use crate::replica::ChangeCallback;
    use crate::timer::{Durations, MAX_PHASE_SECS};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// A map whose change callbacks fire only when the test says so, with
    /// whatever payload the test chooses.
    struct ReplayMap {
        inner: MemoryMap,
        callbacks: Mutex<Vec<ChangeCallback>>,
    }

    impl ReplayMap {
        fn new(inner: MemoryMap) -> Arc<Self> {
            Arc::new(Self {
                inner,
                callbacks: Mutex::new(Vec::new()),
            })
        }

        fn deliver(&self, snapshot: Snapshot) {
            for callback in self.callbacks.lock().unwrap().iter() {
                callback(snapshot.clone());
            }
        }
    }

    impl ReplicatedMap for ReplayMap {
        fn get(&self, field: &str) -> Option<Value> {
            self.inner.get(field)
        }

        fn set(&self, field: &str, value: Value) {
            self.inner.set(field, value);
        }

        fn observe(&self, callback: ChangeCallback) -> Subscription {
            self.callbacks.lock().unwrap().push(callback);
            Subscription::new(|| {})
        }

        fn to_snapshot(&self) -> Snapshot {
            self.inner.to_snapshot()
        }
    }

    const T0: u64 = 1_700_000_000_000;

    fn store(hub: &MemoryHub, clock: &ManualClock) -> TimerStore {
        TimerStore::new(
            Arc::new(hub.map("room")),
            Arc::new(clock.clone()),
            TimerState::with_durations(Durations::development()),
        )
    }

    #[test]
    fn fresh_room_starts_from_defaults_without_writing() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let store = store(&hub, &clock);

        assert_eq!(store.read(), TimerState::with_durations(Durations::development()));
        assert!(hub.map("room").to_snapshot().is_empty());
    }

    #[test]
    fn update_writes_every_field() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let store = store(&hub, &clock);

        store.update(|t| TimerState { session: 5, ..t });

        let snap = hub.map("room").to_snapshot();
        assert_eq!(snap.len(), 6);
        assert_eq!(snap["session"], json!(5));
        assert_eq!(snap["focusDuration"], json!(4));
        assert_eq!(store.read().session, 5);
    }

    #[test]
    fn noop_update_is_idempotent() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let store = store(&hub, &clock);
        let rx = store.subscribe();

        let first = store.update(|t| t);
        let second = store.update(|t| t);

        assert_eq!(first, second);
        assert_eq!(second.session, 0);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn start_uses_phase_duration_and_correction() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let store = store(&hub, &clock);

        let started = store.start();
        assert!(started.running);
        assert_eq!(started.expiration, T0 + 4_000 + CORRECTION_FACTOR_MS);
    }

    #[test]
    fn reset_keeps_session() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let store = store(&hub, &clock);

        store.update(|t| TimerState { session: 2, ..t });
        store.start();
        let reset = store.reset();

        assert!(!reset.running);
        assert_eq!(reset.expiration, 0);
        assert_eq!(reset.session, 2);
    }

    #[test]
    fn oversized_remote_duration_cannot_break_start() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let store = store(&hub, &clock);

        let mut snapshot = Snapshot::new();
        snapshot.insert("focusDuration".into(), json!(1e300));
        store.on_remote_change(&snapshot);
        assert_eq!(store.read().focus_duration, 4);

        let started = store.start();
        assert_eq!(started.expiration, T0 + 4_000 + CORRECTION_FACTOR_MS);
    }

    #[test]
    fn start_saturates_at_the_end_of_time() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(u64::MAX - 10);
        let store = store(&hub, &clock);
        store.update(|t| TimerState {
            focus_duration: MAX_PHASE_SECS,
            ..t
        });

        let started = store.start();
        assert!(started.running);
        assert_eq!(started.expiration, u64::MAX);
    }

    #[test]
    fn advance_saturates_session() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let store = store(&hub, &clock);
        store.update(|t| TimerState {
            expiration: T0,
            running: true,
            session: u64::MAX,
            ..t
        });

        assert!(store.advance(T0));
        let state = store.read();
        assert_eq!(state.session, u64::MAX);
        assert!(!state.running);
    }

    #[test]
    fn advance_only_once_per_expiration() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let store = store(&hub, &clock);

        let started = store.start();
        assert!(!store.advance(T0 + 1_000), "not expired yet");

        let late = started.expiration + 50;
        assert!(store.advance(late));
        assert!(!store.advance(late));
        assert!(!store.advance(late + 200));

        let state = store.read();
        assert_eq!(state.session, 1);
        assert!(!state.running);
        assert_eq!(state.expiration, 0);
    }

    #[test]
    fn remote_snapshot_merges_over_defaults() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let store = store(&hub, &clock);

        let mut snapshot = Snapshot::new();
        snapshot.insert("running".into(), json!(true));
        snapshot.insert("expiration".into(), json!(T0 + 9_000));

        assert!(store.on_remote_change(&snapshot));
        let state = store.read();
        assert!(state.running);
        assert_eq!(state.session, 0);
        assert_eq!(state.break_duration, 3);

        assert!(!store.on_remote_change(&snapshot), "same snapshot twice");
    }

    #[tokio::test]
    async fn notifier_receives_initial_and_updates() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = NotificationHandle::for_channel(tx);

        let store = store(&hub, &clock).with_notifier(handle);
        store.start();
        store.reset();

        let initial = rx.recv().await.unwrap().timer;
        assert!(!initial.running);
        let started = rx.recv().await.unwrap().timer;
        assert!(started.running);
        let reset = rx.recv().await.unwrap().timer;
        assert!(!reset.running);
    }

    #[tokio::test]
    async fn remote_sync_follows_other_writers() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let local = Arc::new(store(&hub, &clock));
        let sync = RemoteSync::follow(Arc::new(hub.map("room")), Arc::clone(&local));
        let mut changes = local.subscribe();

        let remote = store(&hub, &clock);
        remote.start();

        changes.changed().await.unwrap();
        assert!(local.read().running);
        assert_eq!(local.read().expiration, remote.read().expiration);

        sync.stop();
        remote.reset();
        tokio::task::yield_now().await;
        assert!(local.read().running, "stopped sync no longer applies changes");
    }

    #[tokio::test]
    async fn follow_catches_up_with_writes_made_while_joining() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let local = Arc::new(store(&hub, &clock));

        // Lands after `local` read the map but before it observes it.
        let remote = store(&hub, &clock);
        let started = remote.start();
        assert!(!local.read().running);

        let _sync = RemoteSync::follow(Arc::new(hub.map("room")), Arc::clone(&local));
        assert_eq!(local.read(), started);
    }

    #[tokio::test]
    async fn stale_notification_still_adopts_current_map() {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let map = ReplayMap::new(hub.map("room"));
        let local = Arc::new(TimerStore::new(
            Arc::clone(&map) as Arc<dyn ReplicatedMap>,
            Arc::new(clock.clone()),
            TimerState::with_durations(Durations::development()),
        ));
        let _sync = RemoteSync::follow(
            Arc::clone(&map) as Arc<dyn ReplicatedMap>,
            Arc::clone(&local),
        );
        let mut changes = local.subscribe();

        let remote = store(&hub, &clock);
        remote.update(|t| TimerState { session: 1, ..t });
        let stale = hub.map("room").to_snapshot();
        remote.update(|t| TimerState { session: 2, ..t });

        map.deliver(stale);
        changes.changed().await.unwrap();
        assert_eq!(local.read().session, 2);
    }
}
