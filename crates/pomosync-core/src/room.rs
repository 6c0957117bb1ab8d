//! One peer's membership in a shared room.
//!
//! A [`Room`] owns everything the peer runs for that room: the timer store,
//! the task applying remote map changes, the tick loop, the notification
//! scheduler and the presence roster. Closing or dropping the room releases
//! all of them.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::clock::Clock;
use crate::notify::{NotificationHost, NotificationScheduler};
use crate::presence::{PresenceEntry, PresenceRoster};
use crate::replica::{PresenceChannel, ReplicatedMap};
use crate::store::{RemoteSync, TimerStore};
use crate::tick::{Frame, TickHandle, TickScheduler};
use crate::timer::TimerState;

/// Who is joining and with which phase lengths.
#[derive(Debug, Clone)]
pub struct RoomOptions {
    /// Opaque room id, used only for logging here.
    pub room: String,
    pub username: String,
    pub color: String,
    /// Timer used until the shared document says otherwise.
    pub defaults: TimerState,
}

/// The collaborators a room is built on.
pub struct RoomServices {
    pub map: Arc<dyn ReplicatedMap>,
    pub presence: Arc<dyn PresenceChannel>,
    pub host: Arc<dyn NotificationHost>,
    pub clock: Arc<dyn Clock>,
}

/// A joined room. Must be created inside a tokio runtime.
///
/// Every member cleans up after itself on drop, so a room that goes out of
/// scope on an error path still stops its tasks and leaves presence.
pub struct Room {
    id: String,
    store: Arc<TimerStore>,
    // Field order is teardown order.
    ticker: TickHandle,
    sync: RemoteSync,
    notifier: NotificationScheduler,
    roster: PresenceRoster,
}

impl Room {
    /// Join: adopt the shared timer, start the background tasks and publish
    /// presence.
    pub fn join(options: RoomOptions, services: RoomServices) -> Self {
        let RoomServices {
            map,
            presence,
            host,
            clock,
        } = services;

        let notifier = NotificationScheduler::spawn(host, Arc::clone(&clock));
        let store = Arc::new(
            TimerStore::new(Arc::clone(&map), Arc::clone(&clock), options.defaults)
                .with_notifier(notifier.handle()),
        );
        let sync = RemoteSync::follow(Arc::clone(&map), Arc::clone(&store));
        let ticker = TickScheduler::new(Arc::clone(&store), clock).spawn();
        let roster = PresenceRoster::join(presence, options.username, options.color);

        let state = store.read();
        info!(
            room = %options.room,
            id = roster.local().id,
            running = state.running,
            session = state.session,
            "joined room"
        );

        Self {
            id: options.room,
            store,
            ticker,
            sync,
            notifier,
            roster,
        }
    }

    /// Room id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The underlying timer store.
    pub fn store(&self) -> &Arc<TimerStore> {
        &self.store
    }

    /// Latest local timer.
    pub fn timer(&self) -> TimerState {
        self.store.read()
    }

    /// Start the next phase for everyone.
    pub fn start(&self) -> TimerState {
        self.store.start()
    }

    /// Stop the countdown for everyone.
    pub fn reset(&self) -> TimerState {
        self.store.reset()
    }

    /// Rendered frames from the tick loop.
    pub fn frames(&self) -> watch::Receiver<Frame> {
        self.ticker.frames()
    }

    /// Timer snapshots as the local state changes.
    pub fn timer_updates(&self) -> watch::Receiver<TimerState> {
        self.store.subscribe()
    }

    /// Everyone connected.
    pub fn peers(&self) -> Vec<PresenceEntry> {
        self.roster.peers()
    }

    /// Peer list as it changes.
    pub fn peer_updates(&self) -> watch::Receiver<Vec<PresenceEntry>> {
        self.roster.subscribe()
    }

    /// This peer's presence entry.
    pub fn me(&self) -> &PresenceEntry {
        self.roster.local()
    }

    /// Change this peer's username.
    pub fn rename(&mut self, username: String) {
        self.roster.rename(username);
    }

    /// Leave the room, stopping every background task.
    ///
    /// Dropping a room releases the same resources; this just does it in a
    /// fixed order and logs it.
    pub fn close(self) {
        let Room {
            id,
            store: _,
            ticker,
            sync,
            notifier,
            mut roster,
        } = self;
        ticker.stop();
        sync.stop();
        notifier.shutdown();
        roster.leave();
        info!(room = %id, "left room");
    }
}
