//! pomosync - Shared Pomodoro Timer
//!
//! Several peers share one countdown through a replicated document, with no
//! central authority deciding what time it is. Each peer keeps a local copy of
//! the timer, writes changes optimistically, and converges on whatever the
//! replicated map settles on.
//!
//! # Architecture
//!
//! - **Policy**: which phase (focus, break, long break) comes next
//! - **Store**: local timer cache, sole writer of the shared map
//! - **Tick**: 200 ms loop rendering the countdown and completing phases
//! - **Notify**: independent task raising one alert per phase end
//! - **Presence**: roster of connected peers
//! - **Replica**: the map/presence interfaces, plus an in-process hub
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pomosync_core::{
//!     LogNotifier, MemoryHub, Room, RoomOptions, RoomServices, SystemClock, TimerState,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = MemoryHub::new();
//!     let room = Room::join(
//!         RoomOptions {
//!             room: "study".into(),
//!             username: "ada".into(),
//!             color: "hsl(137.5,50%,75%)".into(),
//!             defaults: TimerState::default(),
//!         },
//!         RoomServices {
//!             map: Arc::new(hub.map("study")),
//!             presence: Arc::new(hub.presence("study")),
//!             host: Arc::new(LogNotifier),
//!             clock: Arc::new(SystemClock),
//!         },
//!     );
//!     room.start();
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod memory;
pub mod notify;
pub mod policy;
pub mod presence;
pub mod replica;
pub mod room;
pub mod store;
pub mod tick;
pub mod timer;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PomoConfig;
pub use error::{Error, Result};
pub use identity::{random_color, random_username};
pub use memory::{MemoryHub, MemoryMap, MemoryPresence};
pub use notify::{
    LogNotifier, NotificationHandle, NotificationHost, NotificationScheduler, Permission,
};
pub use policy::{phase_duration, phase_label, phase_name, Phase};
pub use presence::{PresenceEntry, PresenceRoster};
pub use replica::{PresenceChannel, ReplicatedMap, Subscription};
pub use room::{Room, RoomOptions, RoomServices};
pub use store::{RemoteSync, TimerStore, CORRECTION_FACTOR_MS};
pub use tick::{Countdown, Frame, TickHandle, TickScheduler, TICK_INTERVAL};
pub use timer::{Durations, Snapshot, TimerMessage, TimerState, MAX_PHASE_SECS};
