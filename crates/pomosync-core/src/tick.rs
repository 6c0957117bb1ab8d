//! Local tick loop.
//!
//! Every [`TICK_INTERVAL`] the loop recomputes remaining time from the shared
//! expiration and this peer's clock, publishes a display [`Frame`], and
//! completes the phase once it has expired. Boundary detection lags by at most
//! one interval.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::clock::Clock;
use crate::policy::{phase_label, Phase};
use crate::store::TimerStore;
use crate::timer::TimerState;

/// Cadence of the tick loop.
pub const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Remaining time split for display. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Countdown {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl Countdown {
    /// Split `remaining_ms`, clamping anything below zero to `00:00:00`.
    pub fn from_ms(remaining_ms: i64) -> Self {
        let ms = remaining_ms.max(0) as u64;
        Self {
            hours: ms / 3_600_000,
            minutes: (ms / 60_000) % 60,
            seconds: (ms / 1_000) % 60,
        }
    }
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

/// What a peer should render right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub countdown: Countdown,
    pub phase: Phase,
    /// Phase name and number, e.g. `"Break 2"`.
    pub label: String,
    pub running: bool,
    pub session: u64,
}

impl Frame {
    fn new(state: &TimerState, countdown: Countdown) -> Self {
        Self {
            countdown,
            phase: Phase::for_session(state.session),
            label: phase_label(state),
            running: state.running,
            session: state.session,
        }
    }
}

/// Drives the countdown for one peer.
pub struct TickScheduler {
    store: Arc<TimerStore>,
    clock: Arc<dyn Clock>,
    frames: watch::Sender<Frame>,
}

impl TickScheduler {
    pub fn new(store: Arc<TimerStore>, clock: Arc<dyn Clock>) -> Self {
        let (frames, _rx) = watch::channel(Frame::new(&store.read(), Countdown::default()));
        Self {
            store,
            clock,
            frames,
        }
    }

    /// Receiver woken whenever the rendered frame changes.
    pub fn subscribe(&self) -> watch::Receiver<Frame> {
        self.frames.subscribe()
    }

    /// Run one tick and return the frame it rendered.
    pub fn tick(&self) -> Frame {
        let mut state = self.store.read();
        let mut countdown = Countdown::default();

        if state.running {
            let now = self.clock.now_ms();
            let remaining = state.remaining_ms(now);
            countdown = Countdown::from_ms(remaining);

            if remaining <= 0 && self.store.advance(now) {
                state = self.store.read();
                info!(
                    session = state.session,
                    next = %Phase::for_session(state.session),
                    "phase complete"
                );
            }
        }

        let frame = Frame::new(&state, countdown);
        self.frames.send_if_modified(|current| {
            if *current == frame {
                return false;
            }
            *current = frame.clone();
            true
        });
        frame
    }

    /// Tick every [`TICK_INTERVAL`] on a background task.
    pub fn spawn(self) -> TickHandle {
        self.spawn_every(TICK_INTERVAL)
    }

    /// Tick every `period` on a background task.
    pub fn spawn_every(self, period: Duration) -> TickHandle {
        let frames = self.subscribe();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.tick();
            }
        });
        TickHandle { frames, task }
    }
}

/// A running tick loop. Dropping it stops the loop.
pub struct TickHandle {
    frames: watch::Receiver<Frame>,
    task: JoinHandle<()>,
}

impl TickHandle {
    /// Receiver of rendered frames.
    pub fn frames(&self) -> watch::Receiver<Frame> {
        self.frames.clone()
    }

    /// Stop ticking. Frames already published stay readable.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryHub;
    use crate::store::CORRECTION_FACTOR_MS;
    use crate::timer::Durations;

    const T0: u64 = 1_700_000_000_000;

    fn setup() -> (Arc<TimerStore>, ManualClock, TickScheduler) {
        let hub = MemoryHub::new();
        let clock = ManualClock::new(T0);
        let store = Arc::new(TimerStore::new(
            Arc::new(hub.map("room")),
            Arc::new(clock.clone()),
            TimerState::with_durations(Durations::development()),
        ));
        let ticker = TickScheduler::new(Arc::clone(&store), Arc::new(clock.clone()));
        (store, clock, ticker)
    }

    #[test]
    fn countdown_splits_and_clamps() {
        assert_eq!(Countdown::from_ms(-1).to_string(), "00:00:00");
        assert_eq!(Countdown::from_ms(999).to_string(), "00:00:00");
        assert_eq!(Countdown::from_ms(61_000).to_string(), "00:01:01");
        assert_eq!(Countdown::from_ms(3_725_000).to_string(), "01:02:05");
    }

    #[test]
    fn idle_timer_renders_zero() {
        let (_store, _clock, ticker) = setup();
        let frame = ticker.tick();
        assert!(!frame.running);
        assert_eq!(frame.countdown, Countdown::default());
        assert_eq!(frame.label, "Focus 1");
    }

    #[test]
    fn running_timer_counts_down() {
        let (store, clock, ticker) = setup();
        store.start();

        clock.advance(2_000);
        let frame = ticker.tick();
        assert!(frame.running);
        // 4000 + 1100 - 2000 = 3100ms left
        assert_eq!(frame.countdown.seconds, 3);
    }

    #[test]
    fn expiry_advances_exactly_once() {
        let (store, clock, ticker) = setup();
        store.start();

        clock.advance(4_000 + CORRECTION_FACTOR_MS);
        ticker.tick();
        ticker.tick();
        clock.advance(1_000);
        ticker.tick();

        let state = store.read();
        assert_eq!(state.session, 1);
        assert!(!state.running);
        assert_eq!(state.expiration, 0);
    }

    #[test]
    fn development_cycle_scenario() {
        let (store, clock, ticker) = setup();

        let started = store.start();
        assert_eq!(started.expiration, T0 + 4_000 + CORRECTION_FACTOR_MS);

        clock.advance(4_000 + CORRECTION_FACTOR_MS);
        let frame = ticker.tick();
        assert_eq!(frame.session, 1);
        assert!(!frame.running);
        assert_eq!(frame.phase, Phase::Break);

        let now = clock.now_ms();
        let brk = store.start();
        assert_eq!(brk.expiration, now + 3_000 + CORRECTION_FACTOR_MS);
    }

    #[test]
    fn late_remote_start_is_not_advanced() {
        let (store, clock, ticker) = setup();
        store.start();
        clock.advance(10_000);

        // Another peer restarted the phase just before this tick landed.
        let fresh = clock.now_ms() + 5_000;
        store.update(|t| TimerState {
            expiration: fresh,
            ..t
        });
        ticker.tick();

        assert!(store.read().running);
        assert_eq!(store.read().session, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_publishes_frames() {
        let (store, clock, ticker) = setup();
        let handle = ticker.spawn();
        let mut frames = handle.frames();

        store.start();
        frames.changed().await.unwrap();
        assert!(frames.borrow_and_update().running);

        clock.advance(4_000 + CORRECTION_FACTOR_MS);
        loop {
            frames.changed().await.unwrap();
            if frames.borrow_and_update().session == 1 {
                break;
            }
        }
        assert!(!store.read().running);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_loop_no_longer_advances() {
        let (store, clock, ticker) = setup();
        let handle = ticker.spawn();
        store.start();
        tokio::time::sleep(TICK_INTERVAL).await;

        handle.stop();
        clock.advance(4_000 + CORRECTION_FACTOR_MS);
        tokio::time::sleep(TICK_INTERVAL * 10).await;

        let state = store.read();
        assert!(state.running);
        assert_eq!(state.session, 0);
    }
}
