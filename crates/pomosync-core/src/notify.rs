//! Out-of-band notification scheduling.
//!
//! The scheduler runs as its own task, fed by [`TimerMessage`] posts, so a
//! stalled or throttled tick loop does not delay the end-of-phase alert. It
//! keeps at most one alarm armed: every post cancels the previous alarm and,
//! if the posted timer is running, arms a new one for its expiration. A fired
//! alarm is not re-armed; the next phase's post does that.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

use crate::clock::Clock;
use crate::timer::{TimerMessage, TimerState};

/// Title of every notification.
pub const NOTIFICATION_TITLE: &str = "Pomodoro";

/// Body shown when a phase ends.
pub const PHASE_COMPLETE_BODY: &str = "Timer completed!";

/// Host notification permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// The user has not been asked yet, or dismissed the prompt.
    Default,
}

/// The host's user-facing notification primitive.
pub trait NotificationHost: Send + Sync {
    /// Current permission.
    fn permission(&self) -> Permission;

    /// Prompt the user and return the outcome.
    fn request_permission(&self) -> Permission;

    /// Show one notification.
    fn show(&self, title: &str, body: &str);
}

/// Show `body` if the host allows it. Asks at most once per call and gives up
/// quietly on refusal. Returns whether a notification was shown.
pub fn notify(host: &dyn NotificationHost, body: &str) -> bool {
    let permission = match host.permission() {
        Permission::Default => host.request_permission(),
        permission => permission,
    };
    match permission {
        Permission::Granted => {
            host.show(NOTIFICATION_TITLE, body);
            true
        }
        other => {
            debug!(permission = ?other, "notification suppressed");
            false
        }
    }
}

/// Host that reports through the log and rings the terminal bell.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationHost for LogNotifier {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    fn show(&self, title: &str, body: &str) {
        info!(title, body, "notification");
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }
}

/// Cheap, cloneable sender side of the scheduler.
#[derive(Debug, Clone)]
pub struct NotificationHandle {
    tx: mpsc::UnboundedSender<TimerMessage>,
}

impl NotificationHandle {
    #[cfg(test)]
    pub(crate) fn for_channel(tx: mpsc::UnboundedSender<TimerMessage>) -> Self {
        Self { tx }
    }

    /// Fire-and-forget. Posting to a stopped scheduler is a no-op.
    pub fn post(&self, timer: TimerState) {
        if self.tx.send(TimerMessage { timer }).is_err() {
            trace!("notification scheduler gone, dropping post");
        }
    }
}

/// Owns the scheduler task. Dropping it cancels any armed alarm.
pub struct NotificationScheduler {
    handle: NotificationHandle,
    task: JoinHandle<()>,
}

impl NotificationScheduler {
    /// Start the scheduler task on the current runtime.
    pub fn spawn(host: Arc<dyn NotificationHost>, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, host, clock));
        Self {
            handle: NotificationHandle { tx },
            task,
        }
    }

    /// A sender for other components.
    pub fn handle(&self) -> NotificationHandle {
        self.handle.clone()
    }

    /// Post a snapshot.
    pub fn post(&self, timer: TimerState) {
        self.handle.post(timer);
    }

    /// Stop the task and discard any armed alarm.
    pub fn shutdown(self) {
        self.task.abort();
        debug!("notification scheduler shut down");
    }
}

impl Drop for NotificationScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// When the alarm for `timer` should fire, if at all. An expiration too far
/// out to represent as an `Instant` arms nothing.
fn alarm_for(timer: &TimerState, now_ms: u64) -> Option<Instant> {
    if !timer.running {
        return None;
    }
    let delay = timer.remaining_ms(now_ms).max(0) as u64;
    let at = Instant::now().checked_add(Duration::from_millis(delay));
    if at.is_none() {
        debug!(expiration = timer.expiration, "expiration out of range, no alarm armed");
    }
    at
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<TimerMessage>,
    host: Arc<dyn NotificationHost>,
    clock: Arc<dyn Clock>,
) {
    let mut alarm: Option<Instant> = None;

    loop {
        let armed = alarm;
        let elapsed = async move {
            match armed {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            msg = rx.recv() => {
                let Some(TimerMessage { timer }) = msg else {
                    break;
                };
                alarm = alarm_for(&timer, clock.now_ms());
                trace!(armed = alarm.is_some(), expiration = timer.expiration, "timer posted");
            }
            _ = elapsed => {
                alarm = None;
                notify(host.as_ref(), PHASE_COMPLETE_BODY);
            }
        }
    }

    debug!("notification scheduler stopped");
}
