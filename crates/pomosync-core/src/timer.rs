//! Replicated timer state.
//!
//! One [`TimerState`] exists per room. It is stored in the shared map as six
//! flat primitive fields so the map can merge each one independently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field holding the expiration instant (epoch ms, `0` when idle).
pub const FIELD_EXPIRATION: &str = "expiration";
/// Field holding the running flag.
pub const FIELD_RUNNING: &str = "running";
/// Field holding the completed-phase counter.
pub const FIELD_SESSION: &str = "session";
/// Field holding the focus phase length in seconds.
pub const FIELD_FOCUS_DURATION: &str = "focusDuration";
/// Field holding the short break length in seconds.
pub const FIELD_BREAK_DURATION: &str = "breakDuration";
/// Field holding the long break length in seconds.
pub const FIELD_LONG_BREAK_DURATION: &str = "longBreakDuration";

/// Every field the timer persists, in write order.
pub const TIMER_FIELDS: [&str; 6] = [
    FIELD_EXPIRATION,
    FIELD_RUNNING,
    FIELD_SESSION,
    FIELD_FOCUS_DURATION,
    FIELD_BREAK_DURATION,
    FIELD_LONG_BREAK_DURATION,
];

/// Longest accepted phase, in seconds. Anything above it is treated as
/// malformed.
pub const MAX_PHASE_SECS: u64 = u32::MAX as u64;

/// A flat field/value view of the shared map.
pub type Snapshot = serde_json::Map<String, Value>;

/// Phase lengths in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Durations {
    pub focus: u64,
    pub short_break: u64,
    pub long_break: u64,
}

impl Durations {
    /// 25 / 5 / 30 minutes.
    pub const fn standard() -> Self {
        Self {
            focus: 25 * 60,
            short_break: 5 * 60,
            long_break: 30 * 60,
        }
    }

    /// 4 / 3 / 6 seconds, for watching a whole cycle go by.
    pub const fn development() -> Self {
        Self {
            focus: 4,
            short_break: 3,
            long_break: 6,
        }
    }
}

impl Default for Durations {
    fn default() -> Self {
        Self::standard()
    }
}

/// The shared timer.
///
/// Invariants: `running` implies `expiration > 0`, and `session` never
/// decreases for the lifetime of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    /// Epoch milliseconds at which the current phase ends; `0` when idle.
    pub expiration: u64,
    /// Whether a phase is counting down.
    pub running: bool,
    /// Number of completed phases.
    pub session: u64,
    /// Focus length in seconds.
    pub focus_duration: u64,
    /// Short break length in seconds.
    pub break_duration: u64,
    /// Long break length in seconds.
    pub long_break_duration: u64,
}

impl TimerState {
    /// An idle timer at session zero with the given phase lengths.
    pub const fn with_durations(durations: Durations) -> Self {
        Self {
            expiration: 0,
            running: false,
            session: 0,
            focus_duration: durations.focus,
            break_duration: durations.short_break,
            long_break_duration: durations.long_break,
        }
    }

    /// Milliseconds left until `expiration`, negative once it has passed.
    pub fn remaining_ms(&self, now_ms: u64) -> i64 {
        let expiration = i64::try_from(self.expiration).unwrap_or(i64::MAX);
        let now = i64::try_from(now_ms).unwrap_or(i64::MAX);
        expiration.saturating_sub(now)
    }

    /// Every field as a map entry, in [`TIMER_FIELDS`] order.
    pub fn to_fields(&self) -> Vec<(String, Value)> {
        vec![
            (FIELD_EXPIRATION.to_string(), Value::from(self.expiration)),
            (FIELD_RUNNING.to_string(), Value::from(self.running)),
            (FIELD_SESSION.to_string(), Value::from(self.session)),
            (FIELD_FOCUS_DURATION.to_string(), Value::from(self.focus_duration)),
            (FIELD_BREAK_DURATION.to_string(), Value::from(self.break_duration)),
            (
                FIELD_LONG_BREAK_DURATION.to_string(),
                Value::from(self.long_break_duration),
            ),
        ]
    }

    /// Overlay a map snapshot on `defaults`.
    ///
    /// Missing fields and fields of the wrong type keep the default, so a
    /// partially replicated document never produces a half-initialised timer.
    pub fn from_snapshot(defaults: &TimerState, snapshot: &Snapshot) -> TimerState {
        let number = |field: &str, fallback: u64| {
            snapshot.get(field).and_then(as_millis_or_count).unwrap_or(fallback)
        };
        let duration = |field: &str, fallback: u64| match number(field, fallback) {
            secs @ 1..=MAX_PHASE_SECS => secs,
            _ => fallback,
        };

        TimerState {
            expiration: number(FIELD_EXPIRATION, defaults.expiration),
            running: snapshot
                .get(FIELD_RUNNING)
                .and_then(Value::as_bool)
                .unwrap_or(defaults.running),
            session: number(FIELD_SESSION, defaults.session),
            focus_duration: duration(FIELD_FOCUS_DURATION, defaults.focus_duration),
            break_duration: duration(FIELD_BREAK_DURATION, defaults.break_duration),
            long_break_duration: duration(
                FIELD_LONG_BREAK_DURATION,
                defaults.long_break_duration,
            ),
        }
    }
}

impl Default for TimerState {
    fn default() -> Self {
        Self::with_durations(Durations::standard())
    }
}

/// Non-negative integer from a JSON number. Peers that store numbers as
/// floats (`1.7e12`) are accepted; negatives, NaN and non-numbers are not.
fn as_millis_or_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

/// The one message shape sent to the notification task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerMessage {
    pub timer: TimerState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> Snapshot {
        match value {
            Value::Object(map) => map,
            _ => panic!("snapshot must be an object"),
        }
    }

    #[test]
    fn missing_session_falls_back_to_zero() {
        let defaults = TimerState::default();
        let snap = snapshot(json!({ "expiration": 1234, "running": true }));

        let state = TimerState::from_snapshot(&defaults, &snap);
        assert_eq!(state.session, 0);
        assert_eq!(state.expiration, 1234);
        assert!(state.running);
        assert_eq!(state.focus_duration, defaults.focus_duration);
    }

    #[test]
    fn empty_snapshot_is_defaults() {
        let defaults = TimerState::with_durations(Durations::development());
        let state = TimerState::from_snapshot(&defaults, &Snapshot::new());
        assert_eq!(state, defaults);
    }

    #[test]
    fn mistyped_fields_keep_defaults() {
        let defaults = TimerState::default();
        let snap = snapshot(json!({
            "running": "yes",
            "session": -3,
            "expiration": null,
            "focusDuration": 0,
            "breakDuration": "five",
        }));

        let state = TimerState::from_snapshot(&defaults, &snap);
        assert_eq!(state, defaults);
    }

    #[test]
    fn float_numbers_are_accepted() {
        let defaults = TimerState::default();
        let snap = snapshot(json!({ "expiration": 1.7e12, "session": 3.0 }));

        let state = TimerState::from_snapshot(&defaults, &snap);
        assert_eq!(state.expiration, 1_700_000_000_000);
        assert_eq!(state.session, 3);
    }

    #[test]
    fn fields_cover_every_persisted_key() {
        let fields = TimerState::default().to_fields();
        let keys: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, TIMER_FIELDS);

        let snap: Snapshot = fields.into_iter().collect();
        let back = TimerState::from_snapshot(&TimerState::default(), &snap);
        assert_eq!(back, TimerState::default());
    }

    #[test]
    fn message_uses_camel_case_fields() {
        let msg = TimerMessage {
            timer: TimerState::with_durations(Durations::development()),
        };
        let value = serde_json::to_value(msg).unwrap();
        assert_eq!(value["timer"]["longBreakDuration"], json!(6));
        assert_eq!(value["timer"]["running"], json!(false));
    }

    #[test]
    fn oversized_durations_keep_defaults() {
        let defaults = TimerState::default();
        let snap = snapshot(json!({
            "focusDuration": 1e300,
            "breakDuration": u64::MAX,
            "longBreakDuration": MAX_PHASE_SECS + 1,
        }));

        let state = TimerState::from_snapshot(&defaults, &snap);
        assert_eq!(state, defaults);

        let snap = snapshot(json!({ "focusDuration": MAX_PHASE_SECS }));
        let state = TimerState::from_snapshot(&defaults, &snap);
        assert_eq!(state.focus_duration, MAX_PHASE_SECS);
    }

    #[test]
    fn remaining_saturates_for_huge_instants() {
        let state = TimerState {
            expiration: u64::MAX,
            running: true,
            ..TimerState::default()
        };
        assert_eq!(state.remaining_ms(0), i64::MAX);
        assert!(state.remaining_ms(1_700_000_000_000) > 0);

        let idle = TimerState::default();
        assert_eq!(idle.remaining_ms(u64::MAX), -i64::MAX);
    }

    #[test]
    fn remaining_goes_negative_after_expiration() {
        let state = TimerState {
            expiration: 10_000,
            running: true,
            ..TimerState::default()
        };
        assert_eq!(state.remaining_ms(9_000), 1_000);
        assert_eq!(state.remaining_ms(10_500), -500);
    }
}
