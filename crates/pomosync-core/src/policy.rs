//! Session policy: which phase comes next.
//!
//! Every 4th completed phase is a long break, every other one a short break,
//! everything else is focus. The long-break test runs first so the 4th phase
//! is never also counted as a short break.

use std::fmt;

use crate::timer::TimerState;

/// Kind of interval the next countdown represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Focus,
    Break,
    LongBreak,
}

impl Phase {
    /// Phase that follows `session` completed phases.
    pub const fn for_session(session: u64) -> Self {
        let n = session.wrapping_add(1);
        if n % 4 == 0 {
            Phase::LongBreak
        } else if n % 2 == 0 {
            Phase::Break
        } else {
            Phase::Focus
        }
    }

    /// Human-readable name.
    pub const fn name(&self) -> &'static str {
        match self {
            Phase::Focus => "Focus",
            Phase::Break => "Break",
            Phase::LongBreak => "Long Break",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Length in seconds of the phase about to start.
///
/// `None` means the room has not synchronised yet; it reports `0`.
pub fn phase_duration(state: Option<&TimerState>) -> u64 {
    let Some(state) = state else {
        return 0;
    };
    match Phase::for_session(state.session) {
        Phase::LongBreak => state.long_break_duration,
        Phase::Break => state.break_duration,
        Phase::Focus => state.focus_duration,
    }
}

/// Name of the phase about to start, `"Focus"` before synchronisation.
pub fn phase_name(state: Option<&TimerState>) -> &'static str {
    state
        .map(|s| Phase::for_session(s.session))
        .unwrap_or(Phase::Focus)
        .name()
}

/// Heading such as `"Break 2"`: phase name plus the 1-based phase number.
pub fn phase_label(state: &TimerState) -> String {
    format!("{} {}", phase_name(Some(state)), state.session.saturating_add(1))
}
