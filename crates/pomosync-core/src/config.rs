//! Environment configuration.

use crate::error::{Error, Result};
use crate::timer::{Durations, TimerState, MAX_PHASE_SECS};

/// Room used when none is given.
pub const DEFAULT_ROOM: &str = "default";

/// Settings for one `pomosync` process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PomoConfig {
    /// Room id shared by every participant.
    pub room: String,
    /// Username to publish; a random slug when unset.
    pub username: Option<String>,
    /// Phase lengths used until the room says otherwise.
    pub durations: Durations,
    /// Extra in-process peers joined to the same room.
    pub local_peers: usize,
}

impl Default for PomoConfig {
    fn default() -> Self {
        Self {
            room: DEFAULT_ROOM.to_string(),
            username: None,
            durations: Durations::standard(),
            local_peers: 0,
        }
    }
}

impl PomoConfig {
    /// Create config from environment variables with sensible defaults.
    ///
    /// - `POMO_ROOM`: room id (default `default`)
    /// - `POMO_USERNAME`: published username
    /// - `POMO_DEV_DURATIONS`: `1`/`true` for 4s/3s/6s phases
    /// - `POMO_FOCUS_SECS`, `POMO_BREAK_SECS`, `POMO_LONG_BREAK_SECS`
    /// - `POMO_LOCAL_PEERS`: extra in-process peers (default 0)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let room = get("POMO_ROOM").unwrap_or_else(|| DEFAULT_ROOM.to_string());
        let username = get("POMO_USERNAME");

        let mut durations = match get("POMO_DEV_DURATIONS") {
            Some(flag) if parse_flag("POMO_DEV_DURATIONS", &flag)? => Durations::development(),
            _ => Durations::standard(),
        };
        if let Some(v) = get("POMO_FOCUS_SECS") {
            durations.focus = parse_secs("POMO_FOCUS_SECS", &v)?;
        }
        if let Some(v) = get("POMO_BREAK_SECS") {
            durations.short_break = parse_secs("POMO_BREAK_SECS", &v)?;
        }
        if let Some(v) = get("POMO_LONG_BREAK_SECS") {
            durations.long_break = parse_secs("POMO_LONG_BREAK_SECS", &v)?;
        }

        let local_peers = match get("POMO_LOCAL_PEERS") {
            Some(v) => v.parse().map_err(|e| Error::Config {
                key: "POMO_LOCAL_PEERS",
                reason: format!("{}: {}", v, e),
            })?,
            None => 0,
        };

        Ok(Self {
            room,
            username,
            durations,
            local_peers,
        })
    }

    /// Override the room id.
    #[must_use]
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = room.into();
        self
    }

    /// Idle timer carrying the configured phase lengths.
    pub fn timer_defaults(&self) -> TimerState {
        TimerState::with_durations(self.durations)
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<u64> {
    match value.parse::<u64>() {
        Ok(0) => Err(Error::Config {
            key,
            reason: "must be greater than zero".to_string(),
        }),
        Ok(secs) if secs > MAX_PHASE_SECS => Err(Error::Config {
            key,
            reason: format!("{} exceeds the maximum of {} seconds", secs, MAX_PHASE_SECS),
        }),
        Ok(secs) => Ok(secs),
        Err(e) => Err(Error::Config {
            key,
            reason: format!("{}: {}", value, e),
        }),
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config {
            key,
            reason: format!("expected a boolean, got {}", other),
        }),
    }
}
