use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AuthFailure;
use crate::lease::to_chrono;

/// Default acceptance window around now for wall-clock timestamps.
pub const DEFAULT_REPLAY_TOLERANCE: Duration = Duration::from_secs(300);

/// Values at or above this are read as Unix seconds in [`TimestampMode::Auto`]
/// (2001-09-09). Smaller values are device uptime.
pub const DEFAULT_UPTIME_CUTOFF: i64 = 1_000_000_000;

/// How a deployment interprets pulse timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampMode {
    /// Unix seconds, checked against the tolerance window.
    #[default]
    WallClock,
    /// Seconds since device boot. Any non-negative value passes, so there is
    /// no replay protection.
    DeviceUptime,
    /// Decide per message by magnitude, using the uptime cutoff.
    Auto,
}

impl FromStr for TimestampMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "wall_clock" | "wallclock" | "unix" => Ok(TimestampMode::WallClock),
            "device_uptime" | "uptime" => Ok(TimestampMode::DeviceUptime),
            "auto" => Ok(TimestampMode::Auto),
            other => Err(format!(
                "unknown timestamp mode {other:?} (expected wall_clock, device_uptime or auto)"
            )),
        }
    }
}

/// How an accepted timestamp was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampKind {
    WallClock,
    DeviceUptime,
}

/// Anti-replay check for coin pulses.
#[derive(Debug, Clone)]
pub struct ReplayPolicy {
    mode: TimestampMode,
    tolerance: chrono::Duration,
    uptime_cutoff: i64,
}

impl Default for ReplayPolicy {
    fn default() -> Self {
        Self::new(TimestampMode::default())
    }
}

impl ReplayPolicy {
    pub fn new(mode: TimestampMode) -> Self {
        Self {
            mode,
            tolerance: to_chrono(DEFAULT_REPLAY_TOLERANCE),
            uptime_cutoff: DEFAULT_UPTIME_CUTOFF,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = to_chrono(tolerance);
        self
    }

    pub fn with_uptime_cutoff(mut self, cutoff: i64) -> Self {
        self.uptime_cutoff = cutoff;
        self
    }

    pub fn mode(&self) -> TimestampMode {
        self.mode
    }

    /// Validate the transmitted timestamp text against `now`.
    pub fn check(&self, raw: &str, now: DateTime<Utc>) -> Result<TimestampKind, AuthFailure> {
        let value: i64 = raw
            .trim()
            .parse()
            .map_err(|_| AuthFailure::MalformedTimestamp)?;
        if value < 0 {
            return Err(AuthFailure::MalformedTimestamp);
        }

        match self.mode {
            TimestampMode::WallClock => self.check_wall_clock(value, now),
            TimestampMode::DeviceUptime => Ok(TimestampKind::DeviceUptime),
            TimestampMode::Auto if value >= self.uptime_cutoff => {
                self.check_wall_clock(value, now)
            }
            TimestampMode::Auto => Ok(TimestampKind::DeviceUptime),
        }
    }

    fn check_wall_clock(&self, value: i64, now: DateTime<Utc>) -> Result<TimestampKind, AuthFailure> {
        let skew = now.timestamp().abs_diff(value);
        if skew > self.tolerance.num_seconds().unsigned_abs() {
            return Err(AuthFailure::StaleTimestamp);
        }
        Ok(TimestampKind::WallClock)
    }
}
