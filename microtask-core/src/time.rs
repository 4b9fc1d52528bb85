//! Time utilities: local calendar days, night detection, elapsed seconds.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Night window used when requesting night tasks: [22:00, 06:00).
pub const NIGHT_STARTS_AT_HOUR: u32 = 22;
pub const NIGHT_ENDS_AT_HOUR: u32 = 6;

/// Parse an IANA timezone name like "Asia/Shanghai".
pub fn parse_timezone(tz: &str) -> Result<Tz> {
    tz.parse()
        .map_err(|_| anyhow::anyhow!("invalid timezone: {tz}"))
}

/// Calendar day of `at` as seen by a user in `tz`.
pub fn local_day(at: DateTime<Utc>, tz: Tz) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// Whole seconds from `start` to `end`, rounded down. Never negative.
pub fn whole_seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_seconds().max(0) as u64
}

/// Whether night tasks should be requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NightMode {
    /// Follow the local clock.
    #[default]
    Auto,
    Always,
    Never,
}

impl NightMode {
    pub fn is_night(&self, at: DateTime<Utc>, tz: Tz) -> bool {
        match self {
            NightMode::Always => true,
            NightMode::Never => false,
            NightMode::Auto => {
                let hour = at.with_timezone(&tz).hour();
                hour >= NIGHT_STARTS_AT_HOUR || hour < NIGHT_ENDS_AT_HOUR
            }
        }
    }
}
