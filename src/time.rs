use std::time::Duration;

use chrono::Utc;
use serde::Deserialize as _;

pub type Timestamp = chrono::DateTime<Utc>;

pub fn now() -> Timestamp {
    Utc::now()
}

/// A timer that first fires one full `period` from now, then every `period`.
///
/// Missed ticks are skipped, so a slow tick never causes a burst of catch-up ticks.
pub fn ticker(period: Duration) -> tokio::time::Interval {
    let start = tokio::time::Instant::now() + period;

    let mut timer = tokio::time::interval_at(start, period);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    timer
}

/// Human readable uptime, rounded down to whole seconds (`1h 2m 3s`).
pub fn uptime(elapsed: Duration) -> String {
    let elapsed = Duration::from_secs(elapsed.as_secs());
    humantime::format_duration(elapsed).to_string()
}

/// Deserialize a duration written like `90s`, `15m` or `1h 30m`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}
