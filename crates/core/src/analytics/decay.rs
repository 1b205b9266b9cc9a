use chrono::{DateTime, Utc};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Fractional days from `at` until `now`. Negative when `at` is in the future.
pub fn days_ago(at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - at).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY
}

/// Hyperbolic decay: 1.0 at d = 0 and 0.5 at d = `half_life_days`.
pub fn decay_weight(days: f64, half_life_days: f64) -> f64 {
    1.0 / (1.0 + days / half_life_days)
}

/// Whether an event `days` old falls inside the trailing window `[0, window_days]`.
pub fn within(days: f64, window_days: f64) -> bool {
    (0.0..=window_days).contains(&days)
}
