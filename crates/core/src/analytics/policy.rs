//! Business-policy constants for the analytics layer.
//!
//! None of these are fitted or calibrated. They reproduce the desk's heuristics and can be tuned
//! here without touching the aggregation code.

use crate::domain::records::NotionalBucket;

// Decay half-lives (days). Engagement reacts faster than conviction.
pub const ENGAGEMENT_HALF_LIFE_DAYS: f64 = 14.0;
pub const CONVICTION_HALF_LIFE_DAYS: f64 = 30.0;

// Windows (days).
pub const DECAY_WINDOW_DAYS: f64 = 90.0;
pub const RECENT_WINDOW_DAYS: f64 = 30.0;
pub const PRIOR_WINDOW_END_DAYS: f64 = 60.0;
pub const CONVICTION_WINDOW_DAYS: f64 = 180.0;

// Portfolio risk.
pub const FLAT_POSITION_VOLATILITY: f64 = 0.25;
pub const LARGE_POSITION_WEIGHT: f64 = 0.10;
pub const HHI_VERY_CONCENTRATED: f64 = 0.25;
pub const HHI_CONCENTRATED: f64 = 0.15;
pub const HHI_MODERATE: f64 = 0.10;
pub const MAX_WEIGHT_CONCENTRATED: f64 = 0.20;
pub const MAX_WEIGHT_MODERATE: f64 = 0.10;
pub const VOLATILITY_HIGH: f64 = 0.25;
pub const VOLATILITY_MEDIUM: f64 = 0.15;

// Engagement.
pub const CALL_MINUTES_SCORE_WEIGHT: f64 = 0.15;
pub const TRADE_SCORE_WEIGHT: f64 = 2.5;
pub const ACCELERATING_RATIO: f64 = 1.5;
pub const COOLING_RATIO: f64 = 0.5;
pub const PROBABILITY_TRADE_SATURATION: f64 = 10.0;
pub const PROBABILITY_CALL_SATURATION: f64 = 5.0;
pub const PROBABILITY_TRADE_WEIGHT: f64 = 0.3;
pub const PROBABILITY_CALL_WEIGHT: f64 = 0.3;
pub const PROBABILITY_BUY_RATIO_WEIGHT: f64 = 0.2;
pub const PROBABILITY_BASE: f64 = 0.1;
pub const PROBABILITY_CAP: f64 = 0.95;
pub const PROBABILITY_NO_TRADES: f64 = 0.05;

// Conviction.
pub const CONVICTION_SCORE_SCALE: f64 = 10_000.0;
pub const CONVICTION_VERY_HIGH: f64 = 0.25;
pub const CONVICTION_HIGH: f64 = 0.15;
pub const CONVICTION_MODERATE: f64 = 0.08;

// Composite risk.
pub const TYPE_WEIGHT: f64 = 0.40;
pub const TRADING_WEIGHT: f64 = 0.35;
pub const POSITION_WEIGHT: f64 = 0.25;
pub const RISK_AGGRESSIVE: f64 = 0.60;
pub const RISK_MODERATE: f64 = 0.42;

/// Substring (lowercase) of the client type, and its prior. First match wins.
pub const INVESTOR_TYPE_FACTORS: &[(&str, f64)] = &[
    ("hedge", 0.85),
    ("family office", 0.65),
    ("asset manager", 0.55),
    ("insurance", 0.35),
    ("pension", 0.30),
];
pub const DEFAULT_INVESTOR_TYPE_FACTOR: f64 = 0.50;

/// (exclusive lower bound on 180-day trade count, factor), checked in order.
pub const TRADING_FACTORS: &[(usize, f64)] = &[(50, 0.75), (20, 0.55), (5, 0.40)];
pub const DEFAULT_TRADING_FACTOR: f64 = 0.25;

/// (exclusive lower bound on max position weight, factor), checked in order.
pub const POSITION_FACTORS: &[(f64, f64)] = &[(0.15, 0.70), (0.08, 0.50)];
pub const DEFAULT_POSITION_FACTOR: f64 = 0.35;

// Readership.
pub const SAME_DAY_READ_DAYS: i64 = 1;
pub const LATE_READ_DAYS: i64 = 7;
pub const READ_COUNT_SCORE_WEIGHT: f64 = 0.3;
pub const READ_VELOCITY_SCORE_WEIGHT: f64 = 50.0;
pub const READ_BREADTH_SCORE_WEIGHT: f64 = 2.0;

/// Multiplier applied to decayed trade weight in the engagement score.
pub fn size_weight(bucket: Option<NotionalBucket>) -> f64 {
    match bucket {
        Some(NotionalBucket::Large) => 3.0,
        Some(NotionalBucket::Medium) => 1.5,
        Some(NotionalBucket::Small) | None => 1.0,
    }
}

/// Fixed dollar proxy for a notional bucket. A trade without a bucket carries no amount.
pub fn notional_proxy(bucket: Option<NotionalBucket>) -> f64 {
    match bucket {
        Some(NotionalBucket::Large) => 500_000.0,
        Some(NotionalBucket::Medium) => 100_000.0,
        Some(NotionalBucket::Small) => 25_000.0,
        None => 0.0,
    }
}
