use crate::analytics::decay::{days_ago, decay_weight, within};
use crate::analytics::policy::*;
use crate::domain::records::{CallLog, NotionalBucket, Side, TradeExecution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngagementTrend {
    Accelerating,
    #[serde(rename = "Cooling Off")]
    CoolingOff,
    Dormant,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementMomentum {
    pub calls_last_30d: usize,
    pub calls_prior_30d: usize,
    pub avg_call_duration_30d: Option<f64>,
    pub call_momentum: Option<f64>,
    pub trades_last_30d: usize,
    pub trades_prior_30d: usize,
    pub large_trades_30d: usize,
    pub trade_momentum: Option<f64>,
    pub recent_buy_ratio: Option<f64>,
    pub engagement_score_decayed: f64,
    pub engagement_trend: EngagementTrend,
    /// Illustrative scoring only; not a calibrated probability.
    pub trade_probability: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct WindowCounts {
    recent: usize,
    prior: usize,
}

impl WindowCounts {
    fn add(&mut self, days: f64) {
        if within(days, RECENT_WINDOW_DAYS) {
            self.recent += 1;
        } else if days > RECENT_WINDOW_DAYS && days <= PRIOR_WINDOW_END_DAYS {
            self.prior += 1;
        }
    }

    fn momentum(&self) -> Option<f64> {
        (self.prior > 0).then(|| self.recent as f64 / self.prior as f64)
    }
}

pub fn compute(
    calls: &[&CallLog],
    trades: &[&TradeExecution],
    now: DateTime<Utc>,
) -> EngagementMomentum {
    let mut call_counts = WindowCounts::default();
    let mut recent_minutes: Vec<i32> = Vec::new();
    let mut call_weight = 0.0;
    let mut call_minutes_weighted = 0.0;

    for call in calls {
        let d = days_ago(call.call_timestamp, now);
        call_counts.add(d);
        if within(d, RECENT_WINDOW_DAYS) {
            recent_minutes.extend(call.duration_minutes);
        }
        if within(d, DECAY_WINDOW_DAYS) {
            let w = decay_weight(d, ENGAGEMENT_HALF_LIFE_DAYS);
            call_weight += w;
            call_minutes_weighted += f64::from(call.duration_minutes.unwrap_or(0)) * w;
        }
    }

    let mut trade_counts = WindowCounts::default();
    let mut large_trades_30d = 0;
    let mut trade_weight = 0.0;
    let mut trade_size_weighted = 0.0;
    let mut buy_weight = 0.0;
    let mut sell_weight = 0.0;

    for trade in trades {
        let d = days_ago(trade.trade_timestamp, now);
        trade_counts.add(d);
        if within(d, RECENT_WINDOW_DAYS) && trade.notional_bucket == Some(NotionalBucket::Large) {
            large_trades_30d += 1;
        }
        if within(d, DECAY_WINDOW_DAYS) {
            let w = decay_weight(d, ENGAGEMENT_HALF_LIFE_DAYS);
            trade_weight += w;
            trade_size_weighted += w * size_weight(trade.notional_bucket);
            match trade.side {
                Side::Buy => buy_weight += w,
                Side::Sell => sell_weight += w,
            }
        }
    }

    let recent_buy_ratio = buy_ratio(buy_weight, sell_weight);

    EngagementMomentum {
        calls_last_30d: call_counts.recent,
        calls_prior_30d: call_counts.prior,
        avg_call_duration_30d: mean(&recent_minutes),
        call_momentum: call_counts.momentum(),
        trades_last_30d: trade_counts.recent,
        trades_prior_30d: trade_counts.prior,
        large_trades_30d,
        trade_momentum: trade_counts.momentum(),
        recent_buy_ratio,
        engagement_score_decayed: call_minutes_weighted * CALL_MINUTES_SCORE_WEIGHT
            + trade_size_weighted * TRADE_SCORE_WEIGHT,
        engagement_trend: classify_trend(
            call_counts.recent,
            call_counts.prior,
            trade_counts.recent,
            trade_counts.prior,
        ),
        trade_probability: trade_probability(trade_weight, call_weight, recent_buy_ratio),
    }
}

/// Trend from raw counts. A zero prior period never satisfies a ratio test.
pub fn classify_trend(
    calls_30d: usize,
    calls_prior: usize,
    trades_30d: usize,
    trades_prior: usize,
) -> EngagementTrend {
    if calls_30d == 0 && trades_30d == 0 {
        return EngagementTrend::Dormant;
    }

    let above =
        |cur: usize, prior: usize| prior > 0 && cur as f64 > prior as f64 * ACCELERATING_RATIO;
    let below =
        |cur: usize, prior: usize| prior > 0 && (cur as f64) < prior as f64 * COOLING_RATIO;

    if above(calls_30d, calls_prior) || above(trades_30d, trades_prior) {
        EngagementTrend::Accelerating
    } else if below(calls_30d, calls_prior) && below(trades_30d, trades_prior) {
        EngagementTrend::CoolingOff
    } else {
        EngagementTrend::Stable
    }
}

pub fn buy_ratio(buy_weight: f64, sell_weight: f64) -> Option<f64> {
    let total = buy_weight + sell_weight;
    (total > 0.0).then(|| buy_weight / total)
}

pub fn trade_probability(trade_weight: f64, call_weight: f64, buy_ratio: Option<f64>) -> f64 {
    if trade_weight <= 0.0 {
        return PROBABILITY_NO_TRADES;
    }

    let score = PROBABILITY_BASE
        + PROBABILITY_TRADE_WEIGHT * (trade_weight / PROBABILITY_TRADE_SATURATION).min(1.0)
        + PROBABILITY_CALL_WEIGHT * (call_weight / PROBABILITY_CALL_SATURATION).min(1.0)
        + PROBABILITY_BUY_RATIO_WEIGHT * buy_ratio.unwrap_or(0.0).min(1.0);
    score.min(PROBABILITY_CAP)
}

fn mean(values: &[i32]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum: f64 = values.iter().map(|v| f64::from(*v)).sum();
    Some(sum / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn call(id: i64, days: i64, minutes: Option<i32>) -> CallLog {
        CallLog {
            call_id: id,
            client_id: 1,
            stock_id: None,
            call_timestamp: now() - Duration::days(days),
            duration_minutes: minutes,
            discussed_sector: None,
            notes_raw: None,
        }
    }

    fn trade(id: i64, days: i64, side: Side, bucket: Option<NotionalBucket>) -> TradeExecution {
        TradeExecution {
            trade_id: id,
            client_id: 1,
            stock_id: None,
            ticker: Some("SAP".to_string()),
            sector: None,
            trade_timestamp: now() - Duration::days(days),
            side,
            notional_bucket: bucket,
        }
    }

    fn run(calls: &[CallLog], trades: &[TradeExecution]) -> EngagementMomentum {
        let calls: Vec<&CallLog> = calls.iter().collect();
        let trades: Vec<&TradeExecution> = trades.iter().collect();
        compute(&calls, &trades, now())
    }

    #[test]
    fn accelerating_on_call_surge_with_flat_trades() {
        assert_eq!(classify_trend(10, 2, 3, 3), EngagementTrend::Accelerating);
    }

    #[test]
    fn dormant_regardless_of_prior_period() {
        assert_eq!(classify_trend(0, 0, 0, 0), EngagementTrend::Dormant);
        assert_eq!(classify_trend(0, 10, 0, 4), EngagementTrend::Dormant);
    }

    #[test]
    fn zero_prior_skips_ratio_branches() {
        // 0 -> 5 calls is not "accelerating" against an empty prior period.
        assert_eq!(classify_trend(5, 0, 0, 0), EngagementTrend::Stable);
        // Cooling needs both series to have a prior period.
        assert_eq!(classify_trend(1, 10, 0, 0), EngagementTrend::Stable);
        assert_eq!(classify_trend(1, 10, 1, 4), EngagementTrend::CoolingOff);
        assert_eq!(classify_trend(3, 2, 2, 2), EngagementTrend::Stable);
    }

    #[test]
    fn counts_recent_and_prior_windows() {
        let calls = vec![
            call(1, 1, Some(20)),
            call(2, 29, Some(40)),
            call(3, 45, Some(10)),
            call(4, 75, Some(10)),
            // Future-dated rows are ignored.
            call(5, -3, Some(10)),
        ];
        let trades = vec![
            trade(1, 2, Side::Buy, Some(NotionalBucket::Large)),
            trade(2, 40, Side::Sell, Some(NotionalBucket::Small)),
            trade(3, 50, Side::Sell, None),
        ];
        let m = run(&calls, &trades);
        assert_eq!(m.calls_last_30d, 2);
        assert_eq!(m.calls_prior_30d, 1);
        assert_eq!(m.avg_call_duration_30d, Some(30.0));
        assert_eq!(m.call_momentum, Some(2.0));
        assert_eq!(m.trades_last_30d, 1);
        assert_eq!(m.trades_prior_30d, 2);
        assert_eq!(m.large_trades_30d, 1);
        assert_eq!(m.trade_momentum, Some(0.5));
        assert_eq!(m.engagement_trend, EngagementTrend::Accelerating);
    }

    fn call_at(id: i64, days: f64, minutes: i32) -> CallLog {
        CallLog {
            call_timestamp: now() - Duration::minutes((days * 24.0 * 60.0) as i64),
            ..call(id, 0, Some(minutes))
        }
    }

    #[test]
    fn window_edges_are_inclusive_at_the_upper_bound() {
        let calls = vec![
            call_at(1, 30.0, 0),
            call_at(2, 30.5, 0),
            call_at(3, 60.0, 0),
            call_at(4, 60.5, 0),
        ];
        let m = run(&calls, &[]);
        assert_eq!(m.calls_last_30d, 1);
        assert_eq!(m.calls_prior_30d, 2);

        let w = 1.0 / (1.0 + 90.0 / 14.0);
        let m = run(&[call_at(1, 90.0, 10)], &[]);
        assert!((m.engagement_score_decayed - 10.0 * w * 0.15).abs() < 1e-9);
        let m = run(&[call_at(1, 90.5, 10)], &[]);
        assert_eq!(m.engagement_score_decayed, 0.0);
    }

    #[test]
    fn decayed_score_matches_formula() {
        let calls = vec![call(1, 0, Some(60)), call(2, 14, Some(30))];
        let trades = vec![
            trade(1, 0, Side::Buy, Some(NotionalBucket::Large)),
            trade(2, 14, Side::Sell, Some(NotionalBucket::Medium)),
            // Outside the 90-day decay window.
            trade(3, 100, Side::Buy, Some(NotionalBucket::Large)),
        ];
        let m = run(&calls, &trades);
        let expected = (60.0 * 1.0 + 30.0 * 0.5) * 0.15 + (1.0 * 3.0 + 0.5 * 1.5) * 2.5;
        assert!((m.engagement_score_decayed - expected).abs() < 1e-9);

        let ratio = m.recent_buy_ratio.unwrap();
        assert!((ratio - 1.0 / 1.5).abs() < 1e-12);

        // trade_w = 1.5, call_w = 1.5
        let p = 0.1 + 0.3 * (1.5 / 10.0) + 0.3 * (1.5 / 5.0) + 0.2 * (1.0 / 1.5);
        assert!((m.trade_probability - p).abs() < 1e-12);
    }

    #[test]
    fn no_recent_trades_pins_probability() {
        let calls = vec![call(1, 3, Some(30))];
        let trades = vec![trade(1, 120, Side::Buy, None)];
        let m = run(&calls, &trades);
        assert_eq!(m.trade_probability, 0.05);
        assert_eq!(m.recent_buy_ratio, None);
    }

    #[test]
    fn probability_components_saturate() {
        let p = trade_probability(50.0, 50.0, Some(1.0));
        assert!((p - 0.9).abs() < 1e-12);
        assert!(p <= PROBABILITY_CAP);
        assert_eq!(p, trade_probability(500.0, 80.0, Some(1.0)));
    }

    #[test]
    fn empty_history_is_dormant_with_null_ratios() {
        let m = run(&[], &[]);
        assert_eq!(m.engagement_trend, EngagementTrend::Dormant);
        assert_eq!(m.call_momentum, None);
        assert_eq!(m.trade_momentum, None);
        assert_eq!(m.avg_call_duration_30d, None);
        assert_eq!(m.engagement_score_decayed, 0.0);
    }

    #[test]
    fn idempotent() {
        let calls = vec![call(1, 5, Some(12))];
        let trades = vec![trade(1, 6, Side::Sell, Some(NotionalBucket::Medium))];
        assert_eq!(run(&calls, &trades), run(&calls, &trades));
    }
}
