use crate::analytics::decay::{days_ago, within};
use crate::analytics::policy::*;
use crate::domain::records::{Client, Position, TradeExecution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskCategory {
    Aggressive,
    Moderate,
    Conservative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRisk {
    pub investor_type_factor: f64,
    pub trading_factor: f64,
    pub position_factor: Option<f64>,
    pub composite_risk_score: Option<f64>,
    pub risk_category: Option<RiskCategory>,
}

/// Blends the investor-type prior, 180-day turnover and position sizing.
///
/// `latest_positions` are the positions of the client's latest snapshot. Without a weighted
/// position the score is left null rather than assuming a sizing.
pub fn compute(
    client: &Client,
    trades: &[&TradeExecution],
    latest_positions: &[&Position],
    now: DateTime<Utc>,
) -> CompositeRisk {
    let investor_type_factor = investor_type_factor(client.client_type.as_deref());

    let trades_180d = trades
        .iter()
        .filter(|t| within(days_ago(t.trade_timestamp, now), CONVICTION_WINDOW_DAYS))
        .count();
    let trading_factor = trading_factor(trades_180d);

    let max_weight = latest_positions
        .iter()
        .filter_map(|p| p.weight)
        .reduce(f64::max);
    let position_factor = max_weight.map(position_factor);

    let composite_risk_score = position_factor.map(|pf| {
        TYPE_WEIGHT * investor_type_factor + TRADING_WEIGHT * trading_factor + POSITION_WEIGHT * pf
    });

    CompositeRisk {
        investor_type_factor,
        trading_factor,
        position_factor,
        composite_risk_score,
        risk_category: composite_risk_score.map(risk_category),
    }
}

pub fn investor_type_factor(client_type: Option<&str>) -> f64 {
    let Some(t) = client_type else {
        return DEFAULT_INVESTOR_TYPE_FACTOR;
    };
    let t = t.to_lowercase();
    INVESTOR_TYPE_FACTORS
        .iter()
        .find(|(needle, _)| t.contains(*needle))
        .map_or(DEFAULT_INVESTOR_TYPE_FACTOR, |(_, f)| *f)
}

pub fn trading_factor(trades_180d: usize) -> f64 {
    TRADING_FACTORS
        .iter()
        .find(|(above, _)| trades_180d > *above)
        .map_or(DEFAULT_TRADING_FACTOR, |(_, f)| *f)
}

pub fn position_factor(max_weight: f64) -> f64 {
    POSITION_FACTORS
        .iter()
        .find(|(above, _)| max_weight > *above)
        .map_or(DEFAULT_POSITION_FACTOR, |(_, f)| *f)
}

pub fn risk_category(score: f64) -> RiskCategory {
    if score >= RISK_AGGRESSIVE {
        RiskCategory::Aggressive
    } else if score >= RISK_MODERATE {
        RiskCategory::Moderate
    } else {
        RiskCategory::Conservative
    }
}
