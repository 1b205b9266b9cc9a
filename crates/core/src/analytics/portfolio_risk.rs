use crate::analytics::policy::*;
use crate::domain::records::{PortfolioSnapshot, Position};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Concentration {
    #[serde(rename = "Very Concentrated")]
    VeryConcentrated,
    Concentrated,
    Moderate,
    Diversified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRisk {
    pub snapshot_id: i64,
    pub as_of_date: NaiveDate,
    pub total_positions: usize,
    pub large_positions: usize,
    pub max_position_weight: Option<f64>,
    pub portfolio_volatility: Option<f64>,
    pub hhi_concentration: Option<f64>,
    pub effective_num_positions: Option<f64>,
    pub hhi_risk_level: Option<Concentration>,
    pub volatility_risk_level: Option<VolatilityLevel>,
    pub concentration_risk_level: Option<Concentration>,
}

/// Concentration of the positions in `snapshot`. `None` when the snapshot holds nothing.
pub fn compute(snapshot: &PortfolioSnapshot, positions: &[&Position]) -> Option<PortfolioRisk> {
    if positions.is_empty() {
        return None;
    }

    let weights: Vec<f64> = positions.iter().filter_map(|p| p.weight).collect();
    let weighted = !weights.is_empty();

    let hhi = weighted.then(|| herfindahl(&weights));
    let volatility = weighted.then(|| {
        weights
            .iter()
            .map(|w| w * FLAT_POSITION_VOLATILITY)
            .sum::<f64>()
    });
    let max_weight = weights.iter().copied().reduce(f64::max);

    Some(PortfolioRisk {
        snapshot_id: snapshot.snapshot_id,
        as_of_date: snapshot.as_of_date,
        total_positions: positions.len(),
        large_positions: weights.iter().filter(|w| **w > LARGE_POSITION_WEIGHT).count(),
        max_position_weight: max_weight,
        portfolio_volatility: volatility,
        hhi_concentration: hhi,
        effective_num_positions: hhi.map(effective_count),
        hhi_risk_level: hhi.map(hhi_level),
        volatility_risk_level: volatility.map(volatility_level),
        concentration_risk_level: max_weight.map(max_weight_level),
    })
}

/// Sum of squared shares.
pub fn herfindahl(shares: &[f64]) -> f64 {
    shares.iter().map(|s| s * s).sum()
}

/// 1/HHI, or 0 for an empty or zero-weight book.
pub fn effective_count(hhi: f64) -> f64 {
    if hhi > 0.0 {
        1.0 / hhi
    } else {
        0.0
    }
}

pub fn hhi_level(hhi: f64) -> Concentration {
    if hhi >= HHI_VERY_CONCENTRATED {
        Concentration::VeryConcentrated
    } else if hhi >= HHI_CONCENTRATED {
        Concentration::Concentrated
    } else if hhi >= HHI_MODERATE {
        Concentration::Moderate
    } else {
        Concentration::Diversified
    }
}

pub fn max_weight_level(max_weight: f64) -> Concentration {
    if max_weight >= MAX_WEIGHT_CONCENTRATED {
        Concentration::Concentrated
    } else if max_weight >= MAX_WEIGHT_MODERATE {
        Concentration::Moderate
    } else {
        Concentration::Diversified
    }
}

pub fn volatility_level(volatility: f64) -> VolatilityLevel {
    if volatility >= VOLATILITY_HIGH {
        VolatilityLevel::High
    } else if volatility >= VOLATILITY_MEDIUM {
        VolatilityLevel::Medium
    } else {
        VolatilityLevel::Low
    }
}
