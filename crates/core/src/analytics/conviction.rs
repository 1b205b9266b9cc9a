use crate::analytics::decay::{days_ago, decay_weight, within};
use crate::analytics::policy::*;
use crate::analytics::portfolio_risk::{effective_count, herfindahl};
use crate::domain::records::{Side, TradeExecution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvictionLevel {
    #[serde(rename = "Very High")]
    VeryHigh,
    High,
    Moderate,
    Diversified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

/// Per-ticker trade aggregate over the conviction window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerFocus {
    pub ticker: String,
    pub stock_id: Option<i64>,
    pub trade_count: usize,
    pub net_direction: i64,
    pub total_notional: f64,
    pub decayed_notional: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conviction {
    pub top_conviction_stock: String,
    pub top_conviction_stock_id: Option<i64>,
    pub trade_count: usize,
    pub net_direction: i64,
    pub trade_concentration: Option<f64>,
    pub conviction_score: f64,
    pub trade_hhi: Option<f64>,
    pub effective_stocks_traded: Option<f64>,
    pub conviction_level: Option<ConvictionLevel>,
    pub sentiment_signal: Sentiment,
}

/// Aggregates ticker-bearing trades inside the conviction window, in ticker order.
pub fn ticker_focus(trades: &[&TradeExecution], now: DateTime<Utc>) -> Vec<TickerFocus> {
    let mut by_ticker: BTreeMap<&str, TickerFocus> = BTreeMap::new();

    for trade in trades {
        let Some(ticker) = trade.ticker.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
            continue;
        };
        let d = days_ago(trade.trade_timestamp, now);
        if !within(d, CONVICTION_WINDOW_DAYS) {
            continue;
        }

        let focus = by_ticker.entry(ticker).or_insert_with(|| TickerFocus {
            ticker: ticker.to_string(),
            stock_id: None,
            trade_count: 0,
            net_direction: 0,
            total_notional: 0.0,
            decayed_notional: 0.0,
        });

        let notional = notional_proxy(trade.notional_bucket);
        focus.stock_id = focus.stock_id.or(trade.stock_id);
        focus.trade_count += 1;
        focus.net_direction += match trade.side {
            Side::Buy => 1,
            Side::Sell => -1,
        };
        focus.total_notional += notional;
        focus.decayed_notional += notional * decay_weight(d, CONVICTION_HALF_LIFE_DAYS);
    }

    by_ticker.into_values().collect()
}

pub fn compute(trades: &[&TradeExecution], now: DateTime<Utc>) -> Option<Conviction> {
    let focus = ticker_focus(trades, now);

    // Strict comparison over ticker-ordered rows keeps the lexicographically first ticker on ties.
    let mut top: Option<&TickerFocus> = None;
    for f in &focus {
        if top.map_or(true, |t| f.decayed_notional > t.decayed_notional) {
            top = Some(f);
        }
    }
    let top = top?;

    let client_notional: f64 = focus.iter().map(|f| f.total_notional).sum();
    let shares: Option<Vec<f64>> = (client_notional > 0.0).then(|| {
        focus
            .iter()
            .map(|f| f.total_notional / client_notional)
            .collect()
    });
    let trade_hhi = shares.as_deref().map(herfindahl);

    Some(Conviction {
        top_conviction_stock: top.ticker.clone(),
        top_conviction_stock_id: top.stock_id,
        trade_count: top.trade_count,
        net_direction: top.net_direction,
        trade_concentration: (client_notional > 0.0).then(|| top.total_notional / client_notional),
        conviction_score: top.decayed_notional / CONVICTION_SCORE_SCALE,
        trade_hhi,
        effective_stocks_traded: trade_hhi.filter(|h| *h > 0.0).map(effective_count),
        conviction_level: trade_hhi.map(conviction_level),
        sentiment_signal: sentiment(top.net_direction),
    })
}

pub fn conviction_level(trade_hhi: f64) -> ConvictionLevel {
    if trade_hhi >= CONVICTION_VERY_HIGH {
        ConvictionLevel::VeryHigh
    } else if trade_hhi >= CONVICTION_HIGH {
        ConvictionLevel::High
    } else if trade_hhi >= CONVICTION_MODERATE {
        ConvictionLevel::Moderate
    } else {
        ConvictionLevel::Diversified
    }
}

pub fn sentiment(net_direction: i64) -> Sentiment {
    match net_direction {
        n if n > 0 => Sentiment::Bullish,
        n if n < 0 => Sentiment::Bearish,
        _ => Sentiment::Neutral,
    }
}
