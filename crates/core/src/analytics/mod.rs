//! Per-client analytics derived from raw event tables.
//!
//! Every metric is a pure function of the loaded rows and an explicit `now`. Lookups return
//! `None` when the client (or the rows a metric needs) is missing; callers render that as
//! "unknown" and never substitute a value.

pub mod composite_risk;
pub mod conviction;
pub mod decay;
pub mod engagement;
pub mod policy;
pub mod portfolio_risk;
pub mod readership;

use crate::domain::records::{ClientRows, Dataset};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use composite_risk::CompositeRisk;
pub use conviction::Conviction;
pub use engagement::{EngagementMomentum, EngagementTrend};
pub use portfolio_risk::PortfolioRisk;
pub use readership::ReadershipIntelligence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionSignal {
    #[serde(rename = "Hot Lead - High Activity")]
    HotLead,
    #[serde(rename = "Re-engage - Activity Declining")]
    ReEngage,
    #[serde(rename = "Wake Up Call Needed")]
    WakeUpCall,
    #[serde(rename = "Normal Engagement")]
    Normal,
}

impl From<EngagementTrend> for ActionSignal {
    fn from(trend: EngagementTrend) -> Self {
        match trend {
            EngagementTrend::Accelerating => ActionSignal::HotLead,
            EngagementTrend::CoolingOff => ActionSignal::ReEngage,
            EngagementTrend::Dormant => ActionSignal::WakeUpCall,
            EngagementTrend::Stable => ActionSignal::Normal,
        }
    }
}

/// Every metric for one client. Each field degrades to `None` independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientAnalytics {
    pub client_id: i64,
    pub as_of: DateTime<Utc>,
    pub portfolio_risk: Option<PortfolioRisk>,
    pub engagement_momentum: Option<EngagementMomentum>,
    pub conviction: Option<Conviction>,
    pub composite_risk: Option<CompositeRisk>,
    pub readership_intelligence: Option<ReadershipIntelligence>,
    pub action_signal: Option<ActionSignal>,
}

/// Named per-client lookups over a loaded [`Dataset`] at a fixed `now`.
#[derive(Debug, Clone, Copy)]
pub struct Aggregator<'a> {
    data: &'a Dataset,
    now: DateTime<Utc>,
}

impl<'a> Aggregator<'a> {
    pub fn new(data: &'a Dataset, now: DateTime<Utc>) -> Self {
        Self { data, now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn portfolio_risk(&self, client_id: i64) -> Option<PortfolioRisk> {
        portfolio_risk_for(&self.data.client_rows(client_id)?)
    }

    pub fn engagement_momentum(&self, client_id: i64) -> Option<EngagementMomentum> {
        let rows = self.data.client_rows(client_id)?;
        Some(engagement::compute(&rows.calls, &rows.trades, self.now))
    }

    pub fn conviction(&self, client_id: i64) -> Option<Conviction> {
        let rows = self.data.client_rows(client_id)?;
        conviction::compute(&rows.trades, self.now)
    }

    pub fn composite_risk(&self, client_id: i64) -> Option<CompositeRisk> {
        let rows = self.data.client_rows(client_id)?;
        Some(composite_risk::compute(
            rows.client,
            &rows.trades,
            &rows.latest_positions,
            self.now,
        ))
    }

    pub fn readership_intelligence(&self, client_id: i64) -> Option<ReadershipIntelligence> {
        readership::compute(&self.data.client_rows(client_id)?.reads, self.now)
    }

    pub fn client_analytics(&self, client_id: i64) -> Option<ClientAnalytics> {
        let rows = self.data.client_rows(client_id)?;
        Some(evaluate(&rows, self.now))
    }

    /// All clients, evaluated in parallel, ordered by client id.
    pub fn evaluate_all(&self) -> Vec<ClientAnalytics> {
        let partitions = self.data.partition_by_client();
        let rows: Vec<&ClientRows<'_>> = partitions.values().collect();
        let now = self.now;
        let out: Vec<ClientAnalytics> = rows.par_iter().map(|r| evaluate(r, now)).collect();
        tracing::debug!(clients = out.len(), %now, "evaluated client analytics");
        out
    }
}

fn portfolio_risk_for(rows: &ClientRows<'_>) -> Option<PortfolioRisk> {
    portfolio_risk::compute(rows.latest_snapshot?, &rows.latest_positions)
}

fn evaluate(rows: &ClientRows<'_>, now: DateTime<Utc>) -> ClientAnalytics {
    let engagement = engagement::compute(&rows.calls, &rows.trades, now);
    ClientAnalytics {
        client_id: rows.client.client_id,
        as_of: now,
        portfolio_risk: portfolio_risk_for(rows),
        action_signal: Some(engagement.engagement_trend.into()),
        engagement_momentum: Some(engagement),
        conviction: conviction::compute(&rows.trades, now),
        composite_risk: Some(composite_risk::compute(
            rows.client,
            &rows.trades,
            &rows.latest_positions,
            now,
        )),
        readership_intelligence: readership::compute(&rows.reads, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::*;
    use chrono::{Duration, NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn client(client_id: i64, client_type: &str) -> Client {
        Client {
            client_id,
            client_name: None,
            firm_name: format!("Firm {client_id}"),
            client_type: Some(client_type.to_string()),
            region: None,
            primary_contact_name: None,
            primary_contact_role: None,
        }
    }

    fn trade(trade_id: i64, client_id: i64, ticker: &str, days: i64) -> TradeExecution {
        TradeExecution {
            trade_id,
            client_id,
            stock_id: None,
            ticker: Some(ticker.to_string()),
            sector: None,
            trade_timestamp: now() - Duration::days(days),
            side: Side::Buy,
            notional_bucket: Some(NotionalBucket::Large),
        }
    }

    fn dataset() -> Dataset {
        Dataset {
            clients: vec![client(1, "Hedge Fund"), client(2, "Pension Fund")],
            snapshots: vec![PortfolioSnapshot {
                snapshot_id: 10,
                client_id: 1,
                as_of_date: NaiveDate::from_ymd_opt(2026, 2, 27).unwrap(),
                total_aum: None,
            }],
            positions: vec![
                Position {
                    position_id: 1,
                    snapshot_id: 10,
                    stock_id: 1,
                    quantity: 1.0,
                    market_value: None,
                    weight: Some(0.7),
                },
                Position {
                    position_id: 2,
                    snapshot_id: 10,
                    stock_id: 2,
                    quantity: 1.0,
                    market_value: None,
                    weight: Some(0.3),
                },
            ],
            trades: vec![trade(1, 1, "SAP", 3), trade(2, 1, "SAP", 5), trade(3, 1, "BAS", 40)],
            ..Dataset::default()
        }
    }

    #[test]
    fn lookups_for_unknown_client_are_absent() {
        let data = dataset();
        let agg = Aggregator::new(&data, now());
        assert!(agg.portfolio_risk(99).is_none());
        assert!(agg.engagement_momentum(99).is_none());
        assert!(agg.conviction(99).is_none());
        assert!(agg.composite_risk(99).is_none());
        assert!(agg.client_analytics(99).is_none());
    }

    #[test]
    fn client_without_activity_degrades_per_metric() {
        let data = dataset();
        let a = Aggregator::new(&data, now()).client_analytics(2).unwrap();
        assert!(a.portfolio_risk.is_none());
        assert!(a.conviction.is_none());
        assert!(a.readership_intelligence.is_none());
        let e = a.engagement_momentum.unwrap();
        assert_eq!(e.engagement_trend, EngagementTrend::Dormant);
        assert_eq!(a.action_signal, Some(ActionSignal::WakeUpCall));
        let c = a.composite_risk.unwrap();
        assert_eq!(c.investor_type_factor, 0.30);
        assert_eq!(c.composite_risk_score, None);
    }

    #[test]
    fn bundle_matches_individual_lookups() {
        let data = dataset();
        let agg = Aggregator::new(&data, now());
        let a = agg.client_analytics(1).unwrap();
        assert_eq!(a.portfolio_risk, agg.portfolio_risk(1));
        assert_eq!(a.engagement_momentum, agg.engagement_momentum(1));
        assert_eq!(a.conviction, agg.conviction(1));
        assert_eq!(a.composite_risk, agg.composite_risk(1));
        assert_eq!(a.conviction.unwrap().top_conviction_stock, "SAP");
    }

    #[test]
    fn parallel_batch_equals_sequential_lookups() {
        let data = dataset();
        let agg = Aggregator::new(&data, now());
        let all = agg.evaluate_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].client_id, 1);
        assert_eq!(all[1].client_id, 2);
        for a in &all {
            assert_eq!(Some(a), agg.client_analytics(a.client_id).as_ref());
        }
        // Same input, same output.
        assert_eq!(all, agg.evaluate_all());
    }

    #[test]
    fn now_shifts_windows() {
        let data = dataset();
        let later = now() + Duration::days(200);
        let e = Aggregator::new(&data, later).engagement_momentum(1).unwrap();
        assert_eq!(e.engagement_trend, EngagementTrend::Dormant);
        assert!(Aggregator::new(&data, later).conviction(1).is_none());
    }

    #[test]
    fn readership_ignores_reads_after_now() {
        let mut data = dataset();
        data.reports.push(Report {
            report_id: 7,
            stock_id: None,
            ticker: None,
            sector: Some("Tech".to_string()),
            report_type: None,
            title: "Outlook".to_string(),
            publish_timestamp: now() - Duration::days(1),
        });
        data.reads.push(ReadershipEvent {
            event_id: 1,
            client_id: 1,
            report_id: 7,
            read_timestamp: now() + Duration::days(10),
        });

        let agg = Aggregator::new(&data, now());
        assert!(agg.readership_intelligence(1).is_none());
        assert!(agg.client_analytics(1).unwrap().readership_intelligence.is_none());

        let later = Aggregator::new(&data, now() + Duration::days(11));
        assert_eq!(later.readership_intelligence(1).unwrap().total_reads, 1);
    }
}
