use anyhow::bail;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub client_id: i64,
    pub client_name: Option<String>,
    pub firm_name: String,
    pub client_type: Option<String>,
    pub region: Option<String>,
    pub primary_contact_name: Option<String>,
    pub primary_contact_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub stock_id: i64,
    pub ticker: String,
    pub company_name: String,
    pub sector: Option<String>,
    pub theme_tag: Option<String>,
    pub region: Option<String>,
    pub market_cap_bucket: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub snapshot_id: i64,
    pub client_id: i64,
    pub as_of_date: NaiveDate,
    pub total_aum: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: i64,
    pub snapshot_id: i64,
    pub stock_id: i64,
    pub quantity: f64,
    pub market_value: Option<f64>,
    /// Fraction of the snapshot, nominally in [0, 1].
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => bail!("unknown trade side: {other:?}"),
        }
    }
}

/// Ordinal size class standing in for a trade amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotionalBucket {
    Small,
    Medium,
    Large,
}

impl FromStr for NotionalBucket {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(NotionalBucket::Small),
            "medium" => Ok(NotionalBucket::Medium),
            "large" => Ok(NotionalBucket::Large),
            other => bail!("unknown notional bucket: {other:?}"),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("Buy"),
            Side::Sell => f.write_str("Sell"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeExecution {
    pub trade_id: i64,
    pub client_id: i64,
    pub stock_id: Option<i64>,
    pub ticker: Option<String>,
    pub sector: Option<String>,
    pub trade_timestamp: DateTime<Utc>,
    pub side: Side,
    pub notional_bucket: Option<NotionalBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLog {
    pub call_id: i64,
    pub client_id: i64,
    pub stock_id: Option<i64>,
    pub call_timestamp: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
    pub discussed_sector: Option<String>,
    pub notes_raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub report_id: i64,
    pub stock_id: Option<i64>,
    pub ticker: Option<String>,
    pub sector: Option<String>,
    pub report_type: Option<String>,
    pub title: String,
    pub publish_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadershipEvent {
    pub event_id: i64,
    pub client_id: i64,
    pub report_id: i64,
    pub read_timestamp: DateTime<Utc>,
}

/// A readership event joined with the report it refers to.
#[derive(Debug, Clone, Copy)]
pub struct Read<'a> {
    pub event: &'a ReadershipEvent,
    pub report: &'a Report,
}

impl Read<'_> {
    /// Whole days between publication and read, truncated toward zero.
    pub fn days_diff(&self) -> i64 {
        (self.event.read_timestamp - self.report.publish_timestamp).num_days()
    }
}

/// All raw tables, loaded once and never mutated by the analytics layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub clients: Vec<Client>,
    #[serde(default)]
    pub stocks: Vec<Stock>,
    #[serde(default)]
    pub snapshots: Vec<PortfolioSnapshot>,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub trades: Vec<TradeExecution>,
    #[serde(default)]
    pub calls: Vec<CallLog>,
    #[serde(default)]
    pub reports: Vec<Report>,
    #[serde(default)]
    pub reads: Vec<ReadershipEvent>,
}

/// Rows belonging to a single client, borrowed from a [`Dataset`].
#[derive(Debug, Clone)]
pub struct ClientRows<'a> {
    pub client: &'a Client,
    pub latest_snapshot: Option<&'a PortfolioSnapshot>,
    pub latest_positions: Vec<&'a Position>,
    pub trades: Vec<&'a TradeExecution>,
    pub calls: Vec<&'a CallLog>,
    pub reads: Vec<Read<'a>>,
}

impl Dataset {
    pub fn client(&self, client_id: i64) -> Option<&Client> {
        self.clients.iter().find(|c| c.client_id == client_id)
    }

    pub fn stock(&self, stock_id: i64) -> Option<&Stock> {
        self.stocks.iter().find(|s| s.stock_id == stock_id)
    }

    /// Latest snapshot = max as_of_date, then max snapshot_id.
    pub fn latest_snapshot(&self, client_id: i64) -> Option<&PortfolioSnapshot> {
        self.snapshots
            .iter()
            .filter(|s| s.client_id == client_id)
            .max_by_key(|s| (s.as_of_date, s.snapshot_id))
    }

    pub fn client_rows(&self, client_id: i64) -> Option<ClientRows<'_>> {
        let client = self.client(client_id)?;
        let latest_snapshot = self.latest_snapshot(client_id);
        let latest_positions = match latest_snapshot {
            Some(snap) => self
                .positions
                .iter()
                .filter(|p| p.snapshot_id == snap.snapshot_id)
                .collect(),
            None => Vec::new(),
        };

        let reports: HashMap<i64, &Report> =
            self.reports.iter().map(|r| (r.report_id, r)).collect();

        Some(ClientRows {
            client,
            latest_snapshot,
            latest_positions,
            trades: self
                .trades
                .iter()
                .filter(|t| t.client_id == client_id)
                .collect(),
            calls: self
                .calls
                .iter()
                .filter(|c| c.client_id == client_id)
                .collect(),
            reads: self
                .reads
                .iter()
                .filter(|e| e.client_id == client_id)
                .filter_map(|event| {
                    reports
                        .get(&event.report_id)
                        .map(|report| Read { event, report })
                })
                .collect(),
        })
    }

    /// Groups every table by client in a single pass. Rows for unknown clients are dropped.
    pub fn partition_by_client(&self) -> BTreeMap<i64, ClientRows<'_>> {
        let mut out: BTreeMap<i64, ClientRows<'_>> = self
            .clients
            .iter()
            .map(|client| {
                (
                    client.client_id,
                    ClientRows {
                        client,
                        latest_snapshot: None,
                        latest_positions: Vec::new(),
                        trades: Vec::new(),
                        calls: Vec::new(),
                        reads: Vec::new(),
                    },
                )
            })
            .collect();

        for snap in &self.snapshots {
            if let Some(rows) = out.get_mut(&snap.client_id) {
                let newer = rows.latest_snapshot.map_or(true, |cur| {
                    (snap.as_of_date, snap.snapshot_id) > (cur.as_of_date, cur.snapshot_id)
                });
                if newer {
                    rows.latest_snapshot = Some(snap);
                }
            }
        }

        let latest_by_snapshot: HashMap<i64, i64> = out
            .values()
            .filter_map(|rows| {
                rows.latest_snapshot
                    .map(|s| (s.snapshot_id, rows.client.client_id))
            })
            .collect();
        for pos in &self.positions {
            if let Some(client_id) = latest_by_snapshot.get(&pos.snapshot_id) {
                if let Some(rows) = out.get_mut(client_id) {
                    rows.latest_positions.push(pos);
                }
            }
        }

        for trade in &self.trades {
            if let Some(rows) = out.get_mut(&trade.client_id) {
                rows.trades.push(trade);
            }
        }
        for call in &self.calls {
            if let Some(rows) = out.get_mut(&call.client_id) {
                rows.calls.push(call);
            }
        }

        let reports: HashMap<i64, &Report> =
            self.reports.iter().map(|r| (r.report_id, r)).collect();
        for event in &self.reads {
            let Some(report) = reports.get(&event.report_id) else {
                continue;
            };
            if let Some(rows) = out.get_mut(&event.client_id) {
                rows.reads.push(Read { event, report });
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(snapshot_id: i64, client_id: i64, d: u32) -> PortfolioSnapshot {
        PortfolioSnapshot {
            snapshot_id,
            client_id,
            as_of_date: NaiveDate::from_ymd_opt(2026, 1, d).unwrap(),
            total_aum: None,
        }
    }

    fn position(position_id: i64, snapshot_id: i64, weight: f64) -> Position {
        Position {
            position_id,
            snapshot_id,
            stock_id: position_id,
            quantity: 1.0,
            market_value: None,
            weight: Some(weight),
        }
    }

    fn dataset() -> Dataset {
        Dataset {
            clients: vec![Client {
                client_id: 1,
                client_name: None,
                firm_name: "Acme Capital".to_string(),
                client_type: Some("Hedge Fund".to_string()),
                region: None,
                primary_contact_name: None,
                primary_contact_role: None,
            }],
            // Snapshot 7 has the newest date even though its id is lower.
            snapshots: vec![snapshot(9, 1, 10), snapshot(7, 1, 20), snapshot(8, 2, 25)],
            positions: vec![position(1, 9, 1.0), position(2, 7, 0.6), position(3, 7, 0.4)],
            reports: vec![Report {
                report_id: 5,
                stock_id: None,
                ticker: None,
                sector: Some("Tech".to_string()),
                report_type: None,
                title: "Note".to_string(),
                publish_timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
            }],
            reads: vec![
                ReadershipEvent {
                    event_id: 1,
                    client_id: 1,
                    report_id: 5,
                    read_timestamp: Utc.with_ymd_and_hms(2026, 1, 4, 11, 0, 0).unwrap(),
                },
                // Dangling report id is dropped.
                ReadershipEvent {
                    event_id: 2,
                    client_id: 1,
                    report_id: 99,
                    read_timestamp: Utc.with_ymd_and_hms(2026, 1, 4, 11, 0, 0).unwrap(),
                },
            ],
            ..Dataset::default()
        }
    }

    #[test]
    fn latest_snapshot_uses_as_of_date() {
        let data = dataset();
        assert_eq!(data.latest_snapshot(1).unwrap().snapshot_id, 7);
        let rows = data.client_rows(1).unwrap();
        assert_eq!(rows.latest_positions.len(), 2);
    }

    #[test]
    fn partition_matches_single_client_lookup() {
        let data = dataset();
        let parts = data.partition_by_client();
        assert_eq!(parts.len(), 1);
        let rows = &parts[&1];
        let single = data.client_rows(1).unwrap();
        assert_eq!(rows.latest_snapshot, single.latest_snapshot);
        assert_eq!(rows.latest_positions, single.latest_positions);
        assert_eq!(rows.reads.len(), 1);
        assert_eq!(single.reads.len(), 1);
    }

    #[test]
    fn days_diff_truncates() {
        let data = dataset();
        let rows = data.client_rows(1).unwrap();
        // 2 days 23 hours.
        assert_eq!(rows.reads[0].days_diff(), 2);
    }

    #[test]
    fn unknown_client_has_no_rows() {
        assert!(dataset().client_rows(42).is_none());
    }

    #[test]
    fn parses_side_and_bucket_case_insensitively() {
        assert_eq!("BUY".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!(" sell ".parse::<Side>().unwrap(), Side::Sell);
        assert!("hold".parse::<Side>().is_err());
        assert_eq!("Large".parse::<NotionalBucket>().unwrap(), NotionalBucket::Large);
        assert!("Jumbo".parse::<NotionalBucket>().is_err());
    }
}
