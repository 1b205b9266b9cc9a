//! Client lookups that feed the sales desk UI and the shortlist prompt.

use crate::analytics::{Aggregator, ClientAnalytics};
use crate::domain::records::{
    CallLog, Client, ClientRows, Dataset, Position, Read, Stock, TradeExecution,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const TOP_POSITIONS_LIMIT: usize = 15;
pub const RECENT_TRADES_LIMIT: usize = 15;
pub const RECENT_CALLS_LIMIT: usize = 8;
pub const RECENT_READS_LIMIT: usize = 12;
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

// Wider look-back when mining signals for shortlist candidates.
const CANDIDATE_READS_LIMIT: usize = 20;
const CANDIDATE_CALLS_LIMIT: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldPosition {
    pub position_id: i64,
    pub stock_id: i64,
    pub ticker: String,
    pub company_name: String,
    pub sector: Option<String>,
    pub theme_tag: Option<String>,
    pub quantity: f64,
    pub market_value: Option<f64>,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentCall {
    #[serde(flatten)]
    pub call: CallLog,
    pub stock_ticker: Option<String>,
    pub stock_company_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentRead {
    pub event_id: i64,
    pub report_id: i64,
    pub report_title: String,
    pub report_type: Option<String>,
    pub report_sector: Option<String>,
    pub report_ticker: Option<String>,
    pub publish_timestamp: DateTime<Utc>,
    pub read_timestamp: DateTime<Utc>,
    pub days_diff: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientContext {
    pub client: Client,
    pub as_of: DateTime<Utc>,
    pub top_positions: Vec<HeldPosition>,
    pub recent_trades: Vec<TradeExecution>,
    pub recent_calls: Vec<RecentCall>,
    pub recent_reads: Vec<RecentRead>,
    pub avoid_tickers: Vec<String>,
    pub analytics: ClientAnalytics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMatch {
    #[serde(flatten)]
    pub client: Client,
    pub relevance_score: i64,
}

/// Everything the desk knows about one client at `now`. Activity after `now` is left out.
pub fn build_client_context(
    data: &Dataset,
    client_id: i64,
    now: DateTime<Utc>,
) -> Option<ClientContext> {
    let rows = data.client_rows(client_id)?;
    let analytics = Aggregator::new(data, now).client_analytics(client_id)?;
    let stocks = stock_index(data);

    let top_positions = top_positions(&rows, &stocks, TOP_POSITIONS_LIMIT);
    let recent_trades: Vec<TradeExecution> = recent_trades(&rows, now, RECENT_TRADES_LIMIT)
        .into_iter()
        .cloned()
        .collect();
    let avoid_tickers = avoid_tickers(&top_positions, &recent_trades);

    let recent_calls = recent_calls(&rows, now, RECENT_CALLS_LIMIT)
        .into_iter()
        .map(|call| {
            let stock = call.stock_id.and_then(|id| stocks.get(&id));
            RecentCall {
                call: call.clone(),
                stock_ticker: stock.map(|s| s.ticker.clone()),
                stock_company_name: stock.map(|s| s.company_name.clone()),
            }
        })
        .collect();

    let recent_reads = recent_reads(&rows, now, RECENT_READS_LIMIT)
        .into_iter()
        .map(|r| RecentRead {
            event_id: r.event.event_id,
            report_id: r.report.report_id,
            report_title: r.report.title.clone(),
            report_type: r.report.report_type.clone(),
            report_sector: r.report.sector.clone(),
            report_ticker: r.report.ticker.clone(),
            publish_timestamp: r.report.publish_timestamp,
            read_timestamp: r.event.read_timestamp,
            days_diff: r.days_diff(),
        })
        .collect();

    Some(ClientContext {
        client: rows.client.clone(),
        as_of: now,
        top_positions,
        recent_trades,
        recent_calls,
        recent_reads,
        avoid_tickers,
        analytics,
    })
}

/// Stocks worth pitching: names the client read about or discussed first, then the client's
/// main held sector or theme, then other sectors. Held and recently traded tickers are excluded.
pub fn candidate_universe(
    data: &Dataset,
    client_id: i64,
    now: DateTime<Utc>,
    max_candidates: usize,
) -> Option<Vec<Stock>> {
    let rows = data.client_rows(client_id)?;
    let stocks = stock_index(data);

    let held = top_positions(&rows, &stocks, TOP_POSITIONS_LIMIT);
    let traded: Vec<TradeExecution> = recent_trades(&rows, now, RECENT_TRADES_LIMIT)
        .into_iter()
        .cloned()
        .collect();
    let avoid: BTreeSet<String> = avoid_tickers(&held, &traded).into_iter().collect();

    let by_ticker: HashMap<&str, &Stock> =
        data.stocks.iter().map(|s| (s.ticker.as_str(), s)).collect();

    let mut signalled: Vec<&Stock> = Vec::new();
    for read in recent_reads(&rows, now, CANDIDATE_READS_LIMIT) {
        let stock = read
            .report
            .stock_id
            .and_then(|id| stocks.get(&id).copied())
            .or_else(|| {
                read.report
                    .ticker
                    .as_deref()
                    .and_then(|t| by_ticker.get(t.trim()).copied())
            });
        signalled.extend(stock);
    }
    for call in recent_calls(&rows, now, CANDIDATE_CALLS_LIMIT) {
        signalled.extend(call.stock_id.and_then(|id| stocks.get(&id).copied()));
    }

    let top_sector = heaviest(&held, |p| p.sector.as_deref());
    let top_theme = heaviest(&held, |p| p.theme_tag.as_deref());
    let (in_focus, others): (Vec<&Stock>, Vec<&Stock>) = data.stocks.iter().partition(|s| {
        (top_sector.is_some() && s.sector.as_deref().map(str::trim) == top_sector)
            || (top_theme.is_some() && s.theme_tag.as_deref().map(str::trim) == top_theme)
    });

    let mut seen = BTreeSet::<i64>::new();
    let out: Vec<Stock> = signalled
        .into_iter()
        .chain(in_focus)
        .chain(others)
        .filter(|s| !avoid.contains(s.ticker.as_str()))
        .filter(|s| seen.insert(s.stock_id))
        .take(max_candidates)
        .cloned()
        .collect();

    tracing::debug!(
        client_id,
        top_sector = top_sector.unwrap_or("none"),
        top_theme = top_theme.unwrap_or("none"),
        avoid = avoid.len(),
        candidates = out.len(),
        "built candidate universe"
    );
    Some(out)
}

/// Multi-term client search. Every term must hit some field; ranking favours contact and firm
/// name matches.
pub fn search_clients(clients: &[Client], q: &str, limit: usize) -> Vec<ClientMatch> {
    let q = q.trim().to_lowercase();
    let terms: Vec<&str> = q.split_whitespace().collect();
    if terms.is_empty() {
        return Vec::new();
    }

    let mut out: Vec<ClientMatch> = clients
        .iter()
        .filter_map(|client| {
            let fields = SearchFields::new(client);
            if !terms.iter().all(|t| fields.matches(t)) {
                return None;
            }
            Some(ClientMatch {
                client: client.clone(),
                relevance_score: terms.iter().map(|t| fields.score(t)).sum(),
            })
        })
        .collect();

    out.sort_by(|a, b| {
        b.relevance_score
            .cmp(&a.relevance_score)
            .then_with(|| a.client.firm_name.cmp(&b.client.firm_name))
            .then_with(|| {
                a.client
                    .primary_contact_name
                    .cmp(&b.client.primary_contact_name)
            })
    });
    out.truncate(limit);
    out
}

struct SearchFields {
    contact: String,
    client_name: String,
    firm: String,
    region: String,
    client_type: String,
}

impl SearchFields {
    fn new(c: &Client) -> Self {
        let lower = |s: &Option<String>| s.as_deref().unwrap_or_default().to_lowercase();
        Self {
            contact: lower(&c.primary_contact_name),
            client_name: lower(&c.client_name),
            firm: c.firm_name.to_lowercase(),
            region: lower(&c.region),
            client_type: lower(&c.client_type),
        }
    }

    fn matches(&self, term: &str) -> bool {
        [
            &self.contact,
            &self.client_name,
            &self.firm,
            &self.region,
            &self.client_type,
        ]
        .iter()
        .any(|f| f.contains(term))
    }

    fn score(&self, term: &str) -> i64 {
        let hit = |cond: bool, points: i64| if cond { points } else { 0 };
        hit(self.contact == term, 100)
            + hit(self.firm == term, 80)
            + hit(self.contact.starts_with(term), 50)
            + hit(self.firm.starts_with(term), 40)
            + hit(self.contact.contains(term), 10)
            + hit(self.firm.contains(term), 8)
            + hit(self.client_name.contains(term), 5)
    }
}

fn stock_index(data: &Dataset) -> HashMap<i64, &Stock> {
    data.stocks.iter().map(|s| (s.stock_id, s)).collect()
}

/// Latest-snapshot positions by weight then market value, largest first. Unknown weights sort
/// last; positions whose stock is missing are skipped.
fn top_positions(
    rows: &ClientRows<'_>,
    stocks: &HashMap<i64, &Stock>,
    limit: usize,
) -> Vec<HeldPosition> {
    let mut positions: Vec<&Position> = rows.latest_positions.clone();
    positions.sort_by(|a, b| {
        desc_nulls_last(a.weight, b.weight)
            .then_with(|| desc_nulls_last(a.market_value, b.market_value))
            .then_with(|| a.position_id.cmp(&b.position_id))
    });

    positions
        .into_iter()
        .filter_map(|p| {
            let stock = stocks.get(&p.stock_id)?;
            Some(HeldPosition {
                position_id: p.position_id,
                stock_id: p.stock_id,
                ticker: stock.ticker.clone(),
                company_name: stock.company_name.clone(),
                sector: stock.sector.clone(),
                theme_tag: stock.theme_tag.clone(),
                quantity: p.quantity,
                market_value: p.market_value,
                weight: p.weight,
            })
        })
        .take(limit)
        .collect()
}

fn desc_nulls_last(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn recent_trades<'a>(
    rows: &ClientRows<'a>,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<&'a TradeExecution> {
    let mut out: Vec<&TradeExecution> = rows
        .trades
        .iter()
        .copied()
        .filter(|t| t.trade_timestamp <= now)
        .collect();
    out.sort_by(|a, b| {
        b.trade_timestamp
            .cmp(&a.trade_timestamp)
            .then_with(|| b.trade_id.cmp(&a.trade_id))
    });
    out.truncate(limit);
    out
}

fn recent_calls<'a>(rows: &ClientRows<'a>, now: DateTime<Utc>, limit: usize) -> Vec<&'a CallLog> {
    let mut out: Vec<&CallLog> = rows
        .calls
        .iter()
        .copied()
        .filter(|c| c.call_timestamp <= now)
        .collect();
    out.sort_by(|a, b| {
        b.call_timestamp
            .cmp(&a.call_timestamp)
            .then_with(|| b.call_id.cmp(&a.call_id))
    });
    out.truncate(limit);
    out
}

fn recent_reads<'a>(rows: &ClientRows<'a>, now: DateTime<Utc>, limit: usize) -> Vec<Read<'a>> {
    let mut out: Vec<Read<'a>> = rows
        .reads
        .iter()
        .copied()
        .filter(|r| r.event.read_timestamp <= now)
        .collect();
    out.sort_by(|a, b| {
        b.event
            .read_timestamp
            .cmp(&a.event.read_timestamp)
            .then_with(|| b.event.event_id.cmp(&a.event.event_id))
    });
    out.truncate(limit);
    out
}

fn avoid_tickers(held: &[HeldPosition], traded: &[TradeExecution]) -> Vec<String> {
    let mut out = BTreeSet::new();
    for p in held {
        out.insert(p.ticker.trim().to_string());
    }
    for t in traded {
        if let Some(ticker) = t.ticker.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            out.insert(ticker.to_string());
        }
    }
    out.into_iter().collect()
}

/// Sector or theme carrying the most portfolio weight; ties go to the alphabetically first.
fn heaviest<'a>(
    held: &'a [HeldPosition],
    key: impl Fn(&'a HeldPosition) -> Option<&'a str>,
) -> Option<&'a str> {
    let mut weights: BTreeMap<&str, f64> = BTreeMap::new();
    for p in held {
        if let Some(k) = key(p).map(str::trim).filter(|k| !k.is_empty()) {
            *weights.entry(k).or_default() += p.weight.unwrap_or(0.0);
        }
    }
    let mut best: Option<(&str, f64)> = None;
    for (k, w) in weights {
        if best.map_or(true, |(_, b)| w > b) {
            best = Some((k, w));
        }
    }
    best.map(|(k, _)| k)
}
