//! Loads the raw `src_*` tables into a [`Dataset`].
//!
//! With a client scope only that client's rows (plus every stock, and the reports it read) are
//! fetched. Rows with an unparseable side are skipped with a warning; an unknown notional bucket
//! is kept as "no bucket".

use crate::domain::records::{
    CallLog, Client, Dataset, NotionalBucket, PortfolioSnapshot, Position, ReadershipEvent, Report,
    Side, Stock, TradeExecution,
};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;

pub async fn load_all(pool: &PgPool) -> anyhow::Result<Dataset> {
    load(pool, None).await
}

pub async fn load_for_client(pool: &PgPool, client_id: i64) -> anyhow::Result<Dataset> {
    load(pool, Some(client_id)).await
}

async fn load(pool: &PgPool, client_id: Option<i64>) -> anyhow::Result<Dataset> {
    let t0 = std::time::Instant::now();
    let data = Dataset {
        clients: load_clients(pool, client_id).await?,
        stocks: load_stocks(pool).await?,
        snapshots: load_snapshots(pool, client_id).await?,
        positions: load_positions(pool, client_id).await?,
        trades: load_trades(pool, client_id).await?,
        calls: load_calls(pool, client_id).await?,
        reports: load_reports(pool, client_id).await?,
        reads: load_reads(pool, client_id).await?,
    };

    tracing::debug!(
        client_id = ?client_id,
        clients = data.clients.len(),
        trades = data.trades.len(),
        calls = data.calls.len(),
        reads = data.reads.len(),
        elapsed_ms = t0.elapsed().as_millis(),
        "loaded dataset"
    );
    Ok(data)
}

type ClientRow = (
    i64,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

pub async fn load_clients(pool: &PgPool, client_id: Option<i64>) -> anyhow::Result<Vec<Client>> {
    let rows: Vec<ClientRow> = sqlx::query_as(
        "SELECT client_id, client_name, firm_name, client_type, region, primary_contact_name, primary_contact_role \
         FROM src_clients \
         WHERE ($1::BIGINT IS NULL OR client_id = $1) \
         ORDER BY client_id",
    )
    .persistent(false)
    .bind(client_id)
    .fetch_all(pool)
    .await
    .context("select src_clients failed")?;

    Ok(rows
        .into_iter()
        .map(
            |(client_id, client_name, firm_name, client_type, region, contact, role)| Client {
                client_id,
                client_name,
                firm_name,
                client_type,
                region,
                primary_contact_name: contact,
                primary_contact_role: role,
            },
        )
        .collect())
}

async fn load_stocks(pool: &PgPool) -> anyhow::Result<Vec<Stock>> {
    let rows: Vec<(
        i64,
        String,
        String,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
    )> = sqlx::query_as(
        "SELECT stock_id, ticker, company_name, sector, theme_tag, region, market_cap_bucket \
         FROM src_stocks ORDER BY stock_id",
    )
    .persistent(false)
    .fetch_all(pool)
    .await
    .context("select src_stocks failed")?;

    Ok(rows
        .into_iter()
        .map(
            |(stock_id, ticker, company_name, sector, theme_tag, region, market_cap_bucket)| Stock {
                stock_id,
                ticker,
                company_name,
                sector,
                theme_tag,
                region,
                market_cap_bucket,
            },
        )
        .collect())
}

async fn load_snapshots(
    pool: &PgPool,
    client_id: Option<i64>,
) -> anyhow::Result<Vec<PortfolioSnapshot>> {
    let rows: Vec<(i64, i64, NaiveDate, Option<f64>)> = sqlx::query_as(
        "SELECT snapshot_id, client_id, as_of_date, total_aum \
         FROM src_portfolio_snapshots \
         WHERE ($1::BIGINT IS NULL OR client_id = $1)",
    )
    .persistent(false)
    .bind(client_id)
    .fetch_all(pool)
    .await
    .context("select src_portfolio_snapshots failed")?;

    Ok(rows
        .into_iter()
        .map(
            |(snapshot_id, client_id, as_of_date, total_aum)| PortfolioSnapshot {
                snapshot_id,
                client_id,
                as_of_date,
                total_aum,
            },
        )
        .collect())
}

async fn load_positions(pool: &PgPool, client_id: Option<i64>) -> anyhow::Result<Vec<Position>> {
    let rows: Vec<(i64, i64, i64, f64, Option<f64>, Option<f64>)> = sqlx::query_as(
        "SELECT p.position_id, p.snapshot_id, p.stock_id, p.quantity, p.market_value, p.weight \
         FROM src_positions p \
         JOIN src_portfolio_snapshots s ON s.snapshot_id = p.snapshot_id \
         WHERE ($1::BIGINT IS NULL OR s.client_id = $1)",
    )
    .persistent(false)
    .bind(client_id)
    .fetch_all(pool)
    .await
    .context("select src_positions failed")?;

    Ok(rows
        .into_iter()
        .map(
            |(position_id, snapshot_id, stock_id, quantity, market_value, weight)| Position {
                position_id,
                snapshot_id,
                stock_id,
                quantity,
                market_value,
                weight,
            },
        )
        .collect())
}

type TradeRow = (
    i64,
    i64,
    Option<i64>,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    String,
    Option<String>,
);

async fn load_trades(
    pool: &PgPool,
    client_id: Option<i64>,
) -> anyhow::Result<Vec<TradeExecution>> {
    let rows: Vec<TradeRow> = sqlx::query_as(
        "SELECT trade_id, client_id, stock_id, ticker, sector, trade_timestamp, side, notional_bucket \
         FROM src_trade_executions \
         WHERE ($1::BIGINT IS NULL OR client_id = $1)",
    )
    .persistent(false)
    .bind(client_id)
    .fetch_all(pool)
    .await
    .context("select src_trade_executions failed")?;

    Ok(rows.into_iter().filter_map(trade_from_row).collect())
}

fn trade_from_row(row: TradeRow) -> Option<TradeExecution> {
    let (trade_id, client_id, stock_id, ticker, sector, trade_timestamp, side, bucket) = row;

    let side = match side.parse::<Side>() {
        Ok(side) => side,
        Err(err) => {
            tracing::warn!(trade_id, error = %err, "skipping trade with unknown side");
            return None;
        }
    };
    let notional_bucket = bucket.as_deref().and_then(|b| match b.parse::<NotionalBucket>() {
        Ok(bucket) => Some(bucket),
        Err(err) => {
            tracing::warn!(trade_id, error = %err, "treating unknown notional bucket as missing");
            None
        }
    });

    Some(TradeExecution {
        trade_id,
        client_id,
        stock_id,
        ticker,
        sector,
        trade_timestamp,
        side,
        notional_bucket,
    })
}

async fn load_calls(pool: &PgPool, client_id: Option<i64>) -> anyhow::Result<Vec<CallLog>> {
    let rows: Vec<(
        i64,
        i64,
        Option<i64>,
        DateTime<Utc>,
        Option<i32>,
        Option<String>,
        Option<String>,
    )> = sqlx::query_as(
        "SELECT call_id, client_id, stock_id, call_timestamp, duration_minutes, discussed_sector, notes_raw \
         FROM src_call_logs \
         WHERE ($1::BIGINT IS NULL OR client_id = $1)",
    )
    .persistent(false)
    .bind(client_id)
    .fetch_all(pool)
    .await
    .context("select src_call_logs failed")?;

    Ok(rows
        .into_iter()
        .map(
            |(call_id, client_id, stock_id, call_timestamp, minutes, discussed_sector, notes_raw)| {
                CallLog {
                    call_id,
                    client_id,
                    stock_id,
                    call_timestamp,
                    duration_minutes: minutes,
                    discussed_sector,
                    notes_raw,
                }
            },
        )
        .collect())
}

async fn load_reports(pool: &PgPool, client_id: Option<i64>) -> anyhow::Result<Vec<Report>> {
    let rows: Vec<(
        i64,
        Option<i64>,
        Option<String>,
        Option<String>,
        Option<String>,
        String,
        DateTime<Utc>,
    )> = sqlx::query_as(
        "SELECT report_id, stock_id, ticker, sector, report_type, title, publish_timestamp \
         FROM src_reports r \
         WHERE $1::BIGINT IS NULL \
            OR EXISTS (SELECT 1 FROM src_readership_events e WHERE e.report_id = r.report_id AND e.client_id = $1)",
    )
    .persistent(false)
    .bind(client_id)
    .fetch_all(pool)
    .await
    .context("select src_reports failed")?;

    Ok(rows
        .into_iter()
        .map(
            |(report_id, stock_id, ticker, sector, report_type, title, publish_timestamp)| Report {
                report_id,
                stock_id,
                ticker,
                sector,
                report_type,
                title,
                publish_timestamp,
            },
        )
        .collect())
}

async fn load_reads(
    pool: &PgPool,
    client_id: Option<i64>,
) -> anyhow::Result<Vec<ReadershipEvent>> {
    let rows: Vec<(i64, i64, i64, DateTime<Utc>)> = sqlx::query_as(
        "SELECT event_id, client_id, report_id, read_timestamp \
         FROM src_readership_events \
         WHERE ($1::BIGINT IS NULL OR client_id = $1)",
    )
    .persistent(false)
    .bind(client_id)
    .fetch_all(pool)
    .await
    .context("select src_readership_events failed")?;

    Ok(rows
        .into_iter()
        .map(|(event_id, client_id, report_id, read_timestamp)| ReadershipEvent {
            event_id,
            client_id,
            report_id,
            read_timestamp,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(side: &str, bucket: Option<&str>) -> TradeRow {
        (
            1,
            2,
            Some(3),
            Some("SAP".to_string()),
            None,
            Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap(),
            side.to_string(),
            bucket.map(str::to_string),
        )
    }

    #[test]
    fn trade_rows_parse_side_and_bucket() {
        let t = trade_from_row(row(" buy ", Some("Large"))).unwrap();
        assert_eq!(t.side, Side::Buy);
        assert_eq!(t.notional_bucket, Some(NotionalBucket::Large));
        assert_eq!(t.ticker.as_deref(), Some("SAP"));
    }

    #[test]
    fn unknown_side_drops_row() {
        assert!(trade_from_row(row("hold", Some("Large"))).is_none());
    }

    #[test]
    fn unknown_bucket_becomes_missing() {
        let t = trade_from_row(row("SELL", Some("Jumbo"))).unwrap();
        assert_eq!(t.side, Side::Sell);
        assert_eq!(t.notional_bucket, None);
    }
}
