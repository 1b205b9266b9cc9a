use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

/// Resolves the evaluation instant for the analytics windows.
///
/// Accepts RFC 3339 (`2026-03-01T12:00:00Z`) or a bare date, which means midnight UTC.
/// Without an argument the caller's clock reading is used as-is.
pub fn resolve_now(now_arg: Option<&str>, now_utc: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    let Some(s) = now_arg.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(now_utc);
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid now (expected RFC 3339 or YYYY-MM-DD): {s}"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("invalid midnight for date")?;
    Ok(midnight.and_utc())
}
