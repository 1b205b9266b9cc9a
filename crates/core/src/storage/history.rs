use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationType {
    Shortlist,
    Story,
}

impl GenerationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationType::Shortlist => "shortlist",
            GenerationType::Story => "story",
        }
    }
}

/// Who asked for what; shared by the success and failure rows.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub client_id: i64,
    pub generation_type: GenerationType,
    pub provider: &'a str,
    pub model: &'a str,
    /// Story runs only.
    pub ticker: Option<&'a str>,
    pub mode: Option<&'a str>,
    pub instruction: &'a str,
    pub prompt: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: Uuid,
    pub client_id: i64,
    pub generation_type: String,
    pub provider: String,
    pub model_used: String,
    pub ticker: Option<String>,
    pub mode: Option<String>,
    pub status: String,
    pub instruction: Option<String>,
    pub response: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

pub async fn persist_success<T: Serialize>(
    pool: &sqlx::PgPool,
    req: &GenerationRequest<'_>,
    output: &T,
    created_at: DateTime<Utc>,
) -> anyhow::Result<Uuid> {
    let response = serde_json::to_value(output)
        .with_context(|| format!("serialize {} output failed", req.generation_type.as_str()))?;
    insert(pool, req, "success", Some(response), None, created_at).await
}

pub async fn persist_failure(
    pool: &sqlx::PgPool,
    req: &GenerationRequest<'_>,
    error: &str,
    raw_llm_response: Option<serde_json::Value>,
) -> anyhow::Result<Uuid> {
    insert(pool, req, "error", raw_llm_response, Some(error), Utc::now()).await
}

async fn insert(
    pool: &sqlx::PgPool,
    req: &GenerationRequest<'_>,
    status: &str,
    response: Option<serde_json::Value>,
    error: Option<&str>,
    created_at: DateTime<Utc>,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO ai_generation_history \
         (id, client_id, generation_type, provider, model_used, ticker, mode, status, \
          instruction, prompt_text, response, error, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .persistent(false)
    .bind(id)
    .bind(req.client_id)
    .bind(req.generation_type.as_str())
    .bind(req.provider)
    .bind(req.model)
    .bind(req.ticker)
    .bind(req.mode)
    .bind(status)
    .bind(req.instruction)
    .bind(req.prompt)
    .bind(response)
    .bind(error)
    .bind(created_at)
    .execute(pool)
    .await
    .context("insert ai_generation_history failed")?;

    Ok(id)
}

type HistoryRow = (
    Uuid,
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<serde_json::Value>,
    Option<String>,
    DateTime<Utc>,
    String,
);

/// Newest first.
pub async fn fetch_history(
    pool: &sqlx::PgPool,
    client_id: i64,
    limit: i64,
) -> anyhow::Result<Vec<GenerationRecord>> {
    let rows: Vec<HistoryRow> = sqlx::query_as(
        "SELECT id, client_id, generation_type, provider, model_used, ticker, mode, status, \
                instruction, response, error, created_at, created_by \
         FROM ai_generation_history \
         WHERE client_id = $1 \
         ORDER BY created_at DESC, id \
         LIMIT $2",
    )
    .persistent(false)
    .bind(client_id)
    .bind(limit.max(0))
    .fetch_all(pool)
    .await
    .context("select ai_generation_history failed")?;

    Ok(rows.into_iter().map(record_from_row).collect())
}

fn record_from_row(row: HistoryRow) -> GenerationRecord {
    let (
        id,
        client_id,
        generation_type,
        provider,
        model_used,
        ticker,
        mode,
        status,
        instruction,
        response,
        error,
        created_at,
        created_by,
    ) = row;
    GenerationRecord {
        id,
        client_id,
        generation_type,
        provider,
        model_used,
        ticker,
        mode,
        status,
        instruction,
        response,
        error,
        created_at,
        created_by,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn generation_types_match_the_table_check() {
        assert_eq!(GenerationType::Shortlist.as_str(), "shortlist");
        assert_eq!(GenerationType::Story.as_str(), "story");
        assert_eq!(serde_json::to_value(GenerationType::Story).unwrap(), "story");
    }

    #[test]
    fn story_rows_keep_ticker_and_mode() {
        let created_at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let id = Uuid::new_v4();
        let r = record_from_row((
            id,
            4,
            "story".to_string(),
            "anthropic".to_string(),
            "m".to_string(),
            Some("SAP".to_string()),
            Some("BULLETS".to_string()),
            "success".to_string(),
            None,
            Some(serde_json::json!({"text": "- hook"})),
            None,
            created_at,
            "system".to_string(),
        ));
        assert_eq!(r.id, id);
        assert_eq!(r.ticker.as_deref(), Some("SAP"));
        assert_eq!(r.mode.as_deref(), Some("BULLETS"));
        assert_eq!(r.response.unwrap()["text"], "- hook");
    }
}
