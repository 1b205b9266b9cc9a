use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use salesdesk_core::analytics::{Aggregator, ClientAnalytics};
use salesdesk_core::context::{self, ClientContext, ClientMatch, DEFAULT_SEARCH_LIMIT};
use salesdesk_core::domain::story::StoryMode;
use salesdesk_core::generation::{self, RecordedShortlist, RecordedStory};
use salesdesk_core::llm::anthropic::AnthropicClient;
use salesdesk_core::llm::LlmClient;
use salesdesk_core::storage::{self, dataset, history};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = salesdesk_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match storage::connect(db_url).await {
            Ok(pool) => match storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(
                        error = %e,
                        "db migrations failed; starting API in degraded mode"
                    );
                    None
                }
            },
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let llm: Option<Arc<dyn LlmClient>> = match AnthropicClient::from_settings(&settings) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "LLM client unavailable; shortlist and story endpoints disabled"
            );
            None
        }
    };

    let state = AppState { pool, llm };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/search", get(search))
        .route("/api/client/:client_id", get(get_client_context))
        .route("/api/analytics/:client_id", get(get_client_analytics))
        .route("/api/analytics/:client_id/:metric", get(get_metric))
        .route("/api/shortlist", post(create_shortlist))
        .route("/api/story", post(create_story))
        .route("/api/history/:client_id", get(get_history))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pool: Option<PgPool>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl AppState {
    fn pool(&self) -> Result<&PgPool, StatusCode> {
        self.pool.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %e, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn resolve_now(now: Option<&str>) -> Result<DateTime<Utc>, StatusCode> {
    salesdesk_core::time::resolve_now(now, Utc::now()).map_err(|_| StatusCode::BAD_REQUEST)
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: String,
    limit: Option<usize>,
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<ClientMatch>>, StatusCode> {
    let pool = state.pool()?;
    let clients = dataset::load_clients(pool, None).await.map_err(internal)?;
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    Ok(Json(context::search_clients(&clients, &params.q, limit)))
}

#[derive(Debug, Deserialize)]
struct NowParams {
    now: Option<String>,
}

async fn get_client_context(
    State(state): State<AppState>,
    Path(client_id): Path<i64>,
    Query(params): Query<NowParams>,
) -> Result<Json<ClientContext>, StatusCode> {
    let pool = state.pool()?;
    let now = resolve_now(params.now.as_deref())?;
    let data = dataset::load_for_client(pool, client_id)
        .await
        .map_err(internal)?;

    context::build_client_context(&data, client_id, now)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_client_analytics(
    State(state): State<AppState>,
    Path(client_id): Path<i64>,
    Query(params): Query<NowParams>,
) -> Result<Json<ClientAnalytics>, StatusCode> {
    let pool = state.pool()?;
    let now = resolve_now(params.now.as_deref())?;
    let data = dataset::load_for_client(pool, client_id)
        .await
        .map_err(internal)?;

    Aggregator::new(&data, now)
        .client_analytics(client_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_metric(
    State(state): State<AppState>,
    Path((client_id, metric)): Path<(i64, String)>,
    Query(params): Query<NowParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let pool = state.pool()?;
    let now = resolve_now(params.now.as_deref())?;
    let data = dataset::load_for_client(pool, client_id)
        .await
        .map_err(internal)?;

    metric_json(&Aggregator::new(&data, now), client_id, &metric)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// One named metric as JSON. Unknown metric names are a 404 like missing records.
fn metric_json(
    agg: &Aggregator<'_>,
    client_id: i64,
    metric: &str,
) -> Result<Option<serde_json::Value>, StatusCode> {
    let value = match metric {
        "portfolio_risk" => agg.portfolio_risk(client_id).map(serde_json::to_value),
        "engagement_momentum" => agg.engagement_momentum(client_id).map(serde_json::to_value),
        "conviction" => agg.conviction(client_id).map(serde_json::to_value),
        "composite_risk" => agg.composite_risk(client_id).map(serde_json::to_value),
        "readership" => agg
            .readership_intelligence(client_id)
            .map(serde_json::to_value),
        _ => return Err(StatusCode::NOT_FOUND),
    };
    value
        .transpose()
        .map_err(|e| internal(anyhow::Error::new(e)))
}

#[derive(Debug, Deserialize)]
struct ShortlistRequest {
    client_id: i64,
    instruction: Option<String>,
    max_candidates: Option<usize>,
    now: Option<String>,
}

async fn create_shortlist(
    State(state): State<AppState>,
    Json(req): Json<ShortlistRequest>,
) -> Result<Json<RecordedShortlist>, StatusCode> {
    let pool = state.pool()?;
    let llm = state.llm.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    let now = resolve_now(req.now.as_deref())?;

    let data = dataset::load_for_client(pool, req.client_id)
        .await
        .map_err(internal)?;
    let input = generation::prepare_shortlist(
        &data,
        req.client_id,
        req.instruction.as_deref(),
        req.max_candidates,
        now,
    )
    .map_err(|e| {
        tracing::warn!(client_id = req.client_id, error = %e, "cannot build shortlist input");
        StatusCode::UNPROCESSABLE_ENTITY
    })?
    .ok_or(StatusCode::NOT_FOUND)?;

    let recorded = generation::generate_and_record(pool, llm.as_ref(), &input)
        .await
        .map_err(|e| {
            sentry_anyhow::capture_anyhow(&e);
            StatusCode::BAD_GATEWAY
        })?;

    Ok(Json(recorded))
}

#[derive(Debug, Deserialize)]
struct StoryRequest {
    client_id: i64,
    ticker: String,
    mode: Option<String>,
    instruction: Option<String>,
    max_words: Option<u32>,
    now: Option<String>,
}

async fn create_story(
    State(state): State<AppState>,
    Json(req): Json<StoryRequest>,
) -> Result<Json<RecordedStory>, StatusCode> {
    let pool = state.pool()?;
    let llm = state.llm.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    let now = resolve_now(req.now.as_deref())?;

    let data = dataset::load_for_client(pool, req.client_id)
        .await
        .map_err(internal)?;
    let input = generation::prepare_story(
        &data,
        req.client_id,
        &req.ticker,
        StoryMode::or_full(req.mode.as_deref()),
        req.instruction.as_deref(),
        req.max_words,
        now,
    )
    .map_err(|e| {
        tracing::warn!(client_id = req.client_id, error = %e, "cannot build story input");
        StatusCode::UNPROCESSABLE_ENTITY
    })?
    .ok_or(StatusCode::NOT_FOUND)?;

    let recorded = generation::generate_story_and_record(pool, llm.as_ref(), &input)
        .await
        .map_err(|e| {
            sentry_anyhow::capture_anyhow(&e);
            StatusCode::BAD_GATEWAY
        })?;

    Ok(Json(recorded))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<i64>,
}

async fn get_history(
    State(state): State<AppState>,
    Path(client_id): Path<i64>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<history::GenerationRecord>>, StatusCode> {
    let pool = state.pool()?;
    let limit = params.limit.unwrap_or(history::DEFAULT_HISTORY_LIMIT);
    let rows = history::fetch_history(pool, client_id, limit)
        .await
        .map_err(internal)?;
    Ok(Json(rows))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &salesdesk_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use salesdesk_core::domain::records::{Client, Dataset};

    fn data() -> Dataset {
        Dataset {
            clients: vec![Client {
                client_id: 1,
                client_name: None,
                firm_name: "Nordlicht".to_string(),
                client_type: Some("Insurance".to_string()),
                region: None,
                primary_contact_name: None,
                primary_contact_role: None,
            }],
            ..Dataset::default()
        }
    }

    #[test]
    fn metric_dispatch() {
        let data = data();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let agg = Aggregator::new(&data, now);

        let v = metric_json(&agg, 1, "composite_risk").unwrap().unwrap();
        assert_eq!(v["investor_type_factor"], serde_json::json!(0.35));
        assert!(v["composite_risk_score"].is_null());

        let v = metric_json(&agg, 1, "engagement_momentum").unwrap().unwrap();
        assert_eq!(v["engagement_trend"], "Dormant");

        assert_eq!(metric_json(&agg, 1, "conviction").unwrap(), None);
        assert_eq!(metric_json(&agg, 2, "portfolio_risk").unwrap(), None);
        assert_eq!(metric_json(&agg, 1, "nope"), Err(StatusCode::NOT_FOUND));
    }

    #[test]
    fn story_request_defaults_to_full_narrative() {
        let req: StoryRequest =
            serde_json::from_value(serde_json::json!({"client_id": 1, "ticker": "SAP"})).unwrap();
        assert_eq!(StoryMode::or_full(req.mode.as_deref()), StoryMode::Full);
        assert!(req.max_words.is_none());

        let req: StoryRequest = serde_json::from_value(
            serde_json::json!({"client_id": 1, "ticker": "SAP", "mode": "bullets"}),
        )
        .unwrap();
        assert_eq!(StoryMode::or_full(req.mode.as_deref()), StoryMode::Bullets);
    }

    #[test]
    fn bad_now_is_bad_request() {
        assert_eq!(resolve_now(Some("soon")), Err(StatusCode::BAD_REQUEST));
        assert!(resolve_now(Some("2026-03-01")).is_ok());
    }
}
