use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use salesdesk_core::analytics::Aggregator;
use salesdesk_core::config::Settings;
use salesdesk_core::domain::records::Dataset;
use salesdesk_core::domain::story::StoryMode;
use salesdesk_core::generation;
use salesdesk_core::llm::anthropic::AnthropicClient;
use salesdesk_core::storage::{self, dataset};

#[derive(Debug, Parser)]
#[command(name = "salesdesk_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate client analytics and print one JSON object per client.
    Analytics {
        /// Only this client.
        #[arg(long)]
        client_id: Option<i64>,

        /// Evaluation time (RFC 3339 or YYYY-MM-DD). Defaults to the current time.
        #[arg(long)]
        now: Option<String>,

        /// Read tables from a JSON file instead of DATABASE_URL.
        #[arg(long)]
        dataset: Option<PathBuf>,
    },

    /// Generate and record an LLM shortlist for one client.
    Shortlist {
        #[arg(long)]
        client_id: i64,

        /// Free-text guidance for the model.
        #[arg(long)]
        instruction: Option<String>,

        #[arg(long)]
        max_candidates: Option<usize>,

        #[arg(long)]
        now: Option<String>,

        /// Read tables from a JSON file instead of DATABASE_URL. Implies --dry-run.
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Print the prompt instead of calling the model or writing the audit trail.
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate and record a sales story pitching one stock to one client.
    Story {
        #[arg(long)]
        client_id: i64,

        #[arg(long)]
        ticker: String,

        /// FULL or BULLETS.
        #[arg(long, default_value = "FULL")]
        mode: StoryMode,

        #[arg(long)]
        instruction: Option<String>,

        #[arg(long)]
        max_words: Option<u32>,

        #[arg(long)]
        now: Option<String>,

        /// Read tables from a JSON file instead of DATABASE_URL. Implies --dry-run.
        #[arg(long)]
        dataset: Option<PathBuf>,

        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let result = match args.command {
        Command::Analytics {
            client_id,
            now,
            dataset,
        } => run_analytics(&settings, client_id, now.as_deref(), dataset.as_deref()).await,
        Command::Shortlist {
            client_id,
            instruction,
            max_candidates,
            now,
            dataset,
            dry_run,
        } => {
            run_shortlist(
                &settings,
                client_id,
                instruction.as_deref(),
                max_candidates,
                now.as_deref(),
                dataset.as_deref(),
                dry_run,
            )
            .await
        }
        Command::Story {
            client_id,
            ticker,
            mode,
            instruction,
            max_words,
            now,
            dataset,
            dry_run,
        } => {
            let opts = StoryOpts {
                client_id,
                ticker,
                mode,
                instruction,
                max_words,
            };
            run_story(&settings, opts, now.as_deref(), dataset.as_deref(), dry_run).await
        }
    };

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
    }
    result
}

async fn run_analytics(
    settings: &Settings,
    client_id: Option<i64>,
    now: Option<&str>,
    dataset_path: Option<&Path>,
) -> anyhow::Result<()> {
    let now = salesdesk_core::time::resolve_now(now, chrono::Utc::now())?;
    let data = match dataset_path {
        Some(path) => read_dataset(path)?,
        None => {
            let pool = storage::connect(settings.require_database_url()?).await?;
            match client_id {
                Some(id) => dataset::load_for_client(&pool, id).await?,
                None => dataset::load_all(&pool).await?,
            }
        }
    };

    let agg = Aggregator::new(&data, now);
    let rows = match client_id {
        Some(id) => vec![agg
            .client_analytics(id)
            .with_context(|| format!("client {id} not found"))?],
        None => agg.evaluate_all(),
    };

    let mut out = std::io::stdout().lock();
    for row in &rows {
        serde_json::to_writer(&mut out, row)?;
        writeln!(out)?;
    }

    tracing::info!(%now, clients = rows.len(), "analytics run complete");
    Ok(())
}

async fn run_shortlist(
    settings: &Settings,
    client_id: i64,
    instruction: Option<&str>,
    max_candidates: Option<usize>,
    now: Option<&str>,
    dataset_path: Option<&Path>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let now = salesdesk_core::time::resolve_now(now, chrono::Utc::now())?;

    if let Some(path) = dataset_path {
        let data = read_dataset(path)?;
        let input =
            generation::prepare_shortlist(&data, client_id, instruction, max_candidates, now)?
                .with_context(|| format!("client {client_id} not found"))?;
        println!("{}", input.user_prompt());
        tracing::info!(
            client_id,
            dry_run = true,
            candidates = input.candidates.len(),
            "shortlist dry run"
        );
        return Ok(());
    }

    let pool = storage::connect(settings.require_database_url()?).await?;
    let data = dataset::load_for_client(&pool, client_id).await?;
    let input = generation::prepare_shortlist(&data, client_id, instruction, max_candidates, now)?
        .with_context(|| format!("client {client_id} not found"))?;

    if dry_run {
        println!("{}", input.user_prompt());
        tracing::info!(
            client_id,
            dry_run = true,
            candidates = input.candidates.len(),
            "shortlist dry run"
        );
        return Ok(());
    }

    storage::migrate(&pool).await?;
    let llm = AnthropicClient::from_settings(settings)?;
    let recorded = generation::generate_and_record(&pool, &llm, &input).await?;
    println!("{}", serde_json::to_string_pretty(&recorded)?);
    Ok(())
}

struct StoryOpts {
    client_id: i64,
    ticker: String,
    mode: StoryMode,
    instruction: Option<String>,
    max_words: Option<u32>,
}

async fn run_story(
    settings: &Settings,
    opts: StoryOpts,
    now: Option<&str>,
    dataset_path: Option<&Path>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let now = salesdesk_core::time::resolve_now(now, chrono::Utc::now())?;
    let client_id = opts.client_id;

    let (data, pool) = match dataset_path {
        Some(path) => (read_dataset(path)?, None),
        None => {
            let pool = storage::connect(settings.require_database_url()?).await?;
            (dataset::load_for_client(&pool, client_id).await?, Some(pool))
        }
    };
    let input = generation::prepare_story(
        &data,
        client_id,
        &opts.ticker,
        opts.mode,
        opts.instruction.as_deref(),
        opts.max_words,
        now,
    )?
    .with_context(|| format!("client {client_id} not found"))?;

    let pool = match pool {
        Some(pool) if !dry_run => pool,
        _ => {
            println!("{}", input.user_prompt());
            tracing::info!(
                client_id,
                ticker = %input.stock.ticker,
                dry_run = true,
                "story dry run"
            );
            return Ok(());
        }
    };

    storage::migrate(&pool).await?;
    let llm = AnthropicClient::from_settings(settings)?;
    let recorded = generation::generate_story_and_record(&pool, &llm, &input).await?;
    println!("{}", recorded.story.text);
    tracing::info!(
        client_id,
        generation_id = %recorded.generation_id,
        ticker = %recorded.story.ticker,
        "story recorded"
    );
    Ok(())
}

fn read_dataset(path: &Path) -> anyhow::Result<Dataset> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("invalid dataset JSON in {}", path.display()))
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
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

    #[test]
    fn parses_analytics_flags() {
        let args = Args::try_parse_from([
            "salesdesk_worker",
            "analytics",
            "--client-id",
            "7",
            "--now",
            "2026-03-01",
        ])
        .unwrap();
        match args.command {
            Command::Analytics { client_id, now, dataset } => {
                assert_eq!(client_id, Some(7));
                assert_eq!(now.as_deref(), Some("2026-03-01"));
                assert!(dataset.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn shortlist_requires_client_id() {
        assert!(Args::try_parse_from(["salesdesk_worker", "shortlist"]).is_err());
        let args = Args::try_parse_from([
            "salesdesk_worker",
            "shortlist",
            "--client-id",
            "3",
            "--max-candidates",
            "40",
            "--dry-run",
        ])
        .unwrap();
        match args.command {
            Command::Shortlist {
                client_id,
                max_candidates,
                dry_run,
                ..
            } => {
                assert_eq!(client_id, 3);
                assert_eq!(max_candidates, Some(40));
                assert!(dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_story_flags() {
        let args = Args::try_parse_from([
            "salesdesk_worker",
            "story",
            "--client-id",
            "5",
            "--ticker",
            "SAP",
            "--mode",
            "bullets",
        ])
        .unwrap();
        match args.command {
            Command::Story {
                client_id,
                ticker,
                mode,
                dry_run,
                ..
            } => {
                assert_eq!(client_id, 5);
                assert_eq!(ticker, "SAP");
                assert_eq!(mode, StoryMode::Bullets);
                assert!(!dry_run);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Args::try_parse_from(["salesdesk_worker", "story", "--client-id", "5"]).is_err());
        let args =
            Args::try_parse_from(["salesdesk_worker", "story", "--client-id", "5", "--ticker", "X"])
                .unwrap();
        assert!(matches!(args.command, Command::Story { mode: StoryMode::Full, .. }));
        assert!(Args::try_parse_from([
            "salesdesk_worker",
            "story",
            "--client-id",
            "5",
            "--ticker",
            "X",
            "--mode",
            "essay",
        ])
        .is_err());
    }

    #[test]
    fn reads_dataset_file_with_missing_tables() {
        let path = std::env::temp_dir().join(format!("salesdesk-{}.json", std::process::id()));
        let body = r#"{"clients":[{"client_id":1,"client_name":null,"firm_name":"Nordlicht",
            "client_type":null,"region":null,"primary_contact_name":null,
            "primary_contact_role":null}]}"#;
        std::fs::write(&path, body).unwrap();
        let data = read_dataset(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(data.clients.len(), 1);
        assert!(data.trades.is_empty());
    }
}
