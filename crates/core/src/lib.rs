pub mod analytics;
pub mod context;
pub mod domain;
pub mod generation;
pub mod llm;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }
    }

    // Blank values in .env files count as unset.
    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}
