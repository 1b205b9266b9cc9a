pub mod anthropic;
pub mod error;
pub mod json;

use crate::analytics::composite_risk::RiskCategory;
use crate::context::ClientContext;
use crate::domain::records::Stock;
use crate::domain::shortlist::{Shortlist, DEFAULT_INSTRUCTION, MIN_CANDIDATES};
use crate::domain::story::{
    Story, StoryMode, DEFAULT_STORY_INSTRUCTION, DEFAULT_STORY_MAX_WORDS, MAX_STORY_WORDS,
};
use chrono::{DateTime, Utc};
use serde_json::json;

#[derive(Debug, Clone)]
pub struct ShortlistInput {
    pub client_id: i64,
    pub generated_at: DateTime<Utc>,
    pub instruction: String,
    pub context_json: serde_json::Value,
    pub candidates: Vec<Stock>,
}

impl ShortlistInput {
    pub fn try_new(
        context: &ClientContext,
        candidates: Vec<Stock>,
        instruction: Option<&str>,
        generated_at: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            candidates.len() >= MIN_CANDIDATES,
            "need at least {MIN_CANDIDATES} candidates for a shortlist (got {})",
            candidates.len()
        );

        let instruction = instruction
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_INSTRUCTION)
            .to_string();

        Ok(Self {
            client_id: context.client.client_id,
            generated_at,
            instruction,
            context_json: serde_json::to_value(context)?,
            candidates,
        })
    }

    pub fn candidates_json(&self) -> serde_json::Value {
        let rows: Vec<_> = self
            .candidates
            .iter()
            .map(|s| {
                json!({
                    "ticker": s.ticker,
                    "company_name": s.company_name,
                    "sector": s.sector,
                    "theme_tag": s.theme_tag,
                    "region": s.region,
                    "market_cap_bucket": s.market_cap_bucket,
                })
            })
            .collect();
        serde_json::Value::Array(rows)
    }

    /// Provider-agnostic task text; also stored in the audit trail.
    pub fn user_prompt(&self) -> String {
        format!(
            "Task: Build a personalised shortlist of exactly 10 stocks for client_id={}.\n\n\
Analyst instruction:\n{}\n\n\
Client context JSON:\n{}\n\n\
Candidates JSON:\n{}",
            self.client_id,
            self.instruction,
            self.context_json,
            self.candidates_json()
        )
    }
}

#[derive(Debug, Clone)]
pub struct StoryInput {
    pub client_id: i64,
    pub generated_at: DateTime<Utc>,
    pub stock: Stock,
    pub mode: StoryMode,
    pub instruction: String,
    pub max_words: u32,
    pub risk_category: Option<RiskCategory>,
    pub context_json: serde_json::Value,
}

impl StoryInput {
    pub fn try_new(
        context: &ClientContext,
        stock: Stock,
        mode: StoryMode,
        instruction: Option<&str>,
        max_words: Option<u32>,
        generated_at: DateTime<Utc>,
    ) -> anyhow::Result<Self> {
        let max_words = max_words.unwrap_or(DEFAULT_STORY_MAX_WORDS);
        anyhow::ensure!(
            (1..=MAX_STORY_WORDS).contains(&max_words),
            "max_words must be between 1 and {MAX_STORY_WORDS} (got {max_words})"
        );

        let instruction = instruction
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_STORY_INSTRUCTION)
            .to_string();

        let risk_category = context
            .analytics
            .composite_risk
            .as_ref()
            .and_then(|r| r.risk_category)
            .or_else(|| risk_from_client_type(context.client.client_type.as_deref()));

        Ok(Self {
            client_id: context.client.client_id,
            generated_at,
            stock,
            mode,
            instruction,
            max_words,
            risk_category,
            context_json: serde_json::to_value(context)?,
        })
    }

    fn risk_guidance(&self) -> &'static str {
        match self.risk_category {
            Some(RiskCategory::Aggressive) => {
                "High-risk client: lead with upside, catalysts and asymmetric risk/reward. \
Justify any defensive angle as balance or hedge."
            }
            Some(RiskCategory::Conservative) => {
                "Low-risk client: lead with stability, income and quality. \
Justify any volatility in risk-adjusted terms."
            }
            Some(RiskCategory::Moderate) | None => {
                "Moderate-risk client: balance growth potential against downside protection."
            }
        }
    }

    fn format_rules(&self) -> String {
        match self.mode {
            StoryMode::Full => format!(
                "Write a complete narrative of about {} words: hook, thesis, client fit, \
timing and catalysts, portfolio integration, two or three likely objections with answers, \
and a call to action.",
                self.max_words
            ),
            StoryMode::Bullets => "Write 8 to 10 short bullet points for call prep, one per \
line, each starting with \"- \". Include at least one objection and answer."
                .to_string(),
        }
    }

    /// Provider-agnostic task text; also stored in the audit trail.
    pub fn user_prompt(&self) -> String {
        let stock = json!({
            "ticker": self.stock.ticker,
            "company_name": self.stock.company_name,
            "sector": self.stock.sector,
            "theme_tag": self.stock.theme_tag,
            "region": self.stock.region,
            "market_cap_bucket": self.stock.market_cap_bucket,
        });
        format!(
            "Task: Write a sales story pitching {} to client_id={}.\n\n\
{}\n\n\
Format ({}):\n{}\n\n\
Analyst instruction:\n{}\n\n\
Selected stock JSON:\n{}\n\n\
Client context JSON:\n{}",
            self.stock.ticker,
            self.client_id,
            self.risk_guidance(),
            self.mode,
            self.format_rules(),
            self.instruction,
            stock,
            self.context_json
        )
    }
}

fn risk_from_client_type(client_type: Option<&str>) -> Option<RiskCategory> {
    let t = client_type?.to_lowercase();
    if t.contains("hedge") {
        Some(RiskCategory::Aggressive)
    } else if t.contains("pension") || t.contains("insurance") {
        Some(RiskCategory::Conservative)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
        }
    }
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    async fn generate_shortlist(&self, input: &ShortlistInput) -> anyhow::Result<Shortlist>;

    async fn generate_story(&self, input: &StoryInput) -> anyhow::Result<Story>;
}
