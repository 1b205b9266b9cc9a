use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SHORTLIST_LEN: usize = 10;
pub const WHY_BULLETS: usize = 3;
pub const TOP_PICKS: usize = 2;
pub const MIN_CANDIDATES: usize = SHORTLIST_LEN;
pub const DEFAULT_MAX_CANDIDATES: usize = 120;

pub const DEFAULT_INSTRUCTION: &str = "Rank 10 stocks that fit this client; prioritize \
personalization and diversification; use calls and reads (days_diff) as evidence.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shortlist {
    pub client_id: i64,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<ShortlistItem>,
    pub top_picks: [String; TOP_PICKS],
    pub notes_for_analyst: Vec<String>,
}

/// One pick. Descriptive fields come from the candidate row, not from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortlistItem {
    pub stock_id: i64,
    pub ticker: String,
    pub company_name: String,
    pub sector: Option<String>,
    pub theme_tag: Option<String>,
    pub why_bullets: [String; WHY_BULLETS],
}
