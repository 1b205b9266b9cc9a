use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_STORY_MAX_WORDS: u32 = 260;
pub const MAX_STORY_WORDS: u32 = 1200;

pub const DEFAULT_STORY_INSTRUCTION: &str = "Make it persuasive and client-specific. Explain what \
and why, and cite calls, reads and trades as evidence.";

/// Shape of the pitch: a full narrative or call-prep bullets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StoryMode {
    #[default]
    Full,
    Bullets,
}

impl StoryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryMode::Full => "FULL",
            StoryMode::Bullets => "BULLETS",
        }
    }

    /// Unrecognised or missing modes fall back to a full narrative.
    pub fn or_full(mode: Option<&str>) -> Self {
        mode.and_then(|m| m.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for StoryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FULL" => Ok(StoryMode::Full),
            "BULLETS" => Ok(StoryMode::Bullets),
            other => bail!("unknown story mode: {other:?}"),
        }
    }
}

impl fmt::Display for StoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sales narrative pitching one stock to one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub client_id: i64,
    pub generated_at: DateTime<Utc>,
    pub ticker: String,
    pub company_name: String,
    pub mode: StoryMode,
    pub text: String,
}
