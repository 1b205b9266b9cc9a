use crate::domain::records::Stock;
use crate::domain::shortlist::{Shortlist, ShortlistItem, SHORTLIST_LEN, TOP_PICKS, WHY_BULLETS};
use anyhow::{bail, ensure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Shape the model is asked to emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmShortlist {
    pub shortlist: Vec<LlmShortlistItem>,
    pub top_picks: Vec<String>,
    #[serde(default)]
    pub notes_for_analyst: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmShortlistItem {
    pub ticker: String,
    #[serde(default)]
    pub company_name: Option<String>,
    pub why_bullets: Vec<String>,
}

impl LlmShortlist {
    pub fn validate_and_into_shortlist(
        self,
        client_id: i64,
        generated_at: DateTime<Utc>,
        candidates: &[Stock],
    ) -> anyhow::Result<Shortlist> {
        ensure!(
            self.shortlist.len() == SHORTLIST_LEN,
            "LLM output must contain exactly {SHORTLIST_LEN} items (got {})",
            self.shortlist.len()
        );

        let by_ticker: BTreeMap<&str, &Stock> = candidates
            .iter()
            .map(|s| (s.ticker.trim(), s))
            .collect();

        let mut seen = BTreeSet::<String>::new();
        let mut items = Vec::with_capacity(self.shortlist.len());
        for item in self.shortlist {
            items.push(item.validate_and_into_item(&by_ticker, &mut seen)?);
        }

        ensure!(
            self.top_picks.len() == TOP_PICKS,
            "top_picks must have exactly {TOP_PICKS} tickers (got {})",
            self.top_picks.len()
        );
        let picks: Vec<String> = self
            .top_picks
            .iter()
            .map(|t| t.trim().to_string())
            .collect();
        for pick in &picks {
            ensure!(seen.contains(pick), "top pick {pick} is not in the shortlist");
        }
        let [a, b]: [String; TOP_PICKS] = match picks.try_into() {
            Ok(p) => p,
            Err(_) => bail!("top_picks must have exactly {TOP_PICKS} tickers"),
        };
        ensure!(a != b, "duplicate top pick: {a}");

        let notes_for_analyst = self
            .notes_for_analyst
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Shortlist {
            client_id,
            generated_at,
            items,
            top_picks: [a, b],
            notes_for_analyst,
        })
    }
}

impl LlmShortlistItem {
    fn validate_and_into_item(
        self,
        candidates: &BTreeMap<&str, &Stock>,
        seen: &mut BTreeSet<String>,
    ) -> anyhow::Result<ShortlistItem> {
        let ticker = self.ticker.trim().to_string();
        ensure!(!ticker.is_empty(), "ticker must be non-empty");

        let Some(stock) = candidates.get(ticker.as_str()) else {
            bail!("ticker {ticker} is not among the candidates");
        };
        ensure!(seen.insert(ticker.clone()), "duplicate ticker: {ticker}");

        ensure!(
            self.why_bullets.len() == WHY_BULLETS,
            "why_bullets must have exactly {WHY_BULLETS} lines for {ticker} (got {})",
            self.why_bullets.len()
        );
        let b0 = self.why_bullets[0].trim().to_string();
        let b1 = self.why_bullets[1].trim().to_string();
        let b2 = self.why_bullets[2].trim().to_string();
        ensure!(
            !b0.is_empty() && !b1.is_empty() && !b2.is_empty(),
            "why_bullets must be non-empty for {ticker}"
        );

        Ok(ShortlistItem {
            stock_id: stock.stock_id,
            ticker,
            company_name: stock.company_name.clone(),
            sector: stock.sector.clone(),
            theme_tag: stock.theme_tag.clone(),
            why_bullets: [b0, b1, b2],
        })
    }
}
