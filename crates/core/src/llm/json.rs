use crate::domain::contract::LlmShortlist;
use crate::domain::shortlist::Shortlist;
use crate::llm::ShortlistInput;
use anyhow::Context;

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Strip ```json ... ``` fences.
        let mut inner = trimmed;
        if let Some(after_first) = inner.split_once('\n').map(|(_, rest)| rest) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

pub fn parse_shortlist(text: &str, input: &ShortlistInput) -> anyhow::Result<Shortlist> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let parsed = serde_json::from_str::<LlmShortlist>(&json_str)
        .with_context(|| format!("LLM output is not valid JSON for shortlist schema: {json_str}"))?;
    parsed.validate_and_into_shortlist(input.client_id, input.generated_at, &input.candidates)
}
