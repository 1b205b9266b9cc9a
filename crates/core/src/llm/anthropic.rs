use crate::config::Settings;
use crate::domain::contract::LlmShortlist;
use crate::domain::shortlist::{Shortlist, SHORTLIST_LEN, TOP_PICKS, WHY_BULLETS};
use crate::domain::story::Story;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::json;
use crate::llm::{LlmClient, Provider, ShortlistInput, StoryInput};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 2048;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const REPAIR_ATTEMPTS: u32 = 2;

const TOOL_NAME_EMIT_SHORTLIST: &str = "emit_shortlist";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        req: CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn request(&self, max_tokens: u32, content: String) -> CreateMessageRequest {
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens,
            system: Some(Self::system_prompt()),
            messages: vec![Message {
                role: "user",
                content,
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(Self::tool_choice()),
        }
    }

    /// Plain-text request for narratives; no tools.
    fn story_request(&self, max_tokens: u32, content: String) -> CreateMessageRequest {
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens,
            system: Some(Self::story_system_prompt()),
            messages: vec![Message {
                role: "user",
                content,
            }],
            tools: None,
            tool_choice: None,
        }
    }

    fn bumped_max_tokens(&self) -> u32 {
        self.max_tokens.saturating_mul(2).max(4096)
    }

    fn tools() -> Vec<Tool> {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["shortlist", "top_picks", "notes_for_analyst"],
            "properties": {
                "shortlist": {
                    "type": "array",
                    "minItems": SHORTLIST_LEN,
                    "maxItems": SHORTLIST_LEN,
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["ticker", "company_name", "why_bullets"],
                        "properties": {
                            "ticker": {"type": "string"},
                            "company_name": {"type": "string"},
                            "why_bullets": {
                                "type": "array",
                                "minItems": WHY_BULLETS,
                                "maxItems": WHY_BULLETS,
                                "items": {"type": "string"}
                            }
                        }
                    }
                },
                "top_picks": {
                    "type": "array",
                    "minItems": TOP_PICKS,
                    "maxItems": TOP_PICKS,
                    "items": {"type": "string"}
                },
                "notes_for_analyst": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_SHORTLIST,
            description: "Emit the client shortlist as structured JSON",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_SHORTLIST,
        }
    }

    fn system_prompt() -> String {
        [
            "You are an equity sales assistant supporting a sell-side analyst.",
            "Use ONLY the JSON provided. Do not invent facts; write \"unknown\" when evidence is missing.",
            "Select stocks ONLY from the candidates list, by ticker.",
            "Personalise to the client's risk profile, holdings and engagement signals",
            "(call notes, readership days_diff, recent trades). Avoid avoid_tickers unless clearly justified.",
            "Return ONLY valid JSON. Do not wrap in markdown. Do not include any extra keys.",
            "Output schema:",
            "{",
            "  \"shortlist\": [",
            "    {\"ticker\": \"SAP\", \"company_name\": \"SAP SE\", \"why_bullets\": [\"line1\", \"line2\", \"line3\"]}",
            "  ],",
            "  \"top_picks\": [\"SAP\", \"ASML\"],",
            "  \"notes_for_analyst\": [\"note\"]",
            "}",
            "Rules:",
            "- shortlist must have exactly 10 entries with unique tickers",
            "- why_bullets must have exactly 3 short, non-empty lines per stock",
            "- top_picks must be exactly 2 tickers taken from the shortlist",
        ]
        .join("\n")
    }

    fn story_system_prompt() -> String {
        [
            "You are an equity sales storyteller supporting a sell-side analyst.",
            "Connect the selected stock to this client's holdings, risk profile and engagement.",
            "Use ONLY the JSON provided. Do not invent facts, prices or targets.",
            "Cite concrete evidence: call notes, reads (days_diff), recent trades, momentum and conviction.",
            "When evidence is missing, say so plainly.",
            "Return plain text only. No JSON and no markdown headings.",
        ]
        .join("\n")
    }

    fn repair_prompt(previous_output: &str) -> String {
        format!(
            "Your previous message was NOT valid shortlist JSON.\n\n\
TASK: Output ONLY a single JSON object that exactly matches the schema and rules.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- Use double quotes for all JSON strings.\n\
- shortlist MUST have exactly {SHORTLIST_LEN} items, each with keys ticker, company_name, why_bullets.\n\
- why_bullets MUST have exactly {WHY_BULLETS} strings.\n\
- top_picks MUST have exactly {TOP_PICKS} tickers that appear in shortlist.\n\
- Every ticker MUST come from the candidates you were given.\n\n\
INVALID OUTPUT (for reference only; DO NOT copy verbatim):\n{previous_output}"
        )
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    fn response_tool_shortlist(
        res: &CreateMessageResponse,
    ) -> anyhow::Result<Option<LlmShortlist>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_SHORTLIST {
                    let parsed = serde_json::from_value::<LlmShortlist>(input.clone())
                        .context("failed to decode tool_use.input into LlmShortlist")?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    async fn try_parse_with_repairs(
        &self,
        input: &ShortlistInput,
        initial_text: String,
        initial_raw_json: serde_json::Value,
    ) -> anyhow::Result<(Shortlist, serde_json::Value)> {
        let mut last_err = match json::parse_shortlist(&initial_text, input) {
            Ok(shortlist) => return Ok((shortlist, initial_raw_json)),
            Err(err) => err,
        };
        let mut last_text = initial_text;
        let mut last_raw_json = initial_raw_json;

        for attempt in 1..=REPAIR_ATTEMPTS {
            let content = format!(
                "{}\n\n{}",
                input.user_prompt(),
                Self::repair_prompt(&last_text)
            );
            let req = self.request(self.max_tokens, content);
            let (raw_json, res) = self.create_message(req).await?;

            // Repairs run under tool_choice too, so check the tool block first.
            let tool = Self::response_tool_shortlist(&res)?;
            let text = match &tool {
                Some(t) => serde_json::to_string(t)?,
                None => Self::response_text(&res),
            };
            let parsed = match tool {
                Some(t) => t.validate_and_into_shortlist(
                    input.client_id,
                    input.generated_at,
                    &input.candidates,
                ),
                None => json::parse_shortlist(&text, input),
            };

            match parsed {
                Ok(shortlist) => return Ok((shortlist, raw_json)),
                Err(err) => {
                    tracing::warn!(
                        attempt,
                        client_id = input.client_id,
                        error = %err,
                        "LLM shortlist still invalid after repair attempt"
                    );
                    last_err = err;
                    last_text = text;
                    last_raw_json = raw_json;
                }
            }
        }

        Err(LlmDiagnosticsError {
            provider: Provider::Anthropic,
            stage: "parse_after_repair",
            detail: format!("final_error={last_err:#}"),
            raw_output: Some(last_text),
            raw_response_json: Some(last_raw_json),
        }
        .into())
    }

    /// Shortlist plus the raw provider response it was parsed from.
    pub async fn generate_shortlist_with_raw(
        &self,
        input: &ShortlistInput,
    ) -> anyhow::Result<(Shortlist, serde_json::Value)> {
        let prompt = input.user_prompt();
        let (mut raw_json, mut res) = self
            .create_message(self.request(self.max_tokens, prompt.clone()))
            .await?;

        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            let bumped = self.bumped_max_tokens();
            tracing::warn!(
                client_id = input.client_id,
                from = self.max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
            );
            let (rj, r) = self.create_message(self.request(bumped, prompt)).await?;
            raw_json = rj;
            res = r;
        }

        if let Some(tool) = Self::response_tool_shortlist(&res)? {
            match tool.clone().validate_and_into_shortlist(
                input.client_id,
                input.generated_at,
                &input.candidates,
            ) {
                Ok(shortlist) => return Ok((shortlist, raw_json)),
                Err(err) => {
                    tracing::warn!(
                        client_id = input.client_id,
                        error = %err,
                        "tool output violated shortlist contract; asking for a repair"
                    );
                    let text = serde_json::to_string(&tool)?;
                    return self.try_parse_with_repairs(input, text, raw_json).await;
                }
            }
        }

        let text = Self::response_text(&res);
        self.try_parse_with_repairs(input, text, raw_json).await
    }
}

impl AnthropicClient {
    /// Story plus the raw provider response it was read from.
    pub async fn generate_story_with_raw(
        &self,
        input: &StoryInput,
    ) -> anyhow::Result<(Story, serde_json::Value)> {
        let prompt = input.user_prompt();
        let (mut raw_json, mut res) = self
            .create_message(self.story_request(self.max_tokens, prompt.clone()))
            .await?;

        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            let bumped = self.bumped_max_tokens();
            tracing::warn!(
                client_id = input.client_id,
                ticker = %input.stock.ticker,
                from = self.max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying story once with higher max_tokens"
            );
            let (rj, r) = self.create_message(self.story_request(bumped, prompt)).await?;
            raw_json = rj;
            res = r;
        }

        let story =
            Self::story_from_response(input, &res).map_err(|detail| LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "story",
                detail,
                raw_output: Some(Self::response_text(&res)),
                raw_response_json: Some(raw_json.clone()),
            })?;
        Ok((story, raw_json))
    }

    fn story_from_response(
        input: &StoryInput,
        res: &CreateMessageResponse,
    ) -> Result<Story, String> {
        let text = Self::response_text(res).trim().to_string();
        if text.is_empty() {
            return Err(format!(
                "empty story (stop_reason={})",
                res.stop_reason.as_deref().unwrap_or("none")
            ));
        }
        Ok(Story {
            client_id: input.client_id,
            generated_at: input.generated_at,
            ticker: input.stock.ticker.clone(),
            company_name: input.stock.company_name.clone(),
            mode: input.mode,
            text,
        })
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_shortlist(&self, input: &ShortlistInput) -> anyhow::Result<Shortlist> {
        let (shortlist, _raw) = self.generate_shortlist_with_raw(input).await?;
        Ok(shortlist)
    }

    async fn generate_story(&self, input: &StoryInput) -> anyhow::Result<Story> {
        let (story, _raw) = self.generate_story_with_raw(input).await?;
        Ok(story)
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::contract::tests::{candidates, valid_output};
    use crate::domain::story::StoryMode;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn input() -> ShortlistInput {
        ShortlistInput {
            client_id: 9,
            generated_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            instruction: "x".to_string(),
            context_json: json!({}),
            candidates: candidates(20),
        }
    }

    #[test]
    fn decodes_tool_use_block() {
        let raw = json!({
            "id": "msg_1",
            "type": "message",
            "stop_reason": "tool_use",
            "content": [
                {"type": "thinking", "thinking": "...", "signature": "sig"},
                {"type": "tool_use", "id": "toolu_1", "name": TOOL_NAME_EMIT_SHORTLIST, "input": valid_output(10)},
            ],
        });
        let res: CreateMessageResponse = serde_json::from_value(raw).unwrap();
        let parsed = AnthropicClient::response_tool_shortlist(&res).unwrap().unwrap();
        let input = input();
        let shortlist = parsed
            .validate_and_into_shortlist(input.client_id, input.generated_at, &input.candidates)
            .unwrap();
        assert_eq!(shortlist.client_id, 9);
        assert_eq!(shortlist.items.len(), 10);
        assert_eq!(shortlist.top_picks[0], "TCK01");
    }

    fn story_input() -> StoryInput {
        StoryInput {
            client_id: 9,
            generated_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
            stock: candidates(1).remove(0),
            mode: StoryMode::Bullets,
            instruction: "x".to_string(),
            max_words: 200,
            risk_category: None,
            context_json: json!({}),
        }
    }

    #[test]
    fn story_text_is_trimmed_and_stamped() {
        let raw = json!({
            "content": [{"type": "text", "text": "  - hook\n- thesis \n"}],
            "stop_reason": "end_turn",
        });
        let res: CreateMessageResponse = serde_json::from_value(raw).unwrap();
        let story = AnthropicClient::story_from_response(&story_input(), &res).unwrap();
        assert_eq!(story.text, "- hook\n- thesis");
        assert_eq!(story.ticker, "TCK01");
        assert_eq!(story.company_name, "Company 1");
        assert_eq!(story.mode, StoryMode::Bullets);
        assert_eq!(story.client_id, 9);
    }

    #[test]
    fn blank_story_is_an_error() {
        let res = CreateMessageResponse {
            content: vec![ContentBlock::Text {
                text: " \n ".to_string(),
            }],
            stop_reason: Some("max_tokens".to_string()),
        };
        let err = AnthropicClient::story_from_response(&story_input(), &res).unwrap_err();
        assert!(err.contains("stop_reason=max_tokens"));
    }

    #[test]
    fn text_blocks_are_joined_and_others_ignored() {
        let res = CreateMessageResponse {
            content: vec![
                ContentBlock::Text {
                    text: "a".to_string(),
                },
                ContentBlock::Unknown,
                ContentBlock::Text {
                    text: "b".to_string(),
                },
            ],
            stop_reason: None,
        };
        assert_eq!(AnthropicClient::response_text(&res), "a\nb");
        assert!(AnthropicClient::response_tool_shortlist(&res).unwrap().is_none());
    }

    #[test]
    fn tool_schema_pins_contract_sizes() {
        let tools = AnthropicClient::tools();
        let schema = &tools[0].input_schema;
        assert_eq!(schema["properties"]["shortlist"]["minItems"], json!(10));
        assert_eq!(schema["properties"]["top_picks"]["maxItems"], json!(2));
        assert_eq!(
            serde_json::to_value(AnthropicClient::tool_choice()).unwrap(),
            json!({"type": "tool", "name": TOOL_NAME_EMIT_SHORTLIST})
        );
    }
}
