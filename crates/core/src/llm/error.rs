use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

/// LLM failure carrying whatever the provider sent back, for the audit trail.
#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl LlmDiagnosticsError {
    /// Best available raw response: the provider JSON, else the text wrapped as `{"raw_text": ..}`.
    pub fn raw_response(&self) -> Option<Value> {
        if let Some(v) = &self.raw_response_json {
            return Some(v.clone());
        }
        let raw = self.raw_output.as_deref()?;
        serde_json::from_str(raw)
            .ok()
            .or_else(|| Some(serde_json::json!({ "raw_text": raw })))
    }

    pub fn raw_response_of(err: &anyhow::Error) -> Option<Value> {
        err.downcast_ref::<Self>().and_then(Self::raw_response)
    }
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM error (provider={}, stage={}): {}",
            self.provider.as_str(),
            self.stage,
            self.detail
        )
    }
}

impl std::error::Error for LlmDiagnosticsError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(raw_output: Option<&str>, raw_response_json: Option<Value>) -> LlmDiagnosticsError {
        LlmDiagnosticsError {
            provider: Provider::Anthropic,
            stage: "parse_after_repair",
            detail: "bad".to_string(),
            raw_output: raw_output.map(str::to_string),
            raw_response_json,
        }
    }

    #[test]
    fn raw_response_prefers_provider_json() {
        let d = diag(Some("text"), Some(serde_json::json!({"id": "msg_1"})));
        assert_eq!(d.raw_response(), Some(serde_json::json!({"id": "msg_1"})));
    }

    #[test]
    fn raw_response_wraps_plain_text() {
        assert_eq!(
            diag(Some("oops"), None).raw_response(),
            Some(serde_json::json!({"raw_text": "oops"}))
        );
        assert_eq!(diag(None, None).raw_response(), None);
    }

    #[test]
    fn recovers_from_anyhow_chain() {
        let err: anyhow::Error = diag(Some("{\"a\":1}"), None).into();
        assert_eq!(
            LlmDiagnosticsError::raw_response_of(&err),
            Some(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            err.to_string(),
            "LLM error (provider=anthropic, stage=parse_after_repair): bad"
        );
        assert_eq!(LlmDiagnosticsError::raw_response_of(&anyhow::anyhow!("x")), None);
    }
}
