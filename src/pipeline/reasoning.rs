// Reasoning engine boundary
// The engine is an external collaborator: text in, text out. Nothing here
// trusts its output to be well-formed JSON.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::{InvestigationError, Result};

/// External text-in/text-out reasoning collaborator
///
/// Implementations wrap whatever model or service generates hypotheses; the
/// pipeline only ever sees a prompt and a returned string.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn reason(&self, prompt: &str) -> Result<String>;
}

/// Reasoning engine over a chat-completions style HTTP endpoint
pub struct HttpReasoningEngine {
    client: reqwest::Client,
    endpoint_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl HttpReasoningEngine {
    pub fn new(
        endpoint_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        HttpReasoningEngine {
            client: reqwest::Client::new(),
            endpoint_url: endpoint_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReasoningEngine for HttpReasoningEngine {
    async fn reason(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(&self.endpoint_url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| InvestigationError::Internal(format!("reasoning request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvestigationError::Internal(format!(
                "reasoning endpoint returned {}: {}",
                status, body
            )));
        }

        let value: serde_json::Value = response.json().await.map_err(|e| {
            InvestigationError::Internal(format!("unparseable reasoning response: {}", e))
        })?;

        value
            .pointer("/choices/0/message/content")
            .and_then(serde_json::Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                InvestigationError::Internal("reasoning response carried no content".to_string())
            })
    }
}

/// Extract a JSON value from possibly-noisy reasoning output
///
/// Accepts, in order of preference:
/// 1. the whole string as JSON
/// 2. the contents of a fenced ``` block
/// 3. the widest `{...}` or `[...]` slice in the text
///
/// Anything else is a [`InvestigationError::ReasoningParse`]; callers
/// substitute their documented default and carry on.
pub fn extract_json(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(block.trim()) {
            return Ok(value);
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }

    Err(InvestigationError::ReasoningParse(format!(
        "no JSON found in {} chars of output",
        text.len()
    )))
}

/// The contents of the first fenced code block, if any
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag on the fence line
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    /// Canned reasoning engine: answers by first matching prompt substring
    pub(crate) struct CannedReasoning {
        answers: Vec<(String, String)>,
        fallback: String,
    }

    impl CannedReasoning {
        pub(crate) fn new(fallback: &str) -> Self {
            CannedReasoning {
                answers: Vec::new(),
                fallback: fallback.to_string(),
            }
        }

        pub(crate) fn answer(mut self, prompt_contains: &str, response: &str) -> Self {
            self.answers
                .push((prompt_contains.to_string(), response.to_string()));
            self
        }

        pub(crate) fn from_map(map: HashMap<String, String>, fallback: &str) -> Self {
            CannedReasoning {
                answers: map.into_iter().collect(),
                fallback: fallback.to_string(),
            }
        }
    }

    #[async_trait]
    impl ReasoningEngine for CannedReasoning {
        async fn reason(&self, prompt: &str) -> Result<String> {
            for (needle, response) in &self.answers {
                if prompt.contains(needle) {
                    return Ok(response.clone());
                }
            }
            Ok(self.fallback.clone())
        }
    }

    #[test]
    fn test_extract_plain_json() {
        let value = extract_json(r#"{"severity": "high"}"#).unwrap();
        assert_eq!(value, json!({"severity": "high"}));
    }

    #[test]
    fn test_extract_fenced_json() {
        let text = "Here is the analysis:\n```json\n{\"findings\": []}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value, json!({"findings": []}));
    }

    #[test]
    fn test_extract_embedded_json() {
        let text = "Based on the commits, I believe {\"summary\": \"bad deploy\", \"confidence\": 0.8} covers it.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["summary"], "bad deploy");
    }

    #[test]
    fn test_extract_embedded_array() {
        let text = "Suggested items: [\"rollback\", \"add alert\"]";
        let value = extract_json(text).unwrap();
        assert_eq!(value, json!(["rollback", "add alert"]));
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let err = extract_json("I am not sure what happened here.").unwrap_err();
        assert!(matches!(err, InvestigationError::ReasoningParse(_)));
    }

    #[test]
    fn test_unbalanced_braces_are_a_parse_error() {
        assert!(extract_json("oops { not json").is_err());
    }
}
