//! Adapter for Anthropic's `/v1/messages` API.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{classify, estimate_tokens, parse_retry_after, AdapterOutcome, AdapterRequest, Backend, RateLimitPatterns};
use crate::error::Result;
use crate::registry::{ModelDescriptor, ProviderKind};
use crate::types::StageStatus;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    base_url: String,
    patterns: RateLimitPatterns,
}

impl AnthropicAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            patterns: RateLimitPatterns::default_table(),
        }
    }

    fn build_body(descriptor: &ModelDescriptor, request: &AdapterRequest) -> Value {
        json!({
            "model": descriptor.model_id,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        })
    }

    fn extract_tokens(json_resp: &Value) -> Option<(u64, u64)> {
        let usage = json_resp.get("usage")?;
        let input = usage.get("input_tokens")?.as_u64()?;
        let output = usage.get("output_tokens")?.as_u64()?;
        Some((input, output))
    }
}

#[async_trait]
impl Backend for AnthropicAdapter {
    async fn invoke(
        &self,
        client: &reqwest::Client,
        descriptor: &ModelDescriptor,
        request: &AdapterRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AdapterOutcome> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = Self::build_body(descriptor, request);
        let api_key = std::env::var(&descriptor.credential_env_var).unwrap_or_default();

        let send = client
            .post(&url)
            .header("x-api-key", &api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send();

        let resp = tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(cancelled_outcome());
            }
            result = tokio::time::timeout(timeout, send) => {
                match result {
                    Err(_elapsed) => return Ok(timeout_outcome()),
                    Ok(Err(_transport_err)) => return Ok(provider_error_outcome(None)),
                    Ok(Ok(resp)) => resp,
                }
            }
        };

        let status_code = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            let status = classify(status_code, &text, retry_after, ProviderKind::Anthropic, &self.patterns);
            return Ok(AdapterOutcome {
                status,
                content: None,
                input_tokens: 0,
                output_tokens: 0,
                tokens_estimated: false,
                retry_after,
            });
        }

        let json_resp: Value = match resp.json().await {
            Ok(v) => v,
            Err(_) => return Ok(provider_error_outcome(None)),
        };

        let content = json_resp
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let Some(content) = content else {
            return Ok(provider_error_outcome(None));
        };

        let (input_tokens, output_tokens, tokens_estimated) = match Self::extract_tokens(&json_resp) {
            Some((i, o)) => (i, o, false),
            None => (estimate_tokens(request.prompt.len()), estimate_tokens(content.len()), true),
        };

        Ok(AdapterOutcome {
            status: StageStatus::Ok,
            content: Some(content),
            input_tokens,
            output_tokens,
            tokens_estimated,
            retry_after: None,
        })
    }

    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

fn cancelled_outcome() -> AdapterOutcome {
    AdapterOutcome {
        status: StageStatus::Cancelled,
        content: None,
        input_tokens: 0,
        output_tokens: 0,
        tokens_estimated: false,
        retry_after: None,
    }
}

fn timeout_outcome() -> AdapterOutcome {
    AdapterOutcome {
        status: StageStatus::Timeout,
        content: None,
        input_tokens: 0,
        output_tokens: 0,
        tokens_estimated: false,
        retry_after: None,
    }
}

fn provider_error_outcome(retry_after: Option<Duration>) -> AdapterOutcome {
    AdapterOutcome {
        status: StageStatus::ProviderError,
        content: None,
        input_tokens: 0,
        output_tokens: 0,
        tokens_estimated: false,
        retry_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_body_shape() {
        let descriptor = ModelDescriptor::new("claude-3-5-sonnet", ProviderKind::Anthropic, "ANTHROPIC_API_KEY");
        let request = AdapterRequest::new("claude-3-5-sonnet", "hello");
        let body = AnthropicAdapter::build_body(&descriptor, &request);
        assert_eq!(body["model"], "claude-3-5-sonnet");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_extract_tokens_present() {
        let resp = json!({"usage": {"input_tokens": 5, "output_tokens": 7}});
        assert_eq!(AnthropicAdapter::extract_tokens(&resp), Some((5, 7)));
    }
}
