//! Adapter for OpenAI and any `/v1/chat/completions`-compatible host
//! (spec.md §9: `ProviderKind::Other` is never a dead end — this same
//! adapter backs it with a caller-supplied base URL).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{classify, estimate_tokens, parse_retry_after, AdapterOutcome, AdapterRequest, Backend, RateLimitPatterns};
use crate::error::Result;
use crate::registry::{ModelDescriptor, ProviderKind};
use crate::types::StageStatus;

/// Adapter for OpenAI-shaped chat completion APIs.
pub struct OpenAiAdapter {
    base_url: String,
    provider_kind: ProviderKind,
    patterns: RateLimitPatterns,
}

impl OpenAiAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            provider_kind: ProviderKind::OpenAi,
            patterns: RateLimitPatterns::default_table(),
        }
    }

    /// Same request shape, different `ProviderKind` — used for
    /// `ProviderKind::Other` (spec.md §9) where a caller points an
    /// OpenAI-compatible host (vLLM, Together, Groq, ...) at a model id.
    pub fn with_provider_kind(mut self, provider_kind: ProviderKind) -> Self {
        self.provider_kind = provider_kind;
        self
    }

    fn build_body(descriptor: &ModelDescriptor, request: &AdapterRequest) -> Value {
        json!({
            "model": descriptor.model_id,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false,
        })
    }

    fn extract_tokens(json_resp: &Value) -> Option<(u64, u64)> {
        let usage = json_resp.get("usage")?;
        let input = usage.get("prompt_tokens")?.as_u64()?;
        let output = usage.get("completion_tokens")?.as_u64()?;
        Some((input, output))
    }
}

#[async_trait]
impl Backend for OpenAiAdapter {
    async fn invoke(
        &self,
        client: &reqwest::Client,
        descriptor: &ModelDescriptor,
        request: &AdapterRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AdapterOutcome> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = Self::build_body(descriptor, request);
        let api_key = std::env::var(&descriptor.credential_env_var).unwrap_or_default();

        let send = client
            .post(&url)
            .bearer_auth(&api_key)
            .json(&body)
            .send();

        let resp = tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(AdapterOutcome {
                    status: StageStatus::Cancelled,
                    content: None,
                    input_tokens: 0,
                    output_tokens: 0,
                    tokens_estimated: false,
                    retry_after: None,
                });
            }
            result = tokio::time::timeout(timeout, send) => {
                match result {
                    Err(_elapsed) => {
                        return Ok(AdapterOutcome {
                            status: StageStatus::Timeout,
                            content: None,
                            input_tokens: 0,
                            output_tokens: 0,
                            tokens_estimated: false,
                            retry_after: None,
                        });
                    }
                    Ok(Err(_transport_err)) => {
                        return Ok(AdapterOutcome {
                            status: StageStatus::ProviderError,
                            content: None,
                            input_tokens: 0,
                            output_tokens: 0,
                            tokens_estimated: false,
                            retry_after: None,
                        });
                    }
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
            let status = classify(status_code, &text, retry_after, self.provider_kind, &self.patterns);
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
            Err(_) => {
                return Ok(AdapterOutcome {
                    status: StageStatus::ProviderError,
                    content: None,
                    input_tokens: 0,
                    output_tokens: 0,
                    tokens_estimated: false,
                    retry_after: None,
                });
            }
        };

        let content = json_resp
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let Some(content) = content else {
            return Ok(AdapterOutcome {
                status: StageStatus::ProviderError,
                content: None,
                input_tokens: 0,
                output_tokens: 0,
                tokens_estimated: false,
                retry_after: None,
            });
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
        self.provider_kind
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelDescriptor;

    #[test]
    fn test_build_body_shape() {
        let descriptor = ModelDescriptor::new("gpt-4o", ProviderKind::OpenAi, "OPENAI_API_KEY");
        let request = AdapterRequest::new("gpt-4o", "hello");
        let body = OpenAiAdapter::build_body(&descriptor, &request);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_extract_tokens_present() {
        let resp = json!({"usage": {"prompt_tokens": 10, "completion_tokens": 20}});
        assert_eq!(OpenAiAdapter::extract_tokens(&resp), Some((10, 20)));
    }

    #[test]
    fn test_extract_tokens_absent() {
        let resp = json!({});
        assert_eq!(OpenAiAdapter::extract_tokens(&resp), None);
    }

    #[test]
    fn test_with_provider_kind_overrides_default() {
        let adapter = OpenAiAdapter::new("http://localhost:8000").with_provider_kind(ProviderKind::Other);
        assert_eq!(adapter.provider_kind(), ProviderKind::Other);
    }
}
