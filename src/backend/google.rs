//! Adapter for Google's `generateContent` API (Gemini).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{classify, estimate_tokens, parse_retry_after, AdapterOutcome, AdapterRequest, Backend, RateLimitPatterns};
use crate::error::Result;
use crate::registry::{ModelDescriptor, ProviderKind};
use crate::types::StageStatus;

pub struct GoogleAdapter {
    base_url: String,
    patterns: RateLimitPatterns,
}

impl GoogleAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            patterns: RateLimitPatterns::default_table(),
        }
    }

    fn build_body(request: &AdapterRequest) -> Value {
        json!({
            "contents": [{"parts": [{"text": request.prompt}]}],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        })
    }

    fn extract_tokens(json_resp: &Value) -> Option<(u64, u64)> {
        let usage = json_resp.get("usageMetadata")?;
        let input = usage.get("promptTokenCount")?.as_u64()?;
        let output = usage.get("candidatesTokenCount")?.as_u64()?;
        Some((input, output))
    }
}

#[async_trait]
impl Backend for GoogleAdapter {
    async fn invoke(
        &self,
        client: &reqwest::Client,
        descriptor: &ModelDescriptor,
        request: &AdapterRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AdapterOutcome> {
        let api_key = std::env::var(&descriptor.credential_env_var).unwrap_or_default();
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            descriptor.model_id,
            api_key
        );
        let body = Self::build_body(request);

        let send = client.post(&url).json(&body).send();

        let resp = tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(AdapterOutcome { status: StageStatus::Cancelled, content: None, input_tokens: 0, output_tokens: 0, tokens_estimated: false, retry_after: None });
            }
            result = tokio::time::timeout(timeout, send) => {
                match result {
                    Err(_elapsed) => return Ok(AdapterOutcome { status: StageStatus::Timeout, content: None, input_tokens: 0, output_tokens: 0, tokens_estimated: false, retry_after: None }),
                    Ok(Err(_transport_err)) => return Ok(AdapterOutcome { status: StageStatus::ProviderError, content: None, input_tokens: 0, output_tokens: 0, tokens_estimated: false, retry_after: None }),
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
            let status = classify(status_code, &text, retry_after, ProviderKind::Google, &self.patterns);
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
                })
            }
        };

        let content = json_resp
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
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
        ProviderKind::Google
    }

    fn name(&self) -> &'static str {
        "google"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_body_shape() {
        let request = AdapterRequest::new("gemini-1.5-pro", "hello");
        let body = GoogleAdapter::build_body(&request);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn test_extract_tokens_present() {
        let resp = json!({"usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 9}});
        assert_eq!(GoogleAdapter::extract_tokens(&resp), Some((3, 9)));
    }
}
