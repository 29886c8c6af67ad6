//! Adapter for HuggingFace's hosted inference API.
//!
//! Response shapes vary across hosted-inference endpoints (spec.md §9 open
//! question); this adapter covers the common text-generation array shape
//! and treats anything else as a schema-validation failure
//! (`provider_error`, spec.md §4.1's "2xx but body fails schema validation"
//! row).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::{classify, estimate_tokens, parse_retry_after, AdapterOutcome, AdapterRequest, Backend, RateLimitPatterns};
use crate::error::Result;
use crate::registry::{ModelDescriptor, ProviderKind};
use crate::types::StageStatus;

pub struct HuggingFaceAdapter {
    base_url: String,
    patterns: RateLimitPatterns,
}

impl HuggingFaceAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            patterns: RateLimitPatterns::default_table(),
        }
    }

    fn build_body(request: &AdapterRequest) -> Value {
        json!({
            "inputs": request.prompt,
            "parameters": {
                "temperature": request.temperature,
                "max_new_tokens": request.max_tokens,
            },
        })
    }

    /// HuggingFace's text-generation response is a top-level array of
    /// `{generated_text}` objects; malformed/unexpected shapes return `None`
    /// so the caller can classify as `provider_error`.
    fn extract_content(json_resp: &Value) -> Option<String> {
        json_resp
            .as_array()?
            .first()?
            .get("generated_text")?
            .as_str()
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl Backend for HuggingFaceAdapter {
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
            "{}/models/{}",
            self.base_url.trim_end_matches('/'),
            descriptor.model_id
        );
        let body = Self::build_body(request);

        let send = client.post(&url).bearer_auth(&api_key).json(&body).send();

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
            let status = classify(status_code, &text, retry_after, ProviderKind::HuggingFace, &self.patterns);
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

        let Some(content) = Self::extract_content(&json_resp) else {
            return Ok(AdapterOutcome {
                status: StageStatus::ProviderError,
                content: None,
                input_tokens: 0,
                output_tokens: 0,
                tokens_estimated: false,
                retry_after: None,
            });
        };

        // HuggingFace's inference API does not report token usage; always estimated.
        let input_tokens = estimate_tokens(request.prompt.len());
        let output_tokens = estimate_tokens(content.len());

        Ok(AdapterOutcome {
            status: StageStatus::Ok,
            content: Some(content),
            input_tokens,
            output_tokens,
            tokens_estimated: true,
            retry_after: None,
        })
    }

    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::HuggingFace
    }

    fn name(&self) -> &'static str {
        "huggingface"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_body_shape() {
        let request = AdapterRequest::new("llama-3", "hello");
        let body = HuggingFaceAdapter::build_body(&request);
        assert_eq!(body["inputs"], "hello");
    }

    #[test]
    fn test_extract_content_well_formed() {
        let resp = json!([{"generated_text": "hi there"}]);
        assert_eq!(HuggingFaceAdapter::extract_content(&resp), Some("hi there".to_string()));
    }

    #[test]
    fn test_extract_content_malformed_shape() {
        let resp = json!({"error": "model loading"});
        assert_eq!(HuggingFaceAdapter::extract_content(&resp), None);
    }

    #[test]
    fn test_extract_content_empty_array() {
        let resp = json!([]);
        assert_eq!(HuggingFaceAdapter::extract_content(&resp), None);
    }
}
