//! Provider Adapter layer (C1, spec.md §4.1).
//!
//! [`Backend`] normalizes every provider's HTTP API behind one capability
//! set: construct a request, make the call, classify the outcome. Built-in
//! adapters: [`openai::OpenAiAdapter`] (OpenAI and any `/v1/chat/completions`
//! compatible host — also backs `ProviderKind::Other`), [`anthropic::AnthropicAdapter`],
//! [`google::GoogleAdapter`], [`huggingface::HuggingFaceAdapter`], and
//! [`mock::MockBackend`] for tests.

pub mod anthropic;
pub mod google;
pub mod huggingface;
pub mod mock;
pub mod openai;
pub mod sse;

pub use mock::MockBackend;

use std::time::Duration;

use async_trait::async_trait;
use regex::RegexSet;
use tokio_util::sync::CancellationToken;

use crate::registry::{ModelDescriptor, ProviderKind};
use crate::types::StageStatus;

/// A normalized, provider-agnostic LLM call.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl AdapterRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: 2048,
            temperature: 0.7,
        }
    }
}

/// A normalized adapter call outcome before it is folded into a
/// [`crate::types::StageOutput`] by the retry handler.
#[derive(Debug, Clone)]
pub struct AdapterOutcome {
    pub status: StageStatus,
    pub content: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Set when the adapter had to estimate token counts via `ceil(bytes/4)`
    /// because the provider didn't report them (spec.md §4.1) — surfaced in
    /// structured events, never in the immutable `StageOutput` itself.
    pub tokens_estimated: bool,
    pub retry_after: Option<Duration>,
}

/// Per-provider request shape, response parsing, and error classification
/// (spec.md §4.1). Object-safe so adapters can be held as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute one call, bounded by `timeout` and `cancel`. Never returns an
    /// `Err` for provider/network failures — those become `AdapterOutcome`
    /// statuses; `Err` is reserved for adapter misuse (e.g. empty prompt).
    async fn invoke(
        &self,
        client: &reqwest::Client,
        descriptor: &ModelDescriptor,
        request: &AdapterRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> crate::error::Result<AdapterOutcome>;

    fn provider_kind(&self) -> ProviderKind;

    fn name(&self) -> &'static str;
}

/// Per-provider rate-limit body patterns (spec.md §4.1: "configuration, not
/// code"). Defaults cover the four built-in providers; callers may override
/// with their own [`RegexSet`] as providers change (spec.md §9 open question).
pub struct RateLimitPatterns {
    patterns: std::collections::HashMap<ProviderKind, RegexSet>,
}

impl RateLimitPatterns {
    pub fn default_table() -> Self {
        let mut patterns = std::collections::HashMap::new();
        patterns.insert(
            ProviderKind::OpenAi,
            RegexSet::new([r"(?i)rate limit", r"(?i)too many requests"]).unwrap(),
        );
        patterns.insert(
            ProviderKind::Anthropic,
            RegexSet::new([r"(?i)rate_limit_error", r"(?i)overloaded_error"]).unwrap(),
        );
        patterns.insert(
            ProviderKind::Google,
            RegexSet::new([r"(?i)RESOURCE_EXHAUSTED", r"(?i)quota"]).unwrap(),
        );
        patterns.insert(
            ProviderKind::HuggingFace,
            RegexSet::new([r"(?i)rate limit", r"(?i)currently loading"]).unwrap(),
        );
        Self { patterns }
    }

    pub fn is_rate_limited_body(&self, provider: ProviderKind, body: &str) -> bool {
        self.patterns
            .get(&provider)
            .map(|set| set.is_match(body))
            .unwrap_or(false)
    }
}

impl Default for RateLimitPatterns {
    fn default() -> Self {
        Self::default_table()
    }
}

/// Pure error classification (spec.md §4.1 table). Shared by every adapter
/// so the table lives in exactly one place rather than being re-derived per
/// provider.
pub fn classify(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
    provider: ProviderKind,
    patterns: &RateLimitPatterns,
) -> StageStatus {
    if (200..300).contains(&status) {
        return StageStatus::Ok;
    }
    if status == 401 || status == 403 {
        return StageStatus::InvalidKey;
    }
    if status == 429 || retry_after.is_some() || patterns.is_rate_limited_body(provider, body) {
        return StageStatus::RateLimited;
    }
    if (500..600).contains(&status) {
        return StageStatus::ProviderError;
    }
    if body.to_lowercase().contains("overloaded") || body.to_lowercase().contains("server_error") {
        return StageStatus::ProviderError;
    }
    StageStatus::ProviderError
}

/// `ceil(bytes/4)` token estimate fallback (spec.md §4.1), shared with
/// [`crate::cost`] so both agree on the same heuristic.
pub fn estimate_tokens(bytes: usize) -> u64 {
    ((bytes as u64) + 3) / 4
}

/// Parse an HTTP `Retry-After` header value. Providers send either a
/// delay-seconds integer or (rarely) an HTTP-date; only the common integer
/// form is supported, matching the teacher's own parsing.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_2xx_is_ok() {
        let patterns = RateLimitPatterns::default_table();
        assert_eq!(
            classify(200, "{}", None, ProviderKind::OpenAi, &patterns),
            StageStatus::Ok
        );
    }

    #[test]
    fn test_classify_401_403_is_invalid_key() {
        let patterns = RateLimitPatterns::default_table();
        assert_eq!(
            classify(401, "unauthorized", None, ProviderKind::OpenAi, &patterns),
            StageStatus::InvalidKey
        );
        assert_eq!(
            classify(403, "forbidden", None, ProviderKind::OpenAi, &patterns),
            StageStatus::InvalidKey
        );
    }

    #[test]
    fn test_classify_429_is_rate_limited() {
        let patterns = RateLimitPatterns::default_table();
        assert_eq!(
            classify(429, "too many requests", None, ProviderKind::OpenAi, &patterns),
            StageStatus::RateLimited
        );
    }

    #[test]
    fn test_classify_retry_after_header_is_rate_limited_even_without_429() {
        let patterns = RateLimitPatterns::default_table();
        assert_eq!(
            classify(
                503,
                "temporarily unavailable",
                Some(Duration::from_secs(2)),
                ProviderKind::OpenAi,
                &patterns
            ),
            StageStatus::RateLimited
        );
    }

    #[test]
    fn test_classify_rate_limit_body_regex() {
        let patterns = RateLimitPatterns::default_table();
        assert_eq!(
            classify(400, "rate_limit_error: slow down", None, ProviderKind::Anthropic, &patterns),
            StageStatus::RateLimited
        );
    }

    #[test]
    fn test_classify_5xx_is_provider_error() {
        let patterns = RateLimitPatterns::default_table();
        assert_eq!(
            classify(500, "internal error", None, ProviderKind::OpenAi, &patterns),
            StageStatus::ProviderError
        );
        assert_eq!(
            classify(503, "service unavailable", None, ProviderKind::Google, &patterns),
            StageStatus::ProviderError
        );
    }

    #[test]
    fn test_classify_overloaded_body_is_provider_error() {
        let patterns = RateLimitPatterns::default_table();
        assert_eq!(
            classify(400, "the model is overloaded", None, ProviderKind::Anthropic, &patterns),
            StageStatus::ProviderError
        );
    }

    #[test]
    fn test_estimate_tokens_ceil_division() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(5), 2);
        assert_eq!(estimate_tokens(400), 100);
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("not-a-number"), None);
    }
}
