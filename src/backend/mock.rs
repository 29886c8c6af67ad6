//! Mock backend for testing the orchestrator without live HTTP calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{AdapterOutcome, AdapterRequest, Backend};
use crate::error::Result;
use crate::registry::{ModelDescriptor, ProviderKind};
use crate::types::StageStatus;

/// A scripted outcome returned by [`MockBackend`], cycling when exhausted.
#[derive(Debug, Clone)]
pub struct ScriptedOutcome {
    pub status: StageStatus,
    pub content: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ScriptedOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Ok,
            content: Some(content.into()),
            input_tokens: 10,
            output_tokens: 10,
        }
    }

    pub fn failing(status: StageStatus) -> Self {
        Self {
            status,
            content: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// A test backend that returns scripted outcomes in order, cycling back to
/// the start when exhausted (spec.md's seed scenarios S2/S3 script a
/// specific sequence of failures then success).
#[derive(Debug)]
pub struct MockBackend {
    provider_kind: ProviderKind,
    outcomes: Vec<ScriptedOutcome>,
    index: AtomicUsize,
    call_count: AtomicUsize,
}

impl MockBackend {
    pub fn new(provider_kind: ProviderKind, outcomes: Vec<ScriptedOutcome>) -> Self {
        assert!(!outcomes.is_empty(), "MockBackend requires at least one outcome");
        Self {
            provider_kind,
            outcomes,
            index: AtomicUsize::new(0),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn fixed(provider_kind: ProviderKind, content: impl Into<String>) -> Self {
        Self::new(provider_kind, vec![ScriptedOutcome::ok(content)])
    }

    pub fn calls_made(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    fn next_outcome(&self) -> ScriptedOutcome {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.outcomes.len();
        self.outcomes[idx].clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn invoke(
        &self,
        _client: &reqwest::Client,
        _descriptor: &ModelDescriptor,
        _request: &AdapterRequest,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AdapterOutcome> {
        if cancel.is_cancelled() {
            return Ok(AdapterOutcome {
                status: StageStatus::Cancelled,
                content: None,
                input_tokens: 0,
                output_tokens: 0,
                tokens_estimated: false,
                retry_after: None,
            });
        }
        let outcome = self.next_outcome();
        Ok(AdapterOutcome {
            status: outcome.status,
            content: outcome.content,
            input_tokens: outcome.input_tokens,
            output_tokens: outcome.output_tokens,
            tokens_estimated: false,
            retry_after: None,
        })
    }

    fn provider_kind(&self) -> ProviderKind {
        self.provider_kind
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
