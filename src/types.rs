//! Data model (spec.md §3): the value types that flow between every
//! component. Nothing here performs I/O; construction and validation are
//! synchronous and infallible except [`OrchestrationRequest::validate`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::registry::ModelId;

/// Upper bound on `query` length (spec.md §3, §8).
pub const MAX_QUERY_BYTES: usize = 32 * 1024;

/// Minimum distinct models a stage needs to proceed (spec.md §4.7), mirrored
/// by the `MINIMUM_MODELS_REQUIRED` env knob in [`crate::config::Settings`].
pub const DEFAULT_MINIMUM_MODELS_REQUIRED: usize = 2;

/// One of the three pipeline stages (spec.md §4.7). Intentionally not
/// exhaustively matched on by [`crate::pipeline::Orchestrator`] internals
/// where avoidable, so a future fourth stage (spec.md §9's
/// `hyper_level_analysis` open question) can be appended without touching
/// stage 1-3 semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initial,
    PeerReview,
    UltraSynthesis,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initial => "initial",
            Stage::PeerReview => "peer_review",
            Stage::UltraSynthesis => "ultra_synthesis",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-(stage, model) classification (spec.md §3, §4.1 error table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Timeout,
    RateLimited,
    InvalidKey,
    ProviderError,
    Cancelled,
}

impl StageStatus {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            StageStatus::RateLimited | StageStatus::ProviderError | StageStatus::Timeout
        )
    }
}

/// Immutable once written (spec.md §3). One per (stage, model) dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    pub model_id: ModelId,
    pub stage: Stage,
    pub status: StageStatus,
    /// Present iff `status == Ok`.
    pub content: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub attempt_count: u32,
}

impl StageOutput {
    pub fn is_ok(&self) -> bool {
        self.status == StageStatus::Ok
    }
}

/// One stage's fan-out result, ordered by dispatch order (spec.md §3, §8
/// invariant 1 — NOT completion order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub per_model_outputs: Vec<StageOutput>,
    pub successful_count: usize,
    pub failed_count: usize,
}

impl StageResult {
    pub fn from_outputs(stage: Stage, per_model_outputs: Vec<StageOutput>) -> Self {
        let successful_count = per_model_outputs.iter().filter(|o| o.is_ok()).count();
        let failed_count = per_model_outputs.len() - successful_count;
        Self {
            stage,
            per_model_outputs,
            successful_count,
            failed_count,
        }
    }

    pub fn successful(&self) -> impl Iterator<Item = &StageOutput> {
        self.per_model_outputs.iter().filter(|o| o.is_ok())
    }
}

/// Terminal run status (spec.md §4.7 state machine summary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Cancelled,
    InsufficientModels,
    SynthesisUnavailable,
    CapExceeded,
    InternalError,
}

/// Per-request options (spec.md §3, §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationOptions {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub estimate_only: bool,
    #[serde(default)]
    pub cost_cap_usd: Option<f64>,
}

impl Default for OrchestrationOptions {
    fn default() -> Self {
        Self {
            streaming: false,
            estimate_only: false,
            cost_cap_usd: None,
        }
    }
}

/// A caller's request to run the pipeline (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationRequest {
    pub request_id: Uuid,
    pub user_id: String,
    pub query: String,
    pub model_ids: Vec<ModelId>,
    pub synthesizer_model_id: ModelId,
    #[serde(default)]
    pub options: OrchestrationOptions,
}

impl OrchestrationRequest {
    pub fn new(
        user_id: impl Into<String>,
        query: impl Into<String>,
        model_ids: Vec<ModelId>,
        synthesizer_model_id: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: user_id.into(),
            query: query.into(),
            model_ids,
            synthesizer_model_id: synthesizer_model_id.into(),
            options: OrchestrationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OrchestrationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    /// Boundary validation (spec.md §8): non-empty, non-oversized query;
    /// `modelIds` cardinality 2..N with no duplicates.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if self.query.is_empty() {
            return Err(OrchestrationError::InvalidInput("query must not be empty".into()));
        }
        if self.query.len() > MAX_QUERY_BYTES {
            return Err(OrchestrationError::InvalidInput(format!(
                "query length {} exceeds {} byte limit",
                self.query.len(),
                MAX_QUERY_BYTES
            )));
        }
        if self.model_ids.len() < 2 {
            return Err(OrchestrationError::InvalidInput(
                "at least 2 models are required".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for id in &self.model_ids {
            if !seen.insert(id) {
                return Err(OrchestrationError::InvalidInput(format!(
                    "duplicate model id: {id}"
                )));
            }
        }
        Ok(())
    }
}

/// Final persisted/returned result (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub request_id: Uuid,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
    pub final_answer: Option<String>,
    /// Set when stage 3 fell back to the longest peer-review output
    /// verbatim (spec.md §4.7).
    #[serde(default)]
    pub synthesis_fallback: bool,
    pub total_latency_ms: u64,
    pub estimated_cost_usd: f64,
}
