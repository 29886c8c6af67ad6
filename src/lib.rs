//! # Ultra Core
//!
//! The orchestration core behind UltraAI's multi-provider LLM pipeline:
//! fan out a query to several models, have them peer-review each other, and
//! synthesize one final answer — with retry/backoff, credential-aware
//! dispatch, a content-addressed cache, cost projection, and a revocable
//! JWT auth layer sitting in front of it.
//!
//! ## Layout
//!
//! - [`registry`] — the model catalog (C3): provider kind, credential env
//!   var, per-model cost rates, presence-only credential checks.
//! - [`backend`] — provider adapters (C1): one [`backend::Backend`] per
//!   provider, normalizing OpenAI/Anthropic/Google/HuggingFace behind one
//!   trait, plus the shared error-classification table.
//! - [`retry`] — the retry handler (C2): retryable-status decisions and
//!   jittered exponential backoff.
//! - [`stage`] — prompt construction for each of the three pipeline stages.
//! - [`pipeline`] — the orchestrator (C7): the 3-stage state machine tying
//!   everything together, with both a one-shot and a streaming entry point.
//! - [`context`] — the request context (C8): correlation id, deadline,
//!   cancellation, event sink.
//! - [`events`] — the structured event catalogue (C8/C9).
//! - [`cost`] — cost estimation (C10): pre-flight projection and post-hoc
//!   actuals from the same token-estimate heuristic.
//! - [`cache`] — the result cache (C6): content-addressed, TTL-bounded.
//! - [`stream`] — the streaming-mode event contract (C11).
//! - [`auth`] — token issuance, validation, and revocation (C4/C5).
//! - [`config`] — environment-driven settings, loaded once at startup.
//! - [`types`] — the data model shared by every component.
//! - [`error`] — the crate-wide error type.

pub mod auth;
pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod stage;
pub mod stream;
pub mod types;

pub use auth::{AuthGate, BlacklistStore, Claims, FileBlacklist, InMemoryBlacklist, TokenType};
pub use backend::{AdapterOutcome, AdapterRequest, Backend};
pub use cache::OrchestrationCache;
pub use config::Settings;
pub use context::RequestContext;
pub use error::{OrchestrationError, Result};
pub use events::{Event, EventSink};
pub use pipeline::Orchestrator;
pub use registry::{ModelDescriptor, ModelId, ModelRegistry, ProviderKind};
pub use retry::RetryPolicy;
pub use stream::{ErrorCode, StreamEvent, StreamSink};
pub use types::{
    OrchestrationOptions, OrchestrationRequest, OrchestrationResult, RunStatus, Stage,
    StageOutput, StageResult, StageStatus,
};
