//! Crate-wide error type.
//!
//! Per the orchestrator's design, failures inside a run (provider errors,
//! insufficient models, synthesis fallback, cancellation) are represented
//! as *data* — [`crate::pipeline::StageStatus`] / [`crate::pipeline::OrchestrationResult`]
//! — not as a raised error. [`OrchestrationError`] is reserved for the
//! failures that are allowed to cross a boundary: malformed input,
//! authentication rejection, cost-cap rejection, and configuration errors
//! raised at process start.

use thiserror::Error;

/// Errors produced by the orchestration core.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The request was malformed (spec.md §8 boundary behaviors).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Authentication failed: missing, malformed, expired, or revoked token.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Projected cost exceeds the caller's `cost_cap_usd` before any dispatch.
    #[error("projected cost {projected_usd:.4} exceeds cap {cap_usd:.4}")]
    CapExceeded { projected_usd: f64, cap_usd: f64 },

    /// Configuration is invalid or incomplete at construction time. The only
    /// error variant this crate expects to abort process startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The run or adapter call was cancelled via its cancellation token.
    #[error("cancelled")]
    Cancelled,

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for OrchestrationError {
    fn from(err: anyhow::Error) -> Self {
        OrchestrationError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestrationError>;
