//! Model Registry (C3): the authoritative catalog of supported models and
//! the credential pre-flight that lets the orchestrator short-circuit a
//! dispatch without ever making a network call.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::backend::Backend;

/// Opaque model identifier, unique within a single orchestration run.
pub type ModelId = String;

/// Tagged provider variant. Determines request shape, auth header form,
/// and error classification rules (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    HuggingFace,
    Other,
}

impl ProviderKind {
    /// Multiplier applied to the base retry delay for this provider
    /// (spec.md §4.1): OpenAI 1.5, Anthropic 1.2, Google 1.0, HuggingFace 2.0.
    pub fn backoff_multiplier(self) -> f64 {
        match self {
            ProviderKind::OpenAi => 1.5,
            ProviderKind::Anthropic => 1.2,
            ProviderKind::Google => 1.0,
            ProviderKind::HuggingFace => 2.0,
            ProviderKind::Other => 1.0,
        }
    }

    /// The environment variable name conventionally holding this
    /// provider's credential, for the four built-ins named in spec.md §6.4.
    pub fn default_credential_env_var(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Google => Some("GOOGLE_API_KEY"),
            ProviderKind::HuggingFace => Some("HUGGINGFACE_API_KEY"),
            ProviderKind::Other => None,
        }
    }
}

/// Immutable-after-registration descriptor for one model (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub model_id: ModelId,
    pub provider_kind: ProviderKind,
    pub credential_env_var: String,
    pub cost_per_1k_input_tokens: f64,
    pub cost_per_1k_output_tokens: f64,
    pub max_context_tokens: u32,
}

impl ModelDescriptor {
    pub fn new(
        model_id: impl Into<String>,
        provider_kind: ProviderKind,
        credential_env_var: impl Into<String>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            provider_kind,
            credential_env_var: credential_env_var.into(),
            cost_per_1k_input_tokens: 0.0,
            cost_per_1k_output_tokens: 0.0,
            max_context_tokens: 128_000,
        }
    }

    pub fn with_rates(mut self, input_per_1k: f64, output_per_1k: f64) -> Self {
        self.cost_per_1k_input_tokens = input_per_1k;
        self.cost_per_1k_output_tokens = output_per_1k;
        self
    }

    pub fn with_max_context(mut self, tokens: u32) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    /// Checks presence, not validity, of the configured credential
    /// environment variable (spec.md §4.3).
    pub fn has_credential(&self) -> bool {
        std::env::var(&self.credential_env_var)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }
}

/// Read-only-after-load catalog of models (spec.md §3, §4.3).
///
/// Safe to share across an entire process via `Arc` — nothing here is
/// mutated after construction.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Arc<HashMap<ModelId, ModelDescriptor>>,
}

impl ModelRegistry {
    /// Build a registry from an explicit descriptor list.
    pub fn new(descriptors: Vec<ModelDescriptor>) -> Self {
        let models = descriptors
            .into_iter()
            .map(|d| (d.model_id.clone(), d))
            .collect();
        Self {
            models: Arc::new(models),
        }
    }

    /// `resolve(modelId) -> ModelDescriptor | not-found` (spec.md §4.3).
    pub fn resolve(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.get(model_id)
    }

    /// `listAvailable() -> sequence of ModelDescriptor where hasCredential(d)`.
    pub fn list_available(&self) -> Vec<&ModelDescriptor> {
        self.models.values().filter(|d| d.has_credential()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Parallel capability discovery at process start (spec.md §4.3):
    /// probes every registered backend concurrently rather than serially.
    /// `probe` is a cheap, provider-specific health check (e.g. a models
    /// list call); its result is purely informational and never blocks
    /// registration — a failed probe just gets logged by the caller.
    pub async fn warm_up<F, Fut>(&self, backend_for: F)
    where
        F: Fn(&ModelDescriptor) -> Option<(Arc<dyn Backend>, Fut)>,
        Fut: std::future::Future<Output = ()>,
    {
        let mut probes = Vec::new();
        for descriptor in self.models.values() {
            if let Some((_backend, fut)) = backend_for(descriptor) {
                probes.push(fut);
            }
        }
        join_all(probes).await;
    }
}
