//! Process configuration (spec.md §6.4): every tunable the orchestrator
//! reads from the environment, with the documented defaults, loaded once at
//! startup. Construction is the only place this crate is allowed to refuse
//! to start (spec.md §7).

use std::time::Duration;

use crate::error::OrchestrationError;
use crate::registry::ProviderKind;

fn env_duration_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

/// All tunables from spec.md §6.4's environment table, plus the two
/// required auth secrets.
#[derive(Debug, Clone)]
pub struct Settings {
    pub auth_access_secret: String,
    pub auth_refresh_secret: String,

    pub orchestration_timeout: Duration,
    pub initial_response_timeout: Duration,
    pub peer_review_timeout: Duration,
    pub ultra_synthesis_timeout: Duration,
    pub llm_request_timeout: Duration,
    pub concurrent_execution_timeout: Duration,

    pub max_retry_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_exponential_base: f64,
    pub rate_limit_detection_enabled: bool,
    pub rate_limit_retry_enabled: bool,

    pub minimum_models_required: usize,
    pub cache_ttl_seconds: u64,
    pub token_blacklist_fail_open: bool,
    pub allow_single_model: bool,
}

impl Settings {
    /// Load from the process environment, refusing to start if either auth
    /// secret is absent/too short or fewer than 2 provider credentials are
    /// present (unless `ALLOW_SINGLE_MODEL=true`), per spec.md §6.4.
    pub fn from_env() -> Result<Self, OrchestrationError> {
        let auth_access_secret = std::env::var("AUTH_ACCESS_SECRET").map_err(|_| {
            OrchestrationError::InvalidConfig("AUTH_ACCESS_SECRET is required".into())
        })?;
        let auth_refresh_secret = std::env::var("AUTH_REFRESH_SECRET").map_err(|_| {
            OrchestrationError::InvalidConfig("AUTH_REFRESH_SECRET is required".into())
        })?;
        if auth_access_secret.len() < 32 || auth_refresh_secret.len() < 32 {
            return Err(OrchestrationError::InvalidConfig(
                "AUTH_ACCESS_SECRET and AUTH_REFRESH_SECRET must each be at least 32 bytes".into(),
            ));
        }

        let allow_single_model = env_bool("ALLOW_SINGLE_MODEL", false);
        let configured_providers = [
            ProviderKind::OpenAi,
            ProviderKind::Anthropic,
            ProviderKind::Google,
            ProviderKind::HuggingFace,
        ]
        .iter()
        .filter(|p| {
            p.default_credential_env_var()
                .and_then(|var| std::env::var(var).ok())
                .map(|v| !v.is_empty())
                .unwrap_or(false)
        })
        .count();
        if configured_providers < 2 && !allow_single_model {
            return Err(OrchestrationError::InvalidConfig(
                "at least 2 provider credentials are required unless ALLOW_SINGLE_MODEL=true".into(),
            ));
        }

        Ok(Self {
            auth_access_secret,
            auth_refresh_secret,

            orchestration_timeout: env_duration_secs("ORCHESTRATION_TIMEOUT", Duration::from_secs(90)),
            initial_response_timeout: env_duration_secs("INITIAL_RESPONSE_TIMEOUT", Duration::from_secs(60)),
            peer_review_timeout: env_duration_secs("PEER_REVIEW_TIMEOUT", Duration::from_secs(90)),
            ultra_synthesis_timeout: env_duration_secs("ULTRA_SYNTHESIS_TIMEOUT", Duration::from_secs(60)),
            llm_request_timeout: env_duration_secs("LLM_REQUEST_TIMEOUT", Duration::from_secs(45)),
            concurrent_execution_timeout: env_duration_secs("CONCURRENT_EXECUTION_TIMEOUT", Duration::from_secs(50)),

            max_retry_attempts: env_u32("MAX_RETRY_ATTEMPTS", 3),
            retry_initial_delay: env_duration_secs("RETRY_INITIAL_DELAY", Duration::from_secs(1)),
            retry_max_delay: env_duration_secs("RETRY_MAX_DELAY", Duration::from_secs(60)),
            retry_exponential_base: env_f64("RETRY_EXPONENTIAL_BASE", 2.0),
            rate_limit_detection_enabled: env_bool("RATE_LIMIT_DETECTION_ENABLED", true),
            rate_limit_retry_enabled: env_bool("RATE_LIMIT_RETRY_ENABLED", true),

            minimum_models_required: env_usize("MINIMUM_MODELS_REQUIRED", crate::types::DEFAULT_MINIMUM_MODELS_REQUIRED),
            cache_ttl_seconds: env_u32("CACHE_TTL_SECONDS", 3600) as u64,
            token_blacklist_fail_open: env_bool("TOKEN_BLACKLIST_FAIL_OPEN", false),
            allow_single_model,
        })
    }

    pub fn retry_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy {
            max_attempts: self.max_retry_attempts,
            initial_delay: self.retry_initial_delay,
            max_delay: self.retry_max_delay,
            exponential_base: self.retry_exponential_base,
            rate_limit_retry_enabled: self.rate_limit_retry_enabled,
        }
    }
}
