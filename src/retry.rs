//! Retry Handler (C2, spec.md §4.2): decides whether a failure is
//! retryable, computes jittered backoff, and enforces the attempt budget.

use std::time::Duration;

use crate::registry::ProviderKind;
use crate::types::StageStatus;

/// `MAX_RETRY_ATTEMPTS` default (spec.md §6.4).
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
/// `RETRY_INITIAL_DELAY` default.
pub const DEFAULT_RETRY_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// `RETRY_MAX_DELAY` default.
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(60);
/// `RETRY_EXPONENTIAL_BASE` default.
pub const DEFAULT_RETRY_EXPONENTIAL_BASE: f64 = 2.0;

/// Retry policy generalized from the backoff knobs in spec.md §6.4. Unlike
/// the teacher's fixed presets, every field is meant to be populated from
/// [`crate::config::Settings`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub rate_limit_retry_enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            initial_delay: DEFAULT_RETRY_INITIAL_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
            exponential_base: DEFAULT_RETRY_EXPONENTIAL_BASE,
            rate_limit_retry_enabled: true,
        }
    }
}

impl RetryPolicy {
    /// Whether `status` on `attempt` (1-indexed, the attempt that just
    /// failed) should be retried at all, ignoring remaining deadline
    /// (spec.md §4.2).
    pub fn should_retry(&self, status: StageStatus, attempt: u32) -> bool {
        if attempt > self.max_attempts {
            return false;
        }
        match status {
            StageStatus::RateLimited => self.rate_limit_retry_enabled,
            StageStatus::ProviderError | StageStatus::Timeout => true,
            StageStatus::InvalidKey | StageStatus::Cancelled | StageStatus::Ok => false,
        }
    }

    /// Backoff delay before retrying `attempt` (1-indexed: this is the
    /// delay *before* attempt number `attempt + 1`), per spec.md §4.2:
    /// `min(max_delay, initial * base^(attempt-1) * provider_mult) * uniform(0.5, 1.5)`.
    pub fn delay_for_attempt(&self, attempt: u32, provider: ProviderKind) -> Duration {
        let exponent = (attempt.saturating_sub(1)) as i32;
        let base = self.initial_delay.as_secs_f64()
            * self.exponential_base.powi(exponent)
            * provider.backoff_multiplier();
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = 0.5 + fastrand::f64();
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }

    /// A parseable `Retry-After` always wins over the computed delay, still
    /// bounded by `max_delay` and (by the caller) the remaining deadline.
    pub fn delay_with_retry_after(
        &self,
        attempt: u32,
        provider: ProviderKind,
        retry_after: Option<Duration>,
    ) -> Duration {
        match retry_after {
            Some(ra) => ra.min(self.max_delay),
            None => self.delay_for_attempt(attempt, provider),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry_retryable_statuses() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(StageStatus::RateLimited, 1));
        assert!(policy.should_retry(StageStatus::ProviderError, 1));
        assert!(policy.should_retry(StageStatus::Timeout, 1));
    }

    #[test]
    fn test_should_retry_never_retries_terminal_statuses() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(StageStatus::InvalidKey, 1));
        assert!(!policy.should_retry(StageStatus::Cancelled, 1));
        assert!(!policy.should_retry(StageStatus::Ok, 1));
    }

    #[test]
    fn test_should_retry_respects_attempt_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(StageStatus::ProviderError, policy.max_attempts));
        assert!(!policy.should_retry(StageStatus::ProviderError, policy.max_attempts + 1));
    }

    #[test]
    fn test_should_retry_disabled_rate_limit_retry() {
        let policy = RetryPolicy {
            rate_limit_retry_enabled: false,
            ..RetryPolicy::default()
        };
        assert!(!policy.should_retry(StageStatus::RateLimited, 1));
    }

    #[test]
    fn test_delay_grows_exponentially_before_jitter() {
        let policy = RetryPolicy::default();
        // At the midpoint of the jitter range (uniform(0.5, 1.5) averages to 1.0)
        // the delay should roughly double per attempt; assert the ceiling.
        let d1 = policy.delay_for_attempt(1, ProviderKind::Google); // multiplier 1.0
        let d2 = policy.delay_for_attempt(2, ProviderKind::Google);
        assert!(d1 <= Duration::from_secs_f64(1.5));
        assert!(d2 <= Duration::from_secs_f64(3.0));
    }

    #[test]
    fn test_delay_capped_at_max_delay() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(2),
            ..RetryPolicy::default()
        };
        let d = policy.delay_for_attempt(10, ProviderKind::HuggingFace);
        assert!(d <= Duration::from_secs_f64(3.0)); // max_delay * 1.5 jitter ceiling
    }

    #[test]
    fn test_provider_multiplier_scales_delay() {
        let policy = RetryPolicy {
            exponential_base: 1.0, // isolate the provider multiplier's effect
            ..RetryPolicy::default()
        };
        // OpenAI multiplier 1.5 vs Google 1.0: OpenAI's ceiling is higher.
        let openai_ceiling = policy.initial_delay.as_secs_f64()
            * ProviderKind::OpenAi.backoff_multiplier()
            * 1.5;
        let google_ceiling =
            policy.initial_delay.as_secs_f64() * ProviderKind::Google.backoff_multiplier() * 1.5;
        assert!(openai_ceiling > google_ceiling);
    }

    #[test]
    fn test_retry_after_overrides_computed_delay() {
        let policy = RetryPolicy::default();
        let d = policy.delay_with_retry_after(1, ProviderKind::OpenAi, Some(Duration::from_secs(2)));
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn test_retry_after_bounded_by_max_delay() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        let d = policy.delay_with_retry_after(1, ProviderKind::OpenAi, Some(Duration::from_secs(120)));
        assert_eq!(d, Duration::from_secs(5));
    }
}
