//! Request Context (C8): the per-run bundle of correlation id, deadline,
//! cancellation signal, and structured-event sink. Threaded through every
//! component that can suspend.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::{Event, EventSink};

/// Per-run correlation id, deadline, and cancellation handle (spec.md §3, §4.8).
///
/// Lifetime is exactly one [`crate::pipeline::OrchestrationRequest`]. All
/// blocking operations that could exceed ~100ms observe
/// [`RequestContext::cancellation`] and [`RequestContext::remaining`].
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub user_id: String,
    deadline: tokio::time::Instant,
    pub cancellation: CancellationToken,
    pub event_sink: Arc<dyn EventSink>,
}

impl RequestContext {
    /// Build a new context with the given overall timeout from now.
    pub fn new(user_id: impl Into<String>, overall_timeout: Duration, event_sink: Arc<dyn EventSink>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: user_id.into(),
            deadline: tokio::time::Instant::now() + overall_timeout,
            cancellation: CancellationToken::new(),
            event_sink,
        }
    }

    /// Build a context with an explicit correlation id, e.g. echoing a
    /// caller-supplied `X-Request-ID` header (spec.md §6.1).
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    /// Time remaining until the absolute deadline, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(tokio::time::Instant::now())
    }

    /// The smaller of `remaining()` and a component-local timeout, per
    /// spec.md §4.1/§5's `min(remaining-deadline, configured-timeout)` rule.
    pub fn bounded(&self, configured: Duration) -> Duration {
        self.remaining().min(configured)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Fire-and-forget event emission; never blocks the caller (spec.md §4.8).
    pub fn emit(&self, event: Event) {
        self.event_sink.emit(self.request_id, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;

    #[test]
    fn test_remaining_shrinks_toward_zero() {
        let ctx = RequestContext::new("user-1", Duration::from_millis(50), Arc::new(NullSink));
        assert!(ctx.remaining() <= Duration::from_millis(50));
    }

    #[test]
    fn test_bounded_takes_smaller_of_two() {
        let ctx = RequestContext::new("user-1", Duration::from_secs(5), Arc::new(NullSink));
        let bounded = ctx.bounded(Duration::from_millis(10));
        assert!(bounded <= Duration::from_millis(10));
    }

    #[test]
    fn test_cancellation_flag_roundtrip() {
        let ctx = RequestContext::new("user-1", Duration::from_secs(5), Arc::new(NullSink));
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_with_request_id_overrides_default() {
        let id = Uuid::new_v4();
        let ctx = RequestContext::new("user-1", Duration::from_secs(5), Arc::new(NullSink))
            .with_request_id(id);
        assert_eq!(ctx.request_id, id);
    }
}
