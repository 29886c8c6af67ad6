//! Structured event catalogue (C8/C9, spec.md §4.8).
//!
//! Every suspension point the orchestrator passes through reports here.
//! Implementations MUST NOT block the run — an implementation that could
//! block is expected to enqueue internally (spec.md §5's suspension-point
//! table calls this out explicitly for the event sink).

use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::registry::ModelId;
use crate::types::Stage;

/// One event in a run's lifecycle (spec.md §4.8). The `requestId` travels
/// alongside each event via [`EventSink::emit`] rather than being embedded
/// in the variant, so sinks never need to thread it through construction.
#[derive(Debug, Clone)]
pub enum Event {
    StageStarted {
        stage: Stage,
    },
    StageCompleted {
        stage: Stage,
        successful: usize,
        failed: usize,
        elapsed_ms: u64,
    },
    AttemptStarted {
        stage: Stage,
        model_id: ModelId,
        attempt: u32,
    },
    AttemptFailed {
        stage: Stage,
        model_id: ModelId,
        attempt: u32,
        reason: String,
        retry_in_ms: Option<u64>,
    },
    CostEstimated {
        input_tokens: u64,
        output_tokens: u64,
        usd: f64,
        cap_exceeded: bool,
    },
    RunCompleted {
        total_ms: u64,
    },
    RunFailed {
        reason: String,
    },
}

/// Handler for orchestration lifecycle events (spec.md §4.8, §9 — the
/// anti-singleton event sink is a boundary, not a global).
pub trait EventSink: Send + Sync {
    fn emit(&self, request_id: Uuid, event: Event);
}

/// Discards every event. The default for callers that don't need observability.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _request_id: Uuid, _event: Event) {}
}

/// Routes events through `tracing`, matching the ambient logging stack
/// (spec.md SPEC_FULL §9). Never logs secrets; event payloads here never
/// carry any.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, request_id: Uuid, event: Event) {
        match &event {
            Event::StageStarted { stage } => {
                tracing::info!(%request_id, %stage, "stage started");
            }
            Event::StageCompleted { stage, successful, failed, elapsed_ms } => {
                tracing::info!(%request_id, %stage, successful, failed, elapsed_ms, "stage completed");
            }
            Event::AttemptStarted { stage, model_id, attempt } => {
                tracing::debug!(%request_id, %stage, model_id, attempt, "attempt started");
            }
            Event::AttemptFailed { stage, model_id, attempt, reason, retry_in_ms } => {
                tracing::warn!(%request_id, %stage, model_id, attempt, reason, retry_in_ms, "attempt failed");
            }
            Event::CostEstimated { input_tokens, output_tokens, usd, cap_exceeded } => {
                tracing::debug!(%request_id, input_tokens, output_tokens, usd, cap_exceeded, "cost estimated");
            }
            Event::RunCompleted { total_ms } => {
                tracing::info!(%request_id, total_ms, "run completed");
            }
            Event::RunFailed { reason } => {
                tracing::warn!(%request_id, reason, "run failed");
            }
        }
    }
}

/// An [`EventSink`] backed by a closure.
pub struct FnEventSink<F: Fn(Uuid, Event) + Send + Sync>(pub F);

impl<F: Fn(Uuid, Event) + Send + Sync> EventSink for FnEventSink<F> {
    fn emit(&self, request_id: Uuid, event: Event) {
        (self.0)(request_id, event)
    }
}

/// In-memory recorder, for tests that assert on the emitted event sequence
/// (spec.md §8 invariant 2: at-most-once terminal).
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Uuid, String)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> Vec<(Uuid, String)> {
        self.events.lock().unwrap().clone()
    }

    fn label(event: &Event) -> &'static str {
        match event {
            Event::StageStarted { .. } => "stage_started",
            Event::StageCompleted { .. } => "stage_completed",
            Event::AttemptStarted { .. } => "attempt_started",
            Event::AttemptFailed { .. } => "attempt_failed",
            Event::CostEstimated { .. } => "cost_estimated",
            Event::RunCompleted { .. } => "run_completed",
            Event::RunFailed { .. } => "run_failed",
        }
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, request_id: Uuid, event: Event) {
        let label = Self::label(&event).to_string();
        self.events.lock().unwrap().push((request_id, label));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_captures_in_order() {
        let sink = RecordingSink::new();
        let id = Uuid::new_v4();
        sink.emit(id, Event::StageStarted { stage: Stage::Initial });
        sink.emit(
            id,
            Event::StageCompleted {
                stage: Stage::Initial,
                successful: 2,
                failed: 0,
                elapsed_ms: 5,
            },
        );
        let snapshot = sink.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].1, "stage_started");
        assert_eq!(snapshot[1].1, "stage_completed");
    }

    #[test]
    fn test_null_sink_is_a_noop() {
        let sink = NullSink;
        sink.emit(Uuid::new_v4(), Event::RunCompleted { total_ms: 1 });
    }

    #[test]
    fn test_fn_event_sink_invokes_closure() {
        let seen = Arc::new(Mutex::new(0u32));
        let seen2 = seen.clone();
        let sink = FnEventSink(move |_id, _event| {
            *seen2.lock().unwrap() += 1;
        });
        sink.emit(Uuid::new_v4(), Event::RunCompleted { total_ms: 1 });
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
