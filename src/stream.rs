//! Stream Channel (C11, spec.md §4.11, §6.3): the typed event contract for
//! streaming-mode runs. [`StreamSink`] wraps an `mpsc::Sender` and enforces
//! "terminal event exactly once" at the type level rather than trusting
//! every call site to get it right.

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::types::{RunStatus, Stage};

/// Reasons a streaming run can end in [`StreamEvent::Error`] (spec.md §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    Unauthenticated,
    CapExceeded,
    ProviderTimeout,
    RateLimit,
    InsufficientModels,
    Internal,
}

/// One message on a streaming run's channel (spec.md §6.3). `Meta` is
/// always first; exactly one of `Done`/`Error` is always last.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Meta {
        request_id: uuid::Uuid,
        model_ids: Vec<String>,
    },
    Status {
        stage: Stage,
        successful: usize,
        failed: usize,
    },
    Token {
        stage: Stage,
        model_id: String,
        delta: String,
    },
    Cost {
        input_tokens: u64,
        output_tokens: u64,
        usd: f64,
    },
    Done {
        status: RunStatus,
        final_answer: Option<String>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl StreamEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

/// Sends [`StreamEvent`]s to a caller, refusing to send anything after the
/// first terminal event (spec.md §8 invariant 2: at-most-once terminal).
/// A send attempted after termination is dropped and logged, never panics.
pub struct StreamSink {
    tx: mpsc::Sender<StreamEvent>,
    terminated: std::sync::atomic::AtomicBool,
}

impl StreamSink {
    /// Create a sink/stream pair with the given channel capacity.
    pub fn channel(capacity: usize) -> (std::sync::Arc<Self>, ReceiverStream<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sink = std::sync::Arc::new(Self {
            tx,
            terminated: std::sync::atomic::AtomicBool::new(false),
        });
        (sink, ReceiverStream::new(rx))
    }

    /// Send `event`, dropping it silently if a terminal event was already
    /// sent. Never blocks the orchestrator's own deadline accounting —
    /// `send` awaits only the channel's own backpressure.
    pub async fn send(&self, event: StreamEvent) {
        use std::sync::atomic::Ordering;
        if self.terminated.load(Ordering::Acquire) {
            tracing::warn!("dropping stream event sent after terminal event");
            return;
        }
        if event.is_terminal() {
            self.terminated.store(true, Ordering::Release);
        }
        if self.tx.send(event).await.is_err() {
            tracing::debug!("stream receiver dropped; event discarded");
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(std::sync::atomic::Ordering::Acquire)
    }
}
