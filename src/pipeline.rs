//! Pipeline Orchestrator (C7, spec.md §4.7): the 3-stage state machine —
//! initial → peer_review → ultra_synthesis — with partial-failure handling,
//! cache lookup/write, cost-cap pre-flight, and both a one-shot [`Orchestrator::run`]
//! and a streaming [`Orchestrator::run_streaming`] entry point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio_stream::wrappers::ReceiverStream;

use crate::auth::gate::AuthGate;
use crate::backend::{AdapterRequest, Backend};
use crate::cache::{self, OrchestrationCache};
use crate::config::Settings;
use crate::context::RequestContext;
use crate::cost;
use crate::error::{OrchestrationError, Result};
use crate::events::Event;
use crate::registry::{ModelDescriptor, ModelRegistry, ProviderKind};
use crate::retry::RetryPolicy;
use crate::stage;
use crate::stream::{ErrorCode, StreamEvent, StreamSink};
use crate::types::{OrchestrationRequest, OrchestrationResult, RunStatus, Stage, StageOutput, StageResult, StageStatus};

/// Everything the orchestrator needs to dispatch a run: the model catalog,
/// one [`Backend`] per provider, a shared HTTP client, the retry policy,
/// the result cache, and the timeout/gate knobs from [`Settings`].
///
/// Construction does not touch the network; nothing here is mutated after
/// `new`, so an `Arc<Orchestrator>` can be shared across every in-flight
/// run (spec.md §5's shared-HTTP-client requirement).
pub struct Orchestrator {
    registry: ModelRegistry,
    backends: HashMap<ProviderKind, Arc<dyn Backend>>,
    client: reqwest::Client,
    retry: RetryPolicy,
    cache: Arc<OrchestrationCache>,
    settings: Settings,
}

impl Orchestrator {
    pub fn new(
        registry: ModelRegistry,
        backends: HashMap<ProviderKind, Arc<dyn Backend>>,
        client: reqwest::Client,
        cache: Arc<OrchestrationCache>,
        settings: Settings,
    ) -> Self {
        let retry = settings.retry_policy();
        Self {
            registry,
            backends,
            client,
            retry,
            cache,
            settings,
        }
    }

    fn backend_for(&self, provider: ProviderKind) -> Option<Arc<dyn Backend>> {
        self.backends.get(&provider).cloned()
    }

    /// Resolve every id in `model_ids` plus `synthesizer_model_id`, failing
    /// with `INVALID_INPUT` (spec.md §7) the first time one is unknown.
    fn resolve_all(&self, request: &OrchestrationRequest) -> Result<(Vec<ModelDescriptor>, ModelDescriptor)> {
        let mut descriptors = Vec::with_capacity(request.model_ids.len());
        for id in &request.model_ids {
            let d = self
                .registry
                .resolve(id)
                .ok_or_else(|| OrchestrationError::InvalidInput(format!("unknown model: {id}")))?
                .clone();
            descriptors.push(d);
        }
        let synthesizer = self
            .registry
            .resolve(&request.synthesizer_model_id)
            .ok_or_else(|| {
                OrchestrationError::InvalidInput(format!(
                    "unknown synthesizer model: {}",
                    request.synthesizer_model_id
                ))
            })?
            .clone();
        Ok((descriptors, synthesizer))
    }

    /// Run one (stage, model) call with the full retry/backoff loop,
    /// bounded by the smaller of the deadline, the stage timeout, and
    /// `LLM_REQUEST_TIMEOUT` per attempt (spec.md §4.1, §4.2, §4.7).
    async fn dispatch_with_retry(
        &self,
        ctx: &RequestContext,
        stage: Stage,
        descriptor: &ModelDescriptor,
        prompt: String,
    ) -> StageOutput {
        let model_id = descriptor.model_id.clone();

        if !descriptor.has_credential() {
            return StageOutput {
                model_id,
                stage,
                status: StageStatus::InvalidKey,
                content: None,
                input_tokens: 0,
                output_tokens: 0,
                latency_ms: 0,
                attempt_count: 0,
            };
        }

        let Some(backend) = self.backend_for(descriptor.provider_kind) else {
            return StageOutput {
                model_id,
                stage,
                status: StageStatus::ProviderError,
                content: None,
                input_tokens: 0,
                output_tokens: 0,
                latency_ms: 0,
                attempt_count: 0,
            };
        };

        let adapter_request = AdapterRequest::new(descriptor.model_id.clone(), prompt);
        let mut attempt = 1u32;
        let started = Instant::now();

        loop {
            if ctx.is_cancelled() {
                return StageOutput {
                    model_id,
                    stage,
                    status: StageStatus::Cancelled,
                    content: None,
                    input_tokens: 0,
                    output_tokens: 0,
                    latency_ms: started.elapsed().as_millis() as u64,
                    attempt_count: attempt,
                };
            }

            ctx.emit(Event::AttemptStarted { stage, model_id: model_id.clone(), attempt });
            let call_timeout = ctx.bounded(self.settings.llm_request_timeout);
            let outcome = match backend
                .invoke(&self.client, descriptor, &adapter_request, call_timeout, &ctx.cancellation)
                .await
            {
                Ok(outcome) => outcome,
                Err(_transport_err) => crate::backend::AdapterOutcome {
                    status: StageStatus::ProviderError,
                    content: None,
                    input_tokens: 0,
                    output_tokens: 0,
                    tokens_estimated: false,
                    retry_after: None,
                },
            };

            if outcome.status == StageStatus::Ok {
                return StageOutput {
                    model_id,
                    stage,
                    status: StageStatus::Ok,
                    content: outcome.content,
                    input_tokens: outcome.input_tokens,
                    output_tokens: outcome.output_tokens,
                    latency_ms: started.elapsed().as_millis() as u64,
                    attempt_count: attempt,
                };
            }

            let retryable = self.retry.should_retry(outcome.status, attempt) && ctx.remaining() > Duration::ZERO;
            if !retryable {
                ctx.emit(Event::AttemptFailed {
                    stage,
                    model_id: model_id.clone(),
                    attempt,
                    reason: format!("{:?}", outcome.status),
                    retry_in_ms: None,
                });
                return StageOutput {
                    model_id,
                    stage,
                    status: outcome.status,
                    content: None,
                    input_tokens: 0,
                    output_tokens: 0,
                    latency_ms: started.elapsed().as_millis() as u64,
                    attempt_count: attempt,
                };
            }

            let delay = self
                .retry
                .delay_with_retry_after(attempt, descriptor.provider_kind, outcome.retry_after)
                .min(ctx.remaining());
            ctx.emit(Event::AttemptFailed {
                stage,
                model_id: model_id.clone(),
                attempt,
                reason: format!("{:?}", outcome.status),
                retry_in_ms: Some(delay.as_millis() as u64),
            });

            tokio::select! {
                _ = ctx.cancellation.cancelled() => {
                    return StageOutput {
                        model_id,
                        stage,
                        status: StageStatus::Cancelled,
                        content: None,
                        input_tokens: 0,
                        output_tokens: 0,
                        latency_ms: started.elapsed().as_millis() as u64,
                        attempt_count: attempt,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Fan out `work` (one prompt per model) concurrently, each call bounded
    /// by `min(remaining-deadline, stage_timeout, CONCURRENT_EXECUTION_TIMEOUT)`
    /// (spec.md §4.7). Order of the returned outputs matches `work`'s
    /// dispatch order, not completion order (spec.md §8 invariant 1).
    async fn run_stage(
        &self,
        ctx: &RequestContext,
        stage: Stage,
        work: Vec<(ModelDescriptor, String)>,
        stage_timeout: Duration,
    ) -> Vec<StageOutput> {
        let group_timeout = ctx.bounded(stage_timeout.min(self.settings.concurrent_execution_timeout));

        let futures = work.into_iter().map(|(descriptor, prompt)| {
            let ctx = ctx.clone();
            let model_id = descriptor.model_id.clone();
            async move {
                match tokio::time::timeout(group_timeout, self.dispatch_with_retry(&ctx, stage, &descriptor, prompt)).await {
                    Ok(output) => output,
                    Err(_elapsed) => StageOutput {
                        model_id,
                        stage,
                        status: StageStatus::Timeout,
                        content: None,
                        input_tokens: 0,
                        output_tokens: 0,
                        latency_ms: group_timeout.as_millis() as u64,
                        attempt_count: 0,
                    },
                }
            }
        });

        join_all(futures).await
    }

    /// Non-streaming entry point (spec.md §4.7).
    pub async fn run(&self, request: OrchestrationRequest, ctx: &RequestContext) -> Result<OrchestrationResult> {
        self.run_internal(request, ctx, None).await
    }

    /// Streaming entry point (spec.md §4.11, §6.3). Spawns the run on a
    /// background task and returns immediately with the receiving half of
    /// the stream; `Meta` is emitted before any dispatch, and exactly one
    /// of `Done`/`Error` is emitted last.
    pub fn run_streaming(
        self: Arc<Self>,
        request: OrchestrationRequest,
        ctx: RequestContext,
    ) -> ReceiverStream<StreamEvent> {
        let (sink, stream) = StreamSink::channel(64);
        let model_ids = request.model_ids.clone();
        let request_id = request.request_id;

        tokio::spawn(async move {
            sink.send(StreamEvent::Meta { request_id, model_ids }).await;
            match self.run_internal(request, &ctx, Some(&sink)).await {
                Ok(result) => {
                    sink.send(StreamEvent::Done {
                        status: result.status,
                        final_answer: result.final_answer,
                    })
                    .await;
                }
                Err(err) => {
                    sink.send(StreamEvent::Error {
                        code: map_error_code(&err),
                        message: err.to_string(),
                    })
                    .await;
                }
            }
        });

        stream
    }

    async fn run_internal(
        &self,
        request: OrchestrationRequest,
        ctx: &RequestContext,
        stream: Option<&StreamSink>,
    ) -> Result<OrchestrationResult> {
        request.validate()?;
        let started = Instant::now();
        let (descriptors, synthesizer) = self.resolve_all(&request)?;

        if let Some(cap_usd) = request.options.cost_cap_usd {
            let refs: Vec<&ModelDescriptor> = descriptors.iter().collect();
            let projected = cost::project_run_cost(&refs, &synthesizer, request.query.len());
            let cap_exceeded = projected > cap_usd;
            ctx.emit(Event::CostEstimated {
                input_tokens: crate::backend::estimate_tokens(request.query.len()),
                output_tokens: cost::DEFAULT_OUTPUT_TOKENS_ESTIMATE,
                usd: projected,
                cap_exceeded,
            });
            if cap_exceeded {
                ctx.emit(Event::RunFailed { reason: "cost cap exceeded".into() });
                return Err(OrchestrationError::CapExceeded { projected_usd: projected, cap_usd });
            }
        }

        if request.options.estimate_only {
            let refs: Vec<&ModelDescriptor> = descriptors.iter().collect();
            let projected = cost::project_run_cost(&refs, &synthesizer, request.query.len());
            return Ok(OrchestrationResult {
                request_id: request.request_id,
                status: RunStatus::Done,
                stages: vec![],
                final_answer: None,
                synthesis_fallback: false,
                total_latency_ms: started.elapsed().as_millis() as u64,
                estimated_cost_usd: projected,
            });
        }

        let key = cache::cache_key(&request.query, &request.model_ids, &request.synthesizer_model_id);
        if let Some(mut cached) = self.cache.get(&key) {
            cached.request_id = request.request_id;
            return Ok(cached);
        }

        // Stage 1: initial
        ctx.emit(Event::StageStarted { stage: Stage::Initial });
        let stage1_work: Vec<(ModelDescriptor, String)> = descriptors
            .iter()
            .map(|d| (d.clone(), stage::build_initial_prompt(&request.query)))
            .collect();
        let stage1_outputs = self.run_stage(ctx, Stage::Initial, stage1_work, self.settings.initial_response_timeout).await;
        let stage1_result = StageResult::from_outputs(Stage::Initial, stage1_outputs);
        ctx.emit(Event::StageCompleted {
            stage: Stage::Initial,
            successful: stage1_result.successful_count,
            failed: stage1_result.failed_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
        if let Some(sink) = stream {
            emit_stage_status(sink, &stage1_result).await;
        }
        self.emit_stage_cost(ctx, &[&stage1_result], request.options.cost_cap_usd);

        if stage1_result.successful_count < self.settings.minimum_models_required {
            return Ok(self.terminal(request.request_id, RunStatus::InsufficientModels, vec![stage1_result], started));
        }
        if ctx.is_cancelled() {
            return Ok(self.terminal(request.request_id, RunStatus::Cancelled, vec![stage1_result], started));
        }

        // Stage 2: peer_review
        ctx.emit(Event::StageStarted { stage: Stage::PeerReview });
        let stage2_work: Vec<(ModelDescriptor, String)> = descriptors
            .iter()
            .map(|d| {
                let prompt = stage::build_peer_review_prompt(&request.query, &d.model_id, &stage1_result.per_model_outputs);
                (d.clone(), prompt)
            })
            .collect();
        let stage2_outputs = self.run_stage(ctx, Stage::PeerReview, stage2_work, self.settings.peer_review_timeout).await;
        let stage2_result = StageResult::from_outputs(Stage::PeerReview, stage2_outputs);
        ctx.emit(Event::StageCompleted {
            stage: Stage::PeerReview,
            successful: stage2_result.successful_count,
            failed: stage2_result.failed_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
        if let Some(sink) = stream {
            emit_stage_status(sink, &stage2_result).await;
        }
        self.emit_stage_cost(ctx, &[&stage1_result, &stage2_result], request.options.cost_cap_usd);

        if stage2_result.successful_count < self.settings.minimum_models_required {
            return Ok(self.terminal(request.request_id, RunStatus::InsufficientModels, vec![stage1_result, stage2_result], started));
        }
        if ctx.is_cancelled() {
            return Ok(self.terminal(request.request_id, RunStatus::Cancelled, vec![stage1_result, stage2_result], started));
        }

        // Stage 3: ultra_synthesis
        ctx.emit(Event::StageStarted { stage: Stage::UltraSynthesis });
        let synthesis_prompt = stage::build_synthesis_prompt(&request.query, &stage1_result.per_model_outputs, &stage2_result.per_model_outputs);
        let stage3_outputs = self
            .run_stage(
                ctx,
                Stage::UltraSynthesis,
                vec![(synthesizer.clone(), synthesis_prompt)],
                self.settings.ultra_synthesis_timeout,
            )
            .await;
        let stage3_output = stage3_outputs.into_iter().next().expect("exactly one synthesizer dispatched");
        ctx.emit(Event::StageCompleted {
            stage: Stage::UltraSynthesis,
            successful: if stage3_output.is_ok() { 1 } else { 0 },
            failed: if stage3_output.is_ok() { 0 } else { 1 },
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        let mut synthesis_fallback = false;
        let mut final_answer = stage3_output.content.clone();
        let stage3_result = StageResult::from_outputs(Stage::UltraSynthesis, vec![stage3_output]);
        self.emit_stage_cost(ctx, &[&stage1_result, &stage2_result, &stage3_result], request.options.cost_cap_usd);

        if let Some(sink) = stream {
            if let Some(output) = stage3_result.per_model_outputs.first() {
                if output.is_ok() {
                    emit_synthesis_tokens(sink, output).await;
                }
            }
        }

        if final_answer.is_none() {
            match stage::longest_successful(&stage2_result.per_model_outputs) {
                Some(fallback) => {
                    final_answer = fallback.content.clone();
                    synthesis_fallback = true;
                }
                None => {
                    ctx.emit(Event::RunFailed { reason: "synthesis_unavailable".into() });
                    return Ok(self.terminal(
                        request.request_id,
                        RunStatus::SynthesisUnavailable,
                        vec![stage1_result, stage2_result, stage3_result],
                        started,
                    ));
                }
            }
        }

        let estimated_cost_usd = self.actual_cost(&[&stage1_result, &stage2_result, &stage3_result]);
        if let Some(sink) = stream {
            sink.send(StreamEvent::Cost {
                input_tokens: stage1_result.per_model_outputs.iter().map(|o| o.input_tokens).sum(),
                output_tokens: stage1_result.per_model_outputs.iter().map(|o| o.output_tokens).sum(),
                usd: estimated_cost_usd,
            })
            .await;
        }

        let total_latency_ms = started.elapsed().as_millis() as u64;
        let result = OrchestrationResult {
            request_id: request.request_id,
            status: RunStatus::Done,
            stages: vec![stage1_result, stage2_result, stage3_result],
            final_answer,
            synthesis_fallback,
            total_latency_ms,
            estimated_cost_usd,
        };
        ctx.emit(Event::RunCompleted { total_ms: total_latency_ms });
        self.cache.put(key, result.clone());
        Ok(result)
    }

    fn terminal(&self, request_id: uuid::Uuid, status: RunStatus, stages: Vec<StageResult>, started: Instant) -> OrchestrationResult {
        let estimated_cost_usd = self.actual_cost(&stages.iter().collect::<Vec<_>>());
        OrchestrationResult {
            request_id,
            status,
            stages,
            final_answer: None,
            synthesis_fallback: false,
            total_latency_ms: started.elapsed().as_millis() as u64,
            estimated_cost_usd,
        }
    }

    /// Sum of actual per-model costs across every dispatched output, using
    /// each model's registered rates (spec.md §4.10) — distinct from the
    /// pre-flight *projection* in [`cost::project_run_cost`].
    fn actual_cost(&self, stages: &[&StageResult]) -> f64 {
        let mut total = 0.0;
        for stage_result in stages {
            for output in &stage_result.per_model_outputs {
                if let Some(descriptor) = self.registry.resolve(&output.model_id) {
                    total += cost::estimate_cost(descriptor, output.input_tokens, output.output_tokens);
                }
            }
        }
        (total * 10_000.0).round() / 10_000.0
    }

    /// Emits a `cost_estimated` event for the run's cumulative spend so far
    /// (spec.md §4.9: the estimator is consulted before dispatch and "after
    /// each stage"). `cap_exceeded` here is informational — the cap is only
    /// enforced at the pre-flight check in [`Self::run_internal`].
    fn emit_stage_cost(&self, ctx: &RequestContext, stages: &[&StageResult], cost_cap_usd: Option<f64>) {
        let input_tokens: u64 = stages.iter().flat_map(|s| s.per_model_outputs.iter()).map(|o| o.input_tokens).sum();
        let output_tokens: u64 = stages.iter().flat_map(|s| s.per_model_outputs.iter()).map(|o| o.output_tokens).sum();
        let usd = self.actual_cost(stages);
        let cap_exceeded = cost_cap_usd.map(|cap| usd > cap).unwrap_or(false);
        ctx.emit(Event::CostEstimated { input_tokens, output_tokens, usd, cap_exceeded });
    }
}

/// Stage 1/2 streaming: callers only see pass/fail counts, never per-model
/// content (spec.md §4.7, §6.3 — token deltas are reserved for synthesis).
async fn emit_stage_status(sink: &StreamSink, result: &StageResult) {
    sink.send(StreamEvent::Status {
        stage: result.stage,
        successful: result.successful_count,
        failed: result.failed_count,
    })
    .await;
}

/// Stage 3 streaming: forwards the synthesizer's output as a token delta.
async fn emit_synthesis_tokens(sink: &StreamSink, output: &StageOutput) {
    sink.send(StreamEvent::Token {
        stage: output.stage,
        model_id: output.model_id.clone(),
        delta: output.content.clone().unwrap_or_default(),
    })
    .await;
}

fn map_error_code(err: &OrchestrationError) -> ErrorCode {
    match err {
        OrchestrationError::InvalidInput(_) => ErrorCode::InvalidInput,
        OrchestrationError::Unauthenticated(_) => ErrorCode::Unauthenticated,
        OrchestrationError::CapExceeded { .. } => ErrorCode::CapExceeded,
        _ => ErrorCode::Internal,
    }
}

/// Thin wrapper so [`AuthGate`] stays reachable from orchestrator call sites
/// that need to validate a caller's token before constructing a [`RequestContext`].
/// The gate itself has no pipeline dependency; re-exported here only for
/// discoverability alongside [`Orchestrator`].
pub type AuthGateHandle = Arc<AuthGate>;
