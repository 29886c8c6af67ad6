//! Integration tests for the seed scenarios a caller of this crate is
//! expected to exercise before shipping an HTTP front-end on top of it:
//! happy path, one provider down, rate-limit-then-success, a missing
//! credential, cost-cap pre-flight rejection, and mid-run cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ultra_core::backend::mock::{MockBackend, ScriptedOutcome};
use ultra_core::config::Settings;
use ultra_core::events::{NullSink, RecordingSink};
use ultra_core::{
    Backend, ModelDescriptor, ModelRegistry, Orchestrator, OrchestrationCache,
    OrchestrationRequest, ProviderKind, RequestContext, RunStatus, StageStatus,
};

fn descriptor(id: &str, provider: ProviderKind, env_var: &str) -> ModelDescriptor {
    ModelDescriptor::new(id, provider, env_var).with_rates(0.005, 0.015)
}

fn test_settings() -> Settings {
    Settings {
        auth_access_secret: "0".repeat(32),
        auth_refresh_secret: "1".repeat(32),
        orchestration_timeout: Duration::from_secs(10),
        initial_response_timeout: Duration::from_secs(5),
        peer_review_timeout: Duration::from_secs(5),
        ultra_synthesis_timeout: Duration::from_secs(5),
        llm_request_timeout: Duration::from_secs(5),
        concurrent_execution_timeout: Duration::from_secs(5),
        max_retry_attempts: 3,
        retry_initial_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(10),
        retry_exponential_base: 2.0,
        rate_limit_detection_enabled: true,
        rate_limit_retry_enabled: true,
        minimum_models_required: 2,
        cache_ttl_seconds: 3600,
        token_blacklist_fail_open: false,
        allow_single_model: false,
    }
}

fn three_model_registry(vars: [&str; 3]) -> (ModelRegistry, [ModelDescriptor; 3]) {
    for v in vars {
        std::env::set_var(v, "test-credential");
    }
    let gpt = descriptor("gpt-4o", ProviderKind::OpenAi, vars[0]);
    let claude = descriptor("claude-3-5-sonnet", ProviderKind::Anthropic, vars[1]);
    let gemini = descriptor("gemini-1.5-pro", ProviderKind::Google, vars[2]);
    let registry = ModelRegistry::new(vec![gpt.clone(), claude.clone(), gemini.clone()]);
    (registry, [gpt, claude, gemini])
}

fn orchestrator(registry: ModelRegistry, backends: HashMap<ProviderKind, Arc<dyn Backend>>) -> Orchestrator {
    let cache = Arc::new(OrchestrationCache::new(Duration::from_secs(3600)));
    Orchestrator::new(registry, backends, reqwest::Client::new(), cache, test_settings())
}

/// S1 — happy path, three providers, all succeed quickly.
#[tokio::test]
async fn s1_happy_path_three_providers() {
    let (registry, _) = three_model_registry(["ULTRA_S1_A", "ULTRA_S1_B", "ULTRA_S1_C"]);
    let mut backends: HashMap<ProviderKind, Arc<dyn Backend>> = HashMap::new();
    backends.insert(ProviderKind::OpenAi, Arc::new(MockBackend::fixed(ProviderKind::OpenAi, "gpt take")));
    backends.insert(ProviderKind::Anthropic, Arc::new(MockBackend::fixed(ProviderKind::Anthropic, "claude take")));
    backends.insert(ProviderKind::Google, Arc::new(MockBackend::fixed(ProviderKind::Google, "gemini take")));

    let orchestrator = orchestrator(registry, backends);
    let sink = RecordingSink::new();
    let ctx = RequestContext::new("user-1", Duration::from_secs(10), sink.clone());
    let request = OrchestrationRequest::new(
        "user-1",
        "Summarize the CAP theorem.",
        vec!["gpt-4o".into(), "claude-3-5-sonnet".into(), "gemini-1.5-pro".into()],
        "gpt-4o",
    );

    let result = orchestrator.run(request, &ctx).await.unwrap();

    assert_eq!(result.status, RunStatus::Done);
    assert!(result.final_answer.is_some());
    assert_eq!(result.stages.len(), 3);
    assert_eq!(result.stages[0].successful_count, 3);
    assert_eq!(result.stages[1].successful_count, 3);
    assert_eq!(result.stages[2].successful_count, 1);

    let labels: Vec<String> = sink.snapshot().into_iter().map(|(_, label)| label).collect();
    assert!(labels.contains(&"stage_started".to_string()));
    assert!(labels.contains(&"stage_completed".to_string()));
    assert!(labels.contains(&"run_completed".to_string()));
}

/// S2 — one provider down on every attempt; the other two still carry the run.
#[tokio::test]
async fn s2_one_provider_down_still_completes() {
    let (registry, _) = three_model_registry(["ULTRA_S2_A", "ULTRA_S2_B", "ULTRA_S2_C"]);
    let mut backends: HashMap<ProviderKind, Arc<dyn Backend>> = HashMap::new();
    backends.insert(ProviderKind::OpenAi, Arc::new(MockBackend::fixed(ProviderKind::OpenAi, "gpt take")));
    backends.insert(ProviderKind::Anthropic, Arc::new(MockBackend::fixed(ProviderKind::Anthropic, "claude take")));
    backends.insert(
        ProviderKind::Google,
        Arc::new(MockBackend::new(
            ProviderKind::Google,
            vec![ScriptedOutcome::failing(StageStatus::ProviderError); 8],
        )),
    );

    let orchestrator = orchestrator(registry, backends);
    let ctx = RequestContext::new("user-1", Duration::from_secs(10), Arc::new(NullSink));
    let request = OrchestrationRequest::new(
        "user-1",
        "Explain quorum reads.",
        vec!["gpt-4o".into(), "claude-3-5-sonnet".into(), "gemini-1.5-pro".into()],
        "gpt-4o",
    );

    let result = orchestrator.run(request, &ctx).await.unwrap();

    assert_eq!(result.status, RunStatus::Done);
    assert_eq!(result.stages[0].successful_count, 2);
    assert_eq!(result.stages[0].failed_count, 1);
    let gemini_output = result.stages[0]
        .per_model_outputs
        .iter()
        .find(|o| o.model_id == "gemini-1.5-pro")
        .unwrap();
    assert_eq!(gemini_output.status, StageStatus::ProviderError);
    assert!(result.final_answer.is_some());
}

/// S3 — rate-limited on the first attempt, succeeds on the second.
#[tokio::test]
async fn s3_rate_limit_then_success() {
    let (registry, _) = three_model_registry(["ULTRA_S3_A", "ULTRA_S3_B", "ULTRA_S3_C"]);
    let mut backends: HashMap<ProviderKind, Arc<dyn Backend>> = HashMap::new();
    backends.insert(
        ProviderKind::OpenAi,
        Arc::new(MockBackend::new(
            ProviderKind::OpenAi,
            vec![ScriptedOutcome::failing(StageStatus::RateLimited), ScriptedOutcome::ok("gpt take")],
        )),
    );
    backends.insert(ProviderKind::Anthropic, Arc::new(MockBackend::fixed(ProviderKind::Anthropic, "claude take")));
    backends.insert(ProviderKind::Google, Arc::new(MockBackend::fixed(ProviderKind::Google, "gemini take")));

    let orchestrator = orchestrator(registry, backends);
    let ctx = RequestContext::new("user-1", Duration::from_secs(10), Arc::new(NullSink));
    let request = OrchestrationRequest::new(
        "user-1",
        "test query",
        vec!["gpt-4o".into(), "claude-3-5-sonnet".into(), "gemini-1.5-pro".into()],
        "claude-3-5-sonnet",
    );

    let result = orchestrator.run(request, &ctx).await.unwrap();
    assert_eq!(result.status, RunStatus::Done);
    let gpt_output = result.stages[0]
        .per_model_outputs
        .iter()
        .find(|o| o.model_id == "gpt-4o")
        .unwrap();
    assert_eq!(gpt_output.status, StageStatus::Ok);
    assert_eq!(gpt_output.attempt_count, 2);
}

/// S4 — missing credential: zero outbound calls for that model, run still completes.
#[tokio::test]
async fn s4_missing_credential_does_not_dispatch() {
    std::env::set_var("ULTRA_S4_A", "present");
    std::env::set_var("ULTRA_S4_B", "present");
    std::env::remove_var("ULTRA_S4_MISSING");

    let gpt = descriptor("gpt-4o", ProviderKind::OpenAi, "ULTRA_S4_A");
    let claude = descriptor("claude-3-5-sonnet", ProviderKind::Anthropic, "ULTRA_S4_B");
    let llama = descriptor("llama-3", ProviderKind::HuggingFace, "ULTRA_S4_MISSING");
    let registry = ModelRegistry::new(vec![gpt, claude, llama]);

    let mut backends: HashMap<ProviderKind, Arc<dyn Backend>> = HashMap::new();
    backends.insert(ProviderKind::OpenAi, Arc::new(MockBackend::fixed(ProviderKind::OpenAi, "gpt take")));
    backends.insert(ProviderKind::Anthropic, Arc::new(MockBackend::fixed(ProviderKind::Anthropic, "claude take")));
    let huggingface_mock = Arc::new(MockBackend::fixed(ProviderKind::HuggingFace, "should never be reached"));
    backends.insert(ProviderKind::HuggingFace, huggingface_mock.clone());

    let orchestrator = orchestrator(registry, backends);
    let ctx = RequestContext::new("user-1", Duration::from_secs(10), Arc::new(NullSink));
    let request = OrchestrationRequest::new(
        "user-1",
        "test query",
        vec!["gpt-4o".into(), "claude-3-5-sonnet".into(), "llama-3".into()],
        "gpt-4o",
    );

    let result = orchestrator.run(request, &ctx).await.unwrap();

    assert_eq!(huggingface_mock.calls_made(), 0);
    let llama_output = result.stages[0]
        .per_model_outputs
        .iter()
        .find(|o| o.model_id == "llama-3")
        .unwrap();
    assert_eq!(llama_output.status, StageStatus::InvalidKey);
    assert_eq!(result.status, RunStatus::Done);
}

/// S5 — cost-cap pre-flight rejection before any adapter call.
#[tokio::test]
async fn s5_cost_cap_rejected_before_dispatch() {
    std::env::set_var("ULTRA_S5_A", "present");
    std::env::set_var("ULTRA_S5_B", "present");
    std::env::set_var("ULTRA_S5_C", "present");

    let mut gpt = descriptor("gpt-4o", ProviderKind::OpenAi, "ULTRA_S5_A");
    gpt.cost_per_1k_input_tokens = 500.0;
    gpt.cost_per_1k_output_tokens = 500.0;
    let claude = descriptor("claude-3-5-sonnet", ProviderKind::Anthropic, "ULTRA_S5_B");
    let gemini = descriptor("gemini-1.5-pro", ProviderKind::Google, "ULTRA_S5_C");
    let registry = ModelRegistry::new(vec![gpt, claude, gemini]);

    let mut backends: HashMap<ProviderKind, Arc<dyn Backend>> = HashMap::new();
    let gpt_mock = Arc::new(MockBackend::fixed(ProviderKind::OpenAi, "should never be reached"));
    backends.insert(ProviderKind::OpenAi, gpt_mock.clone());
    backends.insert(ProviderKind::Anthropic, Arc::new(MockBackend::fixed(ProviderKind::Anthropic, "x")));
    backends.insert(ProviderKind::Google, Arc::new(MockBackend::fixed(ProviderKind::Google, "x")));

    let orchestrator = orchestrator(registry, backends);
    let sink = RecordingSink::new();
    let ctx = RequestContext::new("user-1", Duration::from_secs(10), sink.clone());
    let mut request = OrchestrationRequest::new(
        "user-1",
        "expensive query",
        vec!["gpt-4o".into(), "claude-3-5-sonnet".into(), "gemini-1.5-pro".into()],
        "gpt-4o",
    );
    request.options.cost_cap_usd = Some(0.001);

    let outcome = orchestrator.run(request, &ctx).await;
    assert!(outcome.is_err());
    assert_eq!(gpt_mock.calls_made(), 0);

    let labels: Vec<String> = sink.snapshot().into_iter().map(|(_, label)| label).collect();
    assert!(labels.contains(&"cost_estimated".to_string()));
    assert!(labels.contains(&"run_failed".to_string()));
    assert!(!labels.contains(&"stage_started".to_string()));
}

/// S6 — cancellation before dispatch yields a terminal cancelled status, no crash.
#[tokio::test]
async fn s6_cancellation_yields_terminal_cancelled() {
    let (registry, _) = three_model_registry(["ULTRA_S6_A", "ULTRA_S6_B", "ULTRA_S6_C"]);
    let mut backends: HashMap<ProviderKind, Arc<dyn Backend>> = HashMap::new();
    backends.insert(ProviderKind::OpenAi, Arc::new(MockBackend::fixed(ProviderKind::OpenAi, "x")));
    backends.insert(ProviderKind::Anthropic, Arc::new(MockBackend::fixed(ProviderKind::Anthropic, "y")));
    backends.insert(ProviderKind::Google, Arc::new(MockBackend::fixed(ProviderKind::Google, "z")));

    let orchestrator = orchestrator(registry, backends);
    let ctx = RequestContext::new("user-1", Duration::from_secs(10), Arc::new(NullSink));
    ctx.cancel();
    let request = OrchestrationRequest::new(
        "user-1",
        "test query",
        vec!["gpt-4o".into(), "claude-3-5-sonnet".into(), "gemini-1.5-pro".into()],
        "gpt-4o",
    );

    let result = orchestrator.run(request, &ctx).await.unwrap();
    assert_eq!(result.status, RunStatus::Cancelled);
    assert!(result.final_answer.is_none());
}
