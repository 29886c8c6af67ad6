//! Cost Estimator (C10, spec.md §4.10): a pure function from token counts
//! and [`ModelDescriptor`] rates to a USD figure. Shares the `ceil(bytes/4)`
//! fallback heuristic with the provider adapters ([`crate::backend::estimate_tokens`])
//! so a pre-flight projection and a post-hoc actual agree on the same model.

use crate::registry::ModelDescriptor;

/// Assumed output length (tokens) when projecting cost before any call has
/// actually been made, per model in a stage (spec.md §4.10).
pub const DEFAULT_OUTPUT_TOKENS_ESTIMATE: u64 = 512;

/// USD cost for `input_tokens`/`output_tokens` against one model's rates,
/// rounded to 4 decimal places (spec.md §4.10).
pub fn estimate_cost(descriptor: &ModelDescriptor, input_tokens: u64, output_tokens: u64) -> f64 {
    let input_cost = (input_tokens as f64 / 1000.0) * descriptor.cost_per_1k_input_tokens;
    let output_cost = (output_tokens as f64 / 1000.0) * descriptor.cost_per_1k_output_tokens;
    round4(input_cost + output_cost)
}

/// Project the total cost of a 3-stage run across `model_ids` plus the
/// synthesizer, before any dispatch happens (spec.md §4.10, used for the
/// `cost_cap_usd` pre-flight rejection in the orchestrator).
///
/// Stage 1 and stage 2 each call every model in `model_ids`; stage 3 calls
/// only the synthesizer. `query_bytes` estimates the shared input size;
/// `DEFAULT_OUTPUT_TOKENS_ESTIMATE` approximates each call's output.
pub fn project_run_cost(
    descriptors: &[&ModelDescriptor],
    synthesizer: &ModelDescriptor,
    query_bytes: usize,
) -> f64 {
    let input_tokens = crate::backend::estimate_tokens(query_bytes);
    let mut total = 0.0;
    for descriptor in descriptors {
        // stage 1 + stage 2, same model called twice
        total += estimate_cost(descriptor, input_tokens, DEFAULT_OUTPUT_TOKENS_ESTIMATE) * 2.0;
    }
    // stage 3: synthesizer sees roughly len(descriptors) peer outputs as input
    let synthesis_input = input_tokens * (descriptors.len() as u64 + 1).max(1);
    total += estimate_cost(synthesizer, synthesis_input, DEFAULT_OUTPUT_TOKENS_ESTIMATE);
    round4(total)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
