//! Prompt shaping between pipeline stages (spec.md §4.7 steps 1-3): the
//! verbatim stage-1 prompt, the attributed stage-2 peer-review prompt built
//! from stage 1's successful outputs, and the stage-3 synthesis prompt built
//! from stage 2's (or, per-model, stage 1's) successful outputs.

use crate::types::{Stage, StageOutput};

/// Stage-1 prompt is the raw user query verbatim (spec.md §4.7 stage 1).
pub fn build_initial_prompt(query: &str) -> String {
    query.to_string()
}

/// Build the stage-2 "peer review" prompt for `model_id`: the original
/// query plus every *other* model's successful stage-1 output, attributed
/// by model id (spec.md §4.7 stage 2).
pub fn build_peer_review_prompt(query: &str, model_id: &str, initial_outputs: &[StageOutput]) -> String {
    let mut sections = Vec::new();
    for output in initial_outputs {
        if output.model_id == model_id || !output.is_ok() {
            continue;
        }
        if let Some(content) = &output.content {
            sections.push(format!("### Response from {}\n{}", output.model_id, content));
        }
    }

    format!(
        "You are reviewing other models' answers to the following query.\n\n\
         ### Original query\n{query}\n\n\
         ### Other responses\n{}\n\n\
         Critique the other responses for accuracy, completeness, and clarity, \
         and give your own improved answer.",
        sections.join("\n\n")
    )
}

/// Build the stage-3 synthesis prompt: the original query plus every
/// successful stage-2 output, falling back to the model's stage-1 output
/// if it failed peer review (spec.md §4.7 stage 3).
pub fn build_synthesis_prompt(
    query: &str,
    initial_outputs: &[StageOutput],
    peer_review_outputs: &[StageOutput],
) -> String {
    let mut sections = Vec::new();
    for peer_output in peer_review_outputs {
        if peer_output.is_ok() {
            if let Some(content) = &peer_output.content {
                sections.push(format!("### {} (peer review)\n{}", peer_output.model_id, content));
                continue;
            }
        }
        // Peer review failed for this model: fall back to its initial output.
        if let Some(initial) = initial_outputs
            .iter()
            .find(|o| o.model_id == peer_output.model_id && o.is_ok())
        {
            if let Some(content) = &initial.content {
                sections.push(format!(
                    "### {} (initial, peer review unavailable)\n{}",
                    initial.model_id, content
                ));
            }
        }
    }

    format!(
        "Synthesize a single, high-quality answer to the following query from the \
         candidate responses below. Resolve disagreements, keep what is correct, \
         and produce one consolidated answer — do not just list the inputs.\n\n\
         ### Original query\n{query}\n\n\
         ### Candidate responses\n{}",
        sections.join("\n\n")
    )
}

/// Longest successful output among `outputs`, used as the stage-3 fallback
/// when the synthesizer itself exhausts retries (spec.md §4.7).
pub fn longest_successful(outputs: &[StageOutput]) -> Option<&StageOutput> {
    outputs
        .iter()
        .filter(|o| o.is_ok())
        .max_by_key(|o| o.content.as_ref().map(|c| c.len()).unwrap_or(0))
}

pub fn stage_display_name(stage: Stage) -> &'static str {
    stage.as_str()
}
