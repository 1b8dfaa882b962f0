//! Stage prompts and cross-stage context builders (spec §4.E.2-5),
//! grounded in `services/prompts.py` and the per-stage `STEPn_PROMPT`
//! usages in `services/pipeline.py`.

use std::collections::HashMap;

use crate::parser::{Step1Response, Step2Response, Step3Response};

pub const STEP1_PROMPT: &str = "\
Answer the user's question directly and concisely. Respond with a JSON object: \
{\"answer\": string, \"confidence\": number between 0 and 1, \"atomic_facts\": list of short \
factual claims your answer relies on}. Return JSON only, no surrounding prose.";

pub const STEP2_PROMPT: &str = "\
You will see the question again along with every provider's independent first answer, \
labelled A, B, C, and so on. Write an improved answer that incorporates anything the other \
answers got right that yours missed, and corrects anything yours got wrong. Respond with a \
JSON object: {\"improved_answer\": string, \"confidence\": number between 0 and 1, \
\"improvements\": list of short strings describing what you changed and why}. Return JSON only.";

pub const STEP3_PROMPT: &str = "\
You will see the question and every provider's improved answer, labelled A, B, C, and so on. \
Rank the labels from best to worst, predict which label will be ranked first overall, and \
evaluate each one. Respond with a JSON object: {\"ranking\": list of labels best-to-worst, \
\"predicted_winner\": label, \"evaluations\": map of label to {\"score\": integer 1-10, \
\"strengths\": string, \"weaknesses\": string}, \"flagged_facts\": list of claims you believe \
are wrong, \"consensus_facts\": list of claims every answer agrees on}. Return JSON only.";

pub const STEP4_PROMPT: &str = "\
You have been selected to write the final answer. You will see the question, every provider's \
improved answer, the aggregated peer rankings, and the union of flagged and consensus facts. \
Write a clear, well-formatted markdown answer that synthesizes the best of what was offered and \
excludes anything flagged as wrong. Respond with a JSON object: {\"final_answer\": markdown \
string, \"confidence\": number between 0 and 1, \"sources_used\": list of labels you drew on, \
\"excluded\": list of labels or claims you deliberately left out}. Return JSON only.";

fn label_for<'a>(provider_to_label: &'a HashMap<String, String>, provider: &'a str) -> &'a str {
    provider_to_label.get(provider).map(String::as_str).unwrap_or(provider)
}

/// Dump of every stage-1 record, labelled, for the stage-2 augmented turn
/// (spec §4.E.3).
pub fn build_step2_context(
    question: &str,
    step1_responses: &HashMap<String, Step1Response>,
    provider_to_label: &HashMap<String, String>,
) -> String {
    let mut entries: Vec<_> = step1_responses.iter().collect();
    entries.sort_by_key(|(provider, _)| label_for(provider_to_label, provider).to_string());

    let mut out = format!("Original question: {question}\n\nInitial responses from all providers:\n\n");
    for (provider, response) in entries {
        let label = label_for(provider_to_label, provider);
        out.push_str(&format!(
            "[{label}] Answer: {}\n[{label}] Confidence: {}\n[{label}] Key facts: {}\n\n",
            response.answer,
            response.confidence,
            response.atomic_facts.join("; ")
        ));
    }
    out
}

/// Dump of every stage-2 record, labelled, for the stage-3 augmented turn
/// (spec §4.E.4).
pub fn build_step3_context(
    question: &str,
    step2_responses: &HashMap<String, Step2Response>,
    provider_to_label: &HashMap<String, String>,
) -> String {
    let mut entries: Vec<_> = step2_responses.iter().collect();
    entries.sort_by_key(|(provider, _)| label_for(provider_to_label, provider).to_string());

    let mut out = format!("Original question: {question}\n\nImproved answers from all providers:\n\n");
    for (provider, response) in entries {
        let label = label_for(provider_to_label, provider);
        out.push_str(&format!("[{label}] {}\n\n", response.improved_answer));
    }
    out
}

/// Aggregated rankings plus the union of flagged/consensus facts, for the
/// synthesizer's stage-4 turn (spec §4.E.5).
pub fn build_step4_context(
    question: &str,
    step2_responses: &HashMap<String, Step2Response>,
    step3_responses: &HashMap<String, Step3Response>,
    provider_to_label: &HashMap<String, String>,
) -> String {
    let mut entries: Vec<_> = step2_responses.iter().collect();
    entries.sort_by_key(|(provider, _)| label_for(provider_to_label, provider).to_string());

    let mut out = format!("Original question: {question}\n\nImproved answers from all providers:\n\n");
    for (provider, response) in &entries {
        let label = label_for(provider_to_label, provider);
        out.push_str(&format!("[{label}] {}\n\n", response.improved_answer));
    }

    out.push_str("Peer rankings (best to worst, by label):\n");
    for (evaluator, response) in step3_responses {
        let evaluator_label = label_for(provider_to_label, evaluator);
        out.push_str(&format!("[{evaluator_label}] ranked: {}\n", response.ranking.join(" > ")));
    }

    let mut flagged: Vec<&str> = Vec::new();
    let mut consensus: Vec<&str> = Vec::new();
    for response in step3_responses.values() {
        flagged.extend(response.flagged_facts.iter().map(String::as_str));
        consensus.extend(response.consensus_facts.iter().map(String::as_str));
    }

    out.push_str(&format!("\nFlagged facts (disputed): {}\n", flagged.join("; ")));
    out.push_str(&format!("Consensus facts (agreed): {}\n", consensus.join("; ")));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step2_context_includes_labelled_answers() {
        let mut step1 = HashMap::new();
        step1.insert(
            "claude".to_string(),
            Step1Response {
                provider: "claude".to_string(),
                answer: "42".to_string(),
                confidence: 0.9,
                atomic_facts: vec!["deep thought said so".to_string()],
                raw_response: String::new(),
            },
        );
        let mut labels = HashMap::new();
        labels.insert("claude".to_string(), "A".to_string());

        let context = build_step2_context("what is the answer?", &step1, &labels);
        assert!(context.contains("[A] Answer: 42"));
        assert!(context.contains("deep thought said so"));
    }

    #[test]
    fn step4_context_unions_flagged_and_consensus_facts() {
        let step2 = HashMap::new();
        let mut step3 = HashMap::new();
        step3.insert(
            "claude".to_string(),
            Step3Response {
                provider: "claude".to_string(),
                ranking: vec!["A".to_string(), "B".to_string()],
                predicted_winner: "A".to_string(),
                evaluations: HashMap::new(),
                flagged_facts: vec!["wrong date".to_string()],
                consensus_facts: vec!["shared fact".to_string()],
                raw_response: String::new(),
            },
        );
        let labels = HashMap::new();

        let context = build_step4_context("q", &step2, &step3, &labels);
        assert!(context.contains("wrong date"));
        assert!(context.contains("shared fact"));
    }
}
