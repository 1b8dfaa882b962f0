//! Pipeline Orchestrator (spec §4.E): sequences the four KEA stages, fans
//! each one out across providers concurrently, and streams SSE events.
//! Grounded in `services/pipeline.py::PipelineOrchestrator`.

pub mod election;
pub mod events;
pub mod prompts;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{
    MAX_RETRY_ATTEMPTS, PROVIDER_LABELS, RETRY_BASE_DELAY_SECS, STAGGER_DELAY_MS,
    STEP_TIMEOUT_MULTIPLIER,
};
use crate::messages::{extract_text_only, has_images, Content, Message, Role};
use crate::parser::{
    parse_step1_response, parse_step2_response, parse_step3_response, parse_step4_response,
    Step1Response, Step2Response, Step3Response, Step4Response,
};
use crate::providers::{BoxStream, ProviderRegistry};

use election::select_synthesizer;
use events::format_pipeline_sse;
use prompts::{build_step2_context, build_step3_context, build_step4_context, STEP1_PROMPT,
    STEP2_PROMPT, STEP3_PROMPT, STEP4_PROMPT};

/// Per-run mutable state (spec §3 "Pipeline state").
#[derive(Debug, Default)]
pub struct PipelineState {
    pub question: String,
    pub step1_responses: HashMap<String, Step1Response>,
    pub step2_responses: HashMap<String, Step2Response>,
    pub step3_responses: HashMap<String, Step3Response>,
    pub step4_response: Option<Step4Response>,
    pub current_step: u8,
    pub errors: HashMap<String, Vec<String>>,
    pub label_to_provider: HashMap<String, String>,
    pub provider_to_label: HashMap<String, String>,
}

/// Terminal summary emitted with `pipeline_complete` (spec §4.E.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub step1_count: usize,
    pub step2_count: usize,
    pub step3_count: usize,
    pub has_final: bool,
    pub final_answer: Option<String>,
    pub final_confidence: Option<f64>,
    pub synthesizer_provider: Option<String>,
    pub errors: HashMap<String, Vec<String>>,
}

impl PipelineState {
    fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            step1_count: self.step1_responses.len(),
            step2_count: self.step2_responses.len(),
            step3_count: self.step3_responses.len(),
            has_final: self.step4_response.is_some(),
            final_answer: self.step4_response.as_ref().map(|r| r.final_answer.clone()),
            final_confidence: self.step4_response.as_ref().map(|r| r.confidence),
            synthesizer_provider: self.step4_response.as_ref().map(|r| r.provider.clone()),
            errors: self.errors.clone(),
        }
    }
}

/// One participating provider's outcome during a concurrent fan-out stage.
enum FanoutEvent {
    Chunk { provider: String, content: String },
    Done { provider: String, raw: String },
    Error { provider: String, message: String, is_retry: bool },
    Retry { provider: String, attempt: u32, delay_secs: f64 },
}

fn provider_timeout(registry: &ProviderRegistry, provider_timeout_secs: u64, name: &str) -> Duration {
    let base = provider_timeout_secs as f64 * STEP_TIMEOUT_MULTIPLIER;
    let multiplier = registry.get(name).map(|p| {
        if p.is_free_tier() { crate::config::FREE_TIER_TIMEOUT_MULTIPLIER } else { 1.0 }
    }).unwrap_or(1.0);
    Duration::from_secs_f64(base * multiplier)
}

fn spawn_provider_attempt(
    registry: Arc<ProviderRegistry>,
    name: String,
    messages: Arc<Vec<Message>>,
    prompt: &'static str,
    timeout: Duration,
    delay: Duration,
    is_retry: bool,
    tx: mpsc::Sender<FanoutEvent>,
) {
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        registry.stream_started();
        let run = async {
            let Some(adapter) = registry.get(&name) else {
                return Err(format!("provider '{name}' is no longer registered"));
            };
            let mut chunks: BoxStream<crate::providers::StreamChunk> =
                adapter.stream_chat(&messages, Some(prompt));

            let mut full_response = String::new();
            while let Some(chunk) = chunks.next().await {
                if let Some(error) = chunk.error {
                    return Err(error);
                }
                if chunk.done_flag {
                    return Ok(full_response);
                }
                if !chunk.content_text.is_empty() {
                    full_response.push_str(&chunk.content_text);
                    let _ = tx
                        .send(FanoutEvent::Chunk {
                            provider: name.clone(),
                            content: chunk.content_text,
                        })
                        .await;
                }
            }
            Ok(full_response)
        };

        let outcome = match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(format!("Timeout after {}s", timeout.as_secs_f64())),
        };

        registry.stream_ended();

        let event = match outcome {
            Ok(raw) => FanoutEvent::Done { provider: name, raw },
            Err(message) => FanoutEvent::Error { provider: name, message, is_retry },
        };
        let _ = tx.send(event).await;
    });
}

/// Run every provider in `providers` concurrently against the same prompt,
/// staggering starts and applying per-provider timeout/retry (spec §4.E.6).
fn run_providers_concurrently(
    registry: Arc<ProviderRegistry>,
    providers: Vec<String>,
    messages: Arc<Vec<Message>>,
    prompt: &'static str,
    provider_timeout_secs: u64,
) -> BoxStream<FanoutEvent> {
    Box::pin(stream! {
        let total = providers.len();
        if total == 0 {
            return;
        }

        let (tx, mut rx) = mpsc::channel::<FanoutEvent>(256);
        let mut retry_counts: HashMap<String, u32> = HashMap::new();
        let mut providers_done: HashSet<String> = HashSet::new();

        for (idx, name) in providers.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(Duration::from_millis(STAGGER_DELAY_MS)).await;
            }
            let timeout = provider_timeout(&registry, provider_timeout_secs, name);
            spawn_provider_attempt(
                registry.clone(),
                name.clone(),
                messages.clone(),
                prompt,
                timeout,
                Duration::ZERO,
                false,
                tx.clone(),
            );
        }

        while providers_done.len() < total {
            let Some(event) = rx.recv().await else { break };

            match event {
                FanoutEvent::Chunk { .. } => yield event,
                FanoutEvent::Done { provider, raw } => {
                    providers_done.insert(provider.clone());
                    yield FanoutEvent::Done { provider, raw };
                }
                FanoutEvent::Error { provider, message, is_retry } => {
                    let free_tier = registry.get(&provider).map(|p| p.is_free_tier()).unwrap_or(false);
                    let retry_count = *retry_counts.get(&provider).unwrap_or(&0);
                    let should_retry = free_tier && retry_count < MAX_RETRY_ATTEMPTS && !is_retry;

                    if should_retry {
                        retry_counts.insert(provider.clone(), retry_count + 1);
                        let delay_secs = RETRY_BASE_DELAY_SECS * 2f64.powi(retry_count as i32);
                        warn!(provider = %provider, attempt = retry_count + 1, delay_secs, "retrying provider after transport error");
                        let timeout = provider_timeout(&registry, provider_timeout_secs, &provider);
                        spawn_provider_attempt(
                            registry.clone(),
                            provider.clone(),
                            messages.clone(),
                            prompt,
                            timeout,
                            Duration::from_secs_f64(delay_secs),
                            true,
                            tx.clone(),
                        );
                        yield FanoutEvent::Retry { provider, attempt: retry_count + 1, delay_secs };
                    } else {
                        providers_done.insert(provider.clone());
                        yield FanoutEvent::Error { provider, message, is_retry };
                    }
                }
                FanoutEvent::Retry { .. } => {}
            }
        }
    })
}

/// Assigns the stable `label_to_provider` / `provider_to_label` bijection
/// at stage-1 start (spec §3 "label bijection"). Only the first 26
/// providers get a label; SPEC_FULL.md §D.2a decided this caps silently
/// rather than panicking, since nothing in the spec bounds the provider
/// count.
fn assign_labels(state: &mut PipelineState, providers: &[String]) {
    let alphabet: Vec<char> = PROVIDER_LABELS.chars().collect();
    for (idx, name) in providers.iter().enumerate() {
        let Some(letter) = alphabet.get(idx) else {
            warn!(provider = %name, "more than 26 providers configured, leaving unlabelled");
            break;
        };
        let label = letter.to_string();
        state.label_to_provider.insert(label.clone(), name.clone());
        state.provider_to_label.insert(name.clone(), label);
    }
}

fn text_only_projection(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .map(|m| if m.role == Role::User { extract_text_only(m) } else { m.clone() })
        .collect()
}

fn append_context_turn(messages: &[Message], context: String) -> Vec<Message> {
    let mut out = messages.to_vec();
    out.push(Message::text(Role::User, context));
    out
}

/// Drives the complete 4-stage pipeline for one question and returns the
/// SSE text stream (spec §4.E, §6).
pub fn run_pipeline(
    registry: Arc<ProviderRegistry>,
    provider_order: Vec<String>,
    min_providers: usize,
    provider_timeout_secs: u64,
    messages: Vec<Message>,
    question: String,
) -> BoxStream<String> {
    Box::pin(stream! {
        let mut state = PipelineState { question: question.clone(), ..Default::default() };
        assign_labels(&mut state, &provider_order);

        // ---- Stage 1 ----
        yield format_pipeline_sse("step_start", "system", json!({"step": 1, "name": "Initial Responses"}));
        state.current_step = 1;

        let has_any_images = messages.iter().any(has_images);
        let mut stage1_providers = provider_order.clone();
        if has_any_images {
            stage1_providers.retain(|name| registry.get(name).map(|p| p.supports_vision()).unwrap_or(false));
            if stage1_providers.is_empty() {
                yield format_pipeline_sse(
                    "error",
                    "system",
                    json!({"message": "No vision-capable providers available for image analysis"}),
                );
                return;
            }
            info!(count = stage1_providers.len(), "using vision-capable providers for stage 1");
        }

        let shared_messages = Arc::new(messages.clone());
        let mut stage1_stream = run_providers_concurrently(
            registry.clone(),
            stage1_providers,
            shared_messages.clone(),
            STEP1_PROMPT,
            provider_timeout_secs,
        );
        while let Some(event) = stage1_stream.next().await {
            match event {
                FanoutEvent::Chunk { provider, content } => {
                    yield format_pipeline_sse("step1_chunk", &provider, json!({"content": content}));
                }
                FanoutEvent::Done { provider, raw } => {
                    let parsed = parse_step1_response(&provider, &raw);
                    yield format_pipeline_sse(
                        "step1_done",
                        &provider,
                        json!({
                            "success": !parsed.answer.is_empty(),
                            "confidence": parsed.confidence,
                            "facts_count": parsed.atomic_facts.len(),
                        }),
                    );
                    state.step1_responses.insert(provider, parsed);
                }
                FanoutEvent::Error { provider, message, .. } => {
                    state.errors.entry("step1".to_string()).or_default().push(format!("{provider}: {message}"));
                    yield format_pipeline_sse("step1_error", &provider, json!({"error": message}));
                }
                FanoutEvent::Retry { provider, attempt, delay_secs } => {
                    yield format_pipeline_sse("step1_retry", &provider, json!({"attempt": attempt, "delay": delay_secs}));
                }
            }
        }

        yield format_pipeline_sse("step_complete", "system", json!({"step": 1, "count": state.step1_responses.len()}));

        if state.step1_responses.len() < min_providers {
            yield format_pipeline_sse(
                "error",
                "pipeline",
                json!({"message": format!("Not enough Step 1 responses ({}/{})", state.step1_responses.len(), min_providers)}),
            );
            yield format_pipeline_sse("pipeline_complete", "system", serde_json::to_value(state.summary()).unwrap());
            return;
        }

        // Images never reach stages 2-4 (spec §4.E.2, §8 invariant).
        let text_only_messages = text_only_projection(&messages);

        // ---- Stage 2 ----
        yield format_pipeline_sse("step_start", "system", json!({"step": 2, "name": "MoA Refinement"}));
        state.current_step = 2;

        let step2_context = build_step2_context(&state.question, &state.step1_responses, &state.provider_to_label);
        let step2_messages = Arc::new(append_context_turn(&text_only_messages, step2_context));

        let mut stage2_stream = run_providers_concurrently(
            registry.clone(),
            provider_order.clone(),
            step2_messages.clone(),
            STEP2_PROMPT,
            provider_timeout_secs,
        );
        while let Some(event) = stage2_stream.next().await {
            match event {
                FanoutEvent::Chunk { provider, content } => {
                    yield format_pipeline_sse("step2_chunk", &provider, json!({"content": content}));
                }
                FanoutEvent::Done { provider, raw } => {
                    let parsed = parse_step2_response(&provider, &raw);
                    yield format_pipeline_sse(
                        "step2_done",
                        &provider,
                        json!({
                            "success": !parsed.improved_answer.is_empty(),
                            "confidence": parsed.confidence,
                            "parsed": {
                                "improved_answer": parsed.improved_answer,
                                "confidence": parsed.confidence,
                                "improvements": parsed.improvements,
                            },
                        }),
                    );
                    state.step2_responses.insert(provider, parsed);
                }
                FanoutEvent::Error { provider, message, .. } => {
                    state.errors.entry("step2".to_string()).or_default().push(format!("{provider}: {message}"));
                    yield format_pipeline_sse("step2_error", &provider, json!({"error": message}));
                }
                FanoutEvent::Retry { provider, attempt, delay_secs } => {
                    yield format_pipeline_sse("step2_retry", &provider, json!({"attempt": attempt, "delay": delay_secs}));
                }
            }
        }

        yield format_pipeline_sse("step_complete", "system", json!({"step": 2, "count": state.step2_responses.len()}));

        if state.step2_responses.len() < min_providers {
            yield format_pipeline_sse(
                "error",
                "pipeline",
                json!({"message": format!("Not enough Step 2 responses ({}/{})", state.step2_responses.len(), min_providers)}),
            );
            yield format_pipeline_sse("pipeline_complete", "system", serde_json::to_value(state.summary()).unwrap());
            return;
        }

        // ---- Stage 3 ----
        yield format_pipeline_sse("step_start", "system", json!({"step": 3, "name": "Peer Evaluation"}));
        state.current_step = 3;

        let step3_context = build_step3_context(&state.question, &state.step2_responses, &state.provider_to_label);
        let step3_messages = Arc::new(append_context_turn(&text_only_messages, step3_context));

        let mut stage3_stream = run_providers_concurrently(
            registry.clone(),
            provider_order.clone(),
            step3_messages.clone(),
            STEP3_PROMPT,
            provider_timeout_secs,
        );
        while let Some(event) = stage3_stream.next().await {
            match event {
                FanoutEvent::Chunk { provider, content } => {
                    yield format_pipeline_sse("step3_chunk", &provider, json!({"content": content}));
                }
                FanoutEvent::Done { provider, raw } => {
                    let parsed = parse_step3_response(&provider, &raw);
                    let evaluations: HashMap<String, serde_json::Value> = parsed
                        .evaluations
                        .iter()
                        .map(|(label, eval)| {
                            (label.clone(), json!({"score": eval.score, "strengths": eval.strengths, "weaknesses": eval.weaknesses}))
                        })
                        .collect();
                    yield format_pipeline_sse(
                        "step3_done",
                        &provider,
                        json!({
                            "success": true,
                            "ranking": parsed.ranking,
                            "flagged_count": parsed.flagged_facts.len(),
                            "parsed": {
                                "ranking": parsed.ranking,
                                "predicted_winner": parsed.predicted_winner,
                                "evaluations": evaluations,
                                "flagged_facts": parsed.flagged_facts,
                                "consensus_facts": parsed.consensus_facts,
                            },
                        }),
                    );
                    state.step3_responses.insert(provider, parsed);
                }
                FanoutEvent::Error { provider, message, .. } => {
                    state.errors.entry("step3".to_string()).or_default().push(format!("{provider}: {message}"));
                    yield format_pipeline_sse("step3_error", &provider, json!({"error": message}));
                }
                FanoutEvent::Retry { provider, attempt, delay_secs } => {
                    yield format_pipeline_sse("step3_retry", &provider, json!({"attempt": attempt, "delay": delay_secs}));
                }
            }
        }

        yield format_pipeline_sse("step_complete", "system", json!({"step": 3, "count": state.step3_responses.len()}));

        // ---- Stage 4 ----
        yield format_pipeline_sse("step_start", "system", json!({"step": 4, "name": "KEA Synthesis"}));
        state.current_step = 4;

        let synthesizer = select_synthesizer(
            &state.step3_responses,
            &state.label_to_provider,
            &state.step2_responses,
            &provider_order,
        );

        match synthesizer.and_then(|name| registry.get(&name).map(|_| name)) {
            None => {
                yield format_pipeline_sse("step4_error", "pipeline", json!({"error": "No synthesizer available"}));
            }
            Some(synthesizer_name) => {
                let label = state.provider_to_label.get(&synthesizer_name).cloned().unwrap_or_else(|| synthesizer_name.clone());
                yield format_pipeline_sse("step4_synthesizer", &synthesizer_name, json!({"label": label}));

                let step4_context = build_step4_context(
                    &state.question,
                    &state.step2_responses,
                    &state.step3_responses,
                    &state.provider_to_label,
                );
                let step4_messages = Arc::new(append_context_turn(&text_only_messages, step4_context));
                let timeout = provider_timeout(&registry, provider_timeout_secs, &synthesizer_name);

                // Stage 4 is a single stream with no retry (SPEC_FULL.md §D.3,
                // resolving the spec's open question: the source only retries
                // the fan-out stages).
                let (tx, mut rx) = mpsc::channel::<FanoutEvent>(64);
                spawn_provider_attempt(
                    registry.clone(),
                    synthesizer_name.clone(),
                    step4_messages,
                    STEP4_PROMPT,
                    timeout,
                    Duration::ZERO,
                    true,
                    tx,
                );

                while let Some(event) = rx.recv().await {
                    match event {
                        FanoutEvent::Chunk { provider, content } => {
                            yield format_pipeline_sse("step4_chunk", &provider, json!({"content": content}));
                        }
                        FanoutEvent::Done { provider, raw } => {
                            let parsed = parse_step4_response(&provider, &raw);
                            yield format_pipeline_sse(
                                "step4_done",
                                &provider,
                                json!({
                                    "success": !parsed.final_answer.is_empty(),
                                    "final_answer": parsed.final_answer,
                                    "confidence": parsed.confidence,
                                }),
                            );
                            state.step4_response = Some(parsed);
                            break;
                        }
                        FanoutEvent::Error { provider, message, .. } => {
                            yield format_pipeline_sse("step4_error", &provider, json!({"error": message}));
                            break;
                        }
                        FanoutEvent::Retry { .. } => {}
                    }
                }
            }
        }

        yield format_pipeline_sse(
            "step_complete",
            "system",
            json!({"step": 4, "has_response": state.step4_response.is_some()}),
        );

        yield format_pipeline_sse("pipeline_complete", "system", serde_json::to_value(state.summary()).unwrap());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_labels_stops_at_26_providers() {
        let mut state = PipelineState::default();
        let providers: Vec<String> = (0..30).map(|i| format!("provider-{i}")).collect();
        assign_labels(&mut state, &providers);
        assert_eq!(state.label_to_provider.len(), 26);
        assert!(!state.provider_to_label.contains_key("provider-26"));
    }

    #[test]
    fn text_only_projection_only_touches_user_messages() {
        let messages = vec![
            Message::text(Role::User, "hi"),
            Message::text(Role::Assistant, "hello"),
        ];
        let projected = text_only_projection(&messages);
        assert_eq!(projected[0].content, Content::Text("hi".to_string()));
        assert_eq!(projected[1].content, Content::Text("hello".to_string()));
    }

    #[test]
    fn summary_reports_no_final_answer_when_step4_absent() {
        let state = PipelineState { question: "q".to_string(), ..Default::default() };
        let summary = state.summary();
        assert!(!summary.has_final);
        assert_eq!(summary.final_answer, None);
    }
}
