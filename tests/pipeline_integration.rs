//! End-to-end pipeline tests against fake in-process providers. Exercises
//! the scenarios from spec.md §8 without any real network traffic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;

use kea_pipeline::messages::{Content, ContentPart, ImageSource, Message, Role};
use kea_pipeline::pipeline::run_pipeline;
use kea_pipeline::providers::{
    BoxStream, ProviderAdapter, ProviderDescriptor, ProviderKind, ProviderRegistry, StreamChunk,
};

enum FakeOutcome {
    Text(String),
    Error(String),
}

struct FakeAdapter {
    descriptor: ProviderDescriptor,
    outcomes: Vec<FakeOutcome>,
    call_count: AtomicUsize,
}

impl ProviderAdapter for FakeAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn stream_chat(&self, _messages: &[Message], _system_prompt: Option<&str>) -> BoxStream<StreamChunk> {
        let name = self.descriptor.name.clone();
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        let outcome_idx = idx.min(self.outcomes.len() - 1);
        let outcome = match &self.outcomes[outcome_idx] {
            FakeOutcome::Text(text) => Ok(text.clone()),
            FakeOutcome::Error(message) => Err(message.clone()),
        };
        Box::pin(async_stream::stream! {
            match outcome {
                Ok(text) => {
                    yield StreamChunk::content(name.clone(), text);
                    yield StreamChunk::done(name);
                }
                Err(message) => {
                    yield StreamChunk::error(name, message);
                }
            }
        })
    }
}

fn descriptor(name: &str, kind: ProviderKind, model: &str, supports_vision: bool) -> ProviderDescriptor {
    ProviderDescriptor {
        name: name.to_string(),
        kind,
        model: model.to_string(),
        api_key: Some("test-key".to_string()),
        base_url: None,
        supports_vision,
    }
}

fn fake_provider(name: &str, outcomes: Vec<FakeOutcome>) -> Box<dyn ProviderAdapter> {
    Box::new(FakeAdapter {
        descriptor: descriptor(name, ProviderKind::AnthropicMessages, "fake-model", true),
        outcomes,
        call_count: AtomicUsize::new(0),
    })
}

fn fake_provider_novision(name: &str, outcomes: Vec<FakeOutcome>) -> Box<dyn ProviderAdapter> {
    Box::new(FakeAdapter {
        descriptor: descriptor(name, ProviderKind::AnthropicMessages, "fake-model", false),
        outcomes,
        call_count: AtomicUsize::new(0),
    })
}

fn fake_free_tier_provider(name: &str, outcomes: Vec<FakeOutcome>) -> Box<dyn ProviderAdapter> {
    Box::new(FakeAdapter {
        descriptor: descriptor(name, ProviderKind::OpenrouterChat, "free-model:free", true),
        outcomes,
        call_count: AtomicUsize::new(0),
    })
}

fn registry_with(adapters: Vec<Box<dyn ProviderAdapter>>) -> Arc<ProviderRegistry> {
    Arc::new(ProviderRegistry::from_adapters(adapters))
}

/// Every record needed by every stage's parser, so one fixture satisfies
/// stage 1 through 4 regardless of which stage's prompt produced it.
fn good_json() -> String {
    serde_json::json!({
        "answer": "42",
        "confidence": 0.9,
        "atomic_facts": ["deep thought said so"],
        "improved_answer": "42, refined",
        "improvements": ["cross-checked with peers"],
        "ranking": ["A", "B"],
        "predicted_winner": "A",
        "evaluations": {"A": {"score": 9, "strengths": "clear", "weaknesses": "terse"}},
        "flagged_facts": [],
        "consensus_facts": ["the answer is numeric"],
        "final_answer": "The answer is 42.",
        "sources_used": ["A"],
        "excluded": []
    })
    .to_string()
}

fn user_text(text: &str) -> Message {
    Message::text(Role::User, text)
}

async fn run_and_collect(
    registry: Arc<ProviderRegistry>,
    provider_order: Vec<String>,
    min_providers: usize,
    messages: Vec<Message>,
    question: &str,
) -> Vec<String> {
    let stream = run_pipeline(registry, provider_order, min_providers, 30, messages, question.to_string());
    stream.collect().await
}

fn parse_event(raw: &str) -> (String, Value) {
    let mut lines = raw.lines();
    let event = lines.next().unwrap().strip_prefix("event: ").unwrap().to_string();
    let data = lines.next().unwrap().strip_prefix("data: ").unwrap();
    (event, serde_json::from_str(data).unwrap())
}

#[tokio::test]
async fn pipeline_completes_when_minimum_providers_met() {
    let registry = registry_with(vec![
        fake_provider("p1", vec![FakeOutcome::Text(good_json())]),
        fake_provider("p2", vec![FakeOutcome::Text(good_json())]),
    ]);
    let events = run_and_collect(
        registry,
        vec!["p1".to_string(), "p2".to_string()],
        2,
        vec![user_text("what is the answer?")],
        "what is the answer?",
    )
    .await;
    let parsed: Vec<_> = events.iter().map(|e| parse_event(e)).collect();

    let summary = parsed.iter().find(|(name, _)| name == "pipeline_complete").unwrap();
    assert_eq!(summary.1["has_final"], true);
    assert_eq!(summary.1["step1_count"], 2);
    assert_eq!(summary.1["final_answer"], "The answer is 42.");
    assert!(!parsed.iter().any(|(name, _)| name == "error"));
}

#[tokio::test]
async fn pipeline_terminates_early_when_step1_misses_minimum() {
    let registry = registry_with(vec![
        fake_provider("p1", vec![FakeOutcome::Text(good_json())]),
        fake_provider("p2", vec![FakeOutcome::Text(good_json())]),
    ]);
    let events = run_and_collect(
        registry,
        vec!["p1".to_string(), "p2".to_string()],
        3,
        vec![user_text("what is the answer?")],
        "what is the answer?",
    )
    .await;
    let parsed: Vec<_> = events.iter().map(|e| parse_event(e)).collect();

    assert!(parsed.iter().any(|(name, _)| name == "error"));
    assert!(!parsed.iter().any(|(name, _)| name == "step2_done"));
    let summary = parsed.iter().find(|(name, _)| name == "pipeline_complete").unwrap();
    assert_eq!(summary.1["has_final"], false);
}

#[tokio::test]
async fn free_tier_provider_retries_after_transport_error() {
    let registry = registry_with(vec![fake_free_tier_provider(
        "free1",
        vec![FakeOutcome::Error("connection reset".to_string()), FakeOutcome::Text(good_json())],
    )]);
    let events = run_and_collect(
        registry,
        vec!["free1".to_string()],
        1,
        vec![user_text("q")],
        "q",
    )
    .await;
    let parsed: Vec<_> = events.iter().map(|e| parse_event(e)).collect();

    assert!(parsed.iter().any(|(name, _)| name == "step1_retry"));
    let done = parsed
        .iter()
        .find(|(name, data)| name == "step1_done" && data["provider"] == "free1")
        .expect("retried provider should eventually succeed");
    assert_eq!(done.1["success"], true);
}

#[tokio::test]
async fn vision_filtering_restricts_stage_one_to_vision_capable_providers() {
    let registry = registry_with(vec![
        fake_provider("vision1", vec![FakeOutcome::Text(good_json())]),
        fake_provider_novision("novision1", vec![FakeOutcome::Text(good_json())]),
    ]);
    let image_message = Message {
        role: Role::User,
        content: Content::Parts(vec![
            ContentPart::Text { text: "describe this".to_string() },
            ContentPart::Image {
                source: ImageSource {
                    kind: "base64".to_string(),
                    media_type: "image/png".to_string(),
                    data: "AAAA".to_string(),
                },
            },
        ]),
    };
    let events = run_and_collect(
        registry,
        vec!["vision1".to_string(), "novision1".to_string()],
        1,
        vec![image_message],
        "describe this",
    )
    .await;
    let parsed: Vec<_> = events.iter().map(|e| parse_event(e)).collect();

    let step1_dones: Vec<_> = parsed.iter().filter(|(name, _)| name == "step1_done").collect();
    assert_eq!(step1_dones.len(), 1);
    assert_eq!(step1_dones[0].1["provider"], "vision1");

    let step2_dones: Vec<_> = parsed.iter().filter(|(name, _)| name == "step2_done").collect();
    assert_eq!(step2_dones.len(), 2);
}

#[tokio::test]
async fn tolerant_parser_salvages_unterminated_stage_four_response() {
    let unterminated = "```json\n{\"final_answer\": \"Because of thermal expansion\",".to_string();
    let registry = registry_with(vec![fake_provider(
        "solo",
        vec![
            FakeOutcome::Text(good_json()),
            FakeOutcome::Text(good_json()),
            FakeOutcome::Text(good_json()),
            FakeOutcome::Text(unterminated),
        ],
    )]);
    let events = run_and_collect(
        registry,
        vec!["solo".to_string()],
        1,
        vec![user_text("why did the metal expand?")],
        "why did the metal expand?",
    )
    .await;
    let parsed: Vec<_> = events.iter().map(|e| parse_event(e)).collect();

    let step4_done = parsed.iter().find(|(name, _)| name == "step4_done").unwrap();
    assert_eq!(step4_done.1["final_answer"], "Because of thermal expansion");
    assert_eq!(step4_done.1["success"], true);
}
