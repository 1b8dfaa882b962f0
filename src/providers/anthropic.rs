//! Anthropic Messages API adapter (spec §4.A "anthropic-messages" kind).
//!
//! Grounded in `providers/claude.py`: `x-api-key` + `anthropic-version`
//! headers, system prompt carried in a top-level `system` field rather than
//! as a message, and an SSE stream where `content_block_delta` events carry
//! text and `message_stop` ends the stream.

use async_stream::stream;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::messages::{format_for_anthropic, Message};

use super::sse::LineBuffer;
use super::{BoxStream, ProviderAdapter, ProviderDescriptor, StreamChunk};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    descriptor: ProviderDescriptor,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(descriptor: ProviderDescriptor, client: reqwest::Client) -> Self {
        AnthropicAdapter { descriptor, client }
    }

    fn base_url(&self) -> &str {
        self.descriptor
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
    }
}

/// `None` when the event carries no text delta to surface.
fn extract_content(data: &Value) -> Option<String> {
    if data.get("type")?.as_str()? != "content_block_delta" {
        return None;
    }
    data.get("delta")?
        .get("text")?
        .as_str()
        .map(|s| s.to_string())
}

fn is_done(data: &Value) -> bool {
    data.get("type").and_then(Value::as_str) == Some("message_stop")
}

impl ProviderAdapter for AnthropicAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn stream_chat(
        &self,
        messages: &[Message],
        system_prompt: Option<&str>,
    ) -> BoxStream<StreamChunk> {
        let name = self.descriptor.name.clone();
        let model = self.descriptor.model.clone();
        let api_key = self.descriptor.api_key.clone().unwrap_or_default();
        let url = format!("{}/messages", self.base_url());
        let client = self.client.clone();

        let prepared: Vec<Value> = messages.iter().map(format_for_anthropic).collect();
        let mut payload = json!({
            "model": model,
            "max_tokens": MAX_TOKENS,
            "messages": prepared,
            "stream": true,
        });
        if let Some(system) = system_prompt {
            payload["system"] = json!(system);
        }

        Box::pin(stream! {
            let response = client
                .post(&url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&payload)
                .send()
                .await;

            let response = match response {
                Ok(resp) => resp,
                Err(err) => {
                    yield StreamChunk::error(name, err.to_string());
                    return;
                }
            };

            let response = match response.error_for_status() {
                Ok(resp) => resp,
                Err(err) => {
                    yield StreamChunk::error(name, err.to_string());
                    return;
                }
            };

            let mut body = response.bytes_stream();
            let mut buffer = LineBuffer::new();

            while let Some(next) = body.next().await {
                let bytes = match next {
                    Ok(b) => b,
                    Err(err) => {
                        yield StreamChunk::error(name, err.to_string());
                        return;
                    }
                };

                for line in buffer.feed(&bytes) {
                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    let data: Value = match serde_json::from_str(payload) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    if is_done(&data) {
                        yield StreamChunk::done(name.clone());
                        return;
                    }
                    if let Some(text) = extract_content(&data) {
                        if !text.is_empty() {
                            yield StreamChunk::content(name.clone(), text);
                        }
                    }
                }
            }

            yield StreamChunk::done(name);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_content_reads_content_block_delta() {
        let data = json!({"type": "content_block_delta", "delta": {"text": "hi"}});
        assert_eq!(extract_content(&data), Some("hi".to_string()));
    }

    #[test]
    fn extract_content_ignores_other_event_types() {
        let data = json!({"type": "message_start"});
        assert_eq!(extract_content(&data), None);
    }

    #[test]
    fn is_done_recognizes_message_stop() {
        assert!(is_done(&json!({"type": "message_stop"})));
        assert!(!is_done(&json!({"type": "content_block_delta"})));
    }
}
