//! Google `generateContent` adapter (spec §4.A "google-generate-content").
//!
//! Grounded in `providers/gemini.py`: API key passed as a query parameter,
//! `alt=sse` streaming, `systemInstruction` for the system prompt, and no
//! explicit stream-end signal — the adapter synthesizes a `done` chunk once
//! the body ends. Content formatting follows `format_for_gemini` in
//! `utils/message_helpers.py` (`[messages.rs::format_for_google]`) rather
//! than the original's text-only shortcut, so vision messages still carry
//! their `inline_data` parts.

use async_stream::stream;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::messages::{format_for_google, Message};

use super::sse::LineBuffer;
use super::{BoxStream, ProviderAdapter, ProviderDescriptor, StreamChunk};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const MAX_OUTPUT_TOKENS: u32 = 4096;

pub struct GoogleAdapter {
    descriptor: ProviderDescriptor,
    client: reqwest::Client,
}

impl GoogleAdapter {
    pub fn new(descriptor: ProviderDescriptor, client: reqwest::Client) -> Self {
        GoogleAdapter { descriptor, client }
    }

    fn base_url(&self) -> &str {
        self.descriptor.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }
}

fn extract_content(data: &Value) -> Option<String> {
    let parts = data.get("candidates")?.get(0)?.get("content")?.get("parts")?.as_array()?;
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

impl ProviderAdapter for GoogleAdapter {
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
        let url = format!(
            "{}/models/{}:streamGenerateContent?key={}&alt=sse",
            self.base_url(),
            model,
            api_key
        );
        let client = self.client.clone();

        let contents: Vec<Value> = messages.iter().map(format_for_google).collect();
        let mut payload = json!({
            "contents": contents,
            "generationConfig": {"maxOutputTokens": MAX_OUTPUT_TOKENS},
        });
        if let Some(system) = system_prompt {
            payload["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        Box::pin(stream! {
            let response = client.post(&url).json(&payload).send().await;
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
                    if let Some(text) = extract_content(&data) {
                        yield StreamChunk::content(name.clone(), text);
                    }
                }
            }

            // Gemini sends no explicit done event; the stream ending is the signal.
            yield StreamChunk::done(name);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_content_reads_first_part_with_text() {
        let data = json!({
            "candidates": [{"content": {"parts": [{"text": "hi"}]}}]
        });
        assert_eq!(extract_content(&data), Some("hi".to_string()));
    }

    #[test]
    fn extract_content_returns_none_without_candidates() {
        assert_eq!(extract_content(&json!({})), None);
    }
}
