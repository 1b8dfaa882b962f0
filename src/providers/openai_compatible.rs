//! Shared adapter for the three OpenAI-shaped wire kinds: `openai-chat`,
//! `openrouter-chat`, `openai-compatible-chat` (spec §4.A).
//!
//! Grounded in `providers/base.py`'s `OpenAIFormatProvider` (shared
//! `/chat/completions` request/response shape), `providers/openrouter.py`
//! (attribution headers + error-body capture on non-200 responses), and
//! `providers/openai_compatible.py` (optional `Authorization` header, caller
//! supplied `base_url`/`name`, always-configured).

use async_stream::stream;
use futures_util::StreamExt;
use serde_json::{json, Value};

use crate::messages::{format_for_openai, Message, Role};

use super::sse::LineBuffer;
use super::{BoxStream, ProviderAdapter, ProviderDescriptor, ProviderKind, StreamChunk};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct OpenAiCompatibleAdapter {
    descriptor: ProviderDescriptor,
    client: reqwest::Client,
    app_url: String,
    app_name: String,
}

impl OpenAiCompatibleAdapter {
    pub fn new(
        descriptor: ProviderDescriptor,
        client: reqwest::Client,
        app_url: String,
        app_name: String,
    ) -> Self {
        OpenAiCompatibleAdapter { descriptor, client, app_url, app_name }
    }

    fn base_url(&self) -> String {
        if let Some(url) = &self.descriptor.base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.descriptor.kind {
            ProviderKind::OpenrouterChat => OPENROUTER_BASE_URL.to_string(),
            _ => OPENAI_BASE_URL.to_string(),
        }
    }
}

fn extract_delta_content(data: &Value) -> Option<String> {
    data.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

/// Best-effort extraction of `error.message` from a JSON error body, falling
/// back to the raw body text (spec §4.E.5 "generalized error-body capture",
/// grounded in `providers/openrouter.py`'s non-200 handling).
fn error_message_from_body(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        if let Some(message) = parsed.get("error").and_then(|e| e.get("message")).and_then(Value::as_str) {
            return format!("HTTP {status}: {message}");
        }
    }
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    }
}

impl ProviderAdapter for OpenAiCompatibleAdapter {
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
        let api_key = self.descriptor.api_key.clone();
        let kind = self.descriptor.kind;
        let url = format!("{}/chat/completions", self.base_url());
        let client = self.client.clone();
        let app_url = self.app_url.clone();
        let app_name = self.app_name.clone();

        let mut formatted: Vec<Value> = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system_prompt {
            formatted.push(json!({"role": "system", "content": system}));
        }
        for message in messages {
            if message.role == Role::User || message.role == Role::Assistant {
                formatted.push(format_for_openai(message));
            }
        }
        let payload = json!({
            "model": model,
            "messages": formatted,
            "stream": true,
        });

        Box::pin(stream! {
            let mut request = client.post(&url).json(&payload);
            if let Some(key) = api_key.filter(|k| !k.is_empty()) {
                request = request.bearer_auth(key);
            }
            if kind == ProviderKind::OpenrouterChat {
                request = request
                    .header("HTTP-Referer", app_url)
                    .header("X-Title", app_name);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(err) => {
                    yield StreamChunk::error(name, err.to_string());
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                yield StreamChunk::error(name, error_message_from_body(status, &body));
                return;
            }

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
                    if payload == "[DONE]" {
                        yield StreamChunk::done(name.clone());
                        return;
                    }

                    let data: Value = match serde_json::from_str(payload) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };

                    if let Some(text) = extract_delta_content(&data) {
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
