//! Universal message shape and the Message Normaliser (spec §3, §4.C).
//!
//! A [`Message`] is the one format every caller constructs and every
//! provider adapter translates out of. Content is either a plain string or
//! an ordered list of [`ContentPart`]s (text or image). The functions here
//! are all pure: no I/O, no provider knowledge beyond the wire shape they
//! produce.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Message { role, content: Content::Text(text.into()) }
    }
}

/// `has_images(message) -> bool` (spec §4.C).
pub fn has_images(message: &Message) -> bool {
    match &message.content {
        Content::Text(_) => false,
        Content::Parts(parts) => parts.iter().any(|p| matches!(p, ContentPart::Image { .. })),
    }
}

/// `extract_text_only(message) -> message` (spec §4.C, §4.E.2).
///
/// Concatenates text parts with `\n`; a message whose content was only
/// images collapses to the literal string `(image)`. Idempotent: applying
/// this twice is the same as applying it once (a `Content::Text` message
/// passes straight through).
pub fn extract_text_only(message: &Message) -> Message {
    match &message.content {
        Content::Text(_) => message.clone(),
        Content::Parts(parts) => {
            let joined = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            let text = if joined.trim().is_empty() { "(image)".to_string() } else { joined };
            Message { role: message.role, content: Content::Text(text) }
        }
    }
}

/// Extract `(mime, base64_data)` from a `data:<mime>;base64,<data>` URL,
/// falling back to `image/jpeg` when the prefix doesn't match (spec §4.C).
pub fn mime_and_data_from_url(data_url: &str) -> (String, String) {
    if let Some(rest) = data_url.strip_prefix("data:") {
        if let Some((mime, data)) = rest.split_once(";base64,") {
            return (mime.to_string(), data.to_string());
        }
    }
    ("image/jpeg".to_string(), data_url.to_string())
}

/// Reconstruct a `data:<mime>;base64,<data>` URL from its parts.
pub fn data_url_from_mime_and_data(mime: &str, data: &str) -> String {
    format!("data:{mime};base64,{data}")
}

// --- Wire-format projections (spec §4.A, §4.C) ---

/// Anthropic Messages API: content passes through unchanged.
pub fn format_for_anthropic(message: &Message) -> serde_json::Value {
    match &message.content {
        Content::Text(text) => serde_json::json!({
            "role": role_str(message.role),
            "content": text,
        }),
        Content::Parts(parts) => serde_json::json!({
            "role": role_str(message.role),
            "content": parts.iter().map(part_to_anthropic_json).collect::<Vec<_>>(),
        }),
    }
}

fn part_to_anthropic_json(part: &ContentPart) -> serde_json::Value {
    match part {
        ContentPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ContentPart::Image { source } => serde_json::json!({
            "type": "image",
            "source": {
                "type": source.kind,
                "media_type": source.media_type,
                "data": source.data,
            }
        }),
    }
}

/// OpenAI / OpenRouter / OpenAI-compatible chat format: images become
/// `image_url` parts carrying a reconstructed data URL (spec §4.A).
pub fn format_for_openai(message: &Message) -> serde_json::Value {
    match &message.content {
        Content::Text(text) => serde_json::json!({
            "role": role_str(message.role),
            "content": text,
        }),
        Content::Parts(parts) => {
            let content: Vec<serde_json::Value> = parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
                    ContentPart::Image { source } => {
                        let url = data_url_from_mime_and_data(&source.media_type, &source.data);
                        serde_json::json!({"type": "image_url", "image_url": {"url": url}})
                    }
                })
                .collect();
            serde_json::json!({"role": role_str(message.role), "content": content})
        }
    }
}

/// Google `generateContent` format: `assistant` becomes `model`, content
/// becomes `parts` of `text` / `inline_data` (spec §4.A).
pub fn format_for_google(message: &Message) -> serde_json::Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "model",
    };
    let parts: Vec<serde_json::Value> = match &message.content {
        Content::Text(text) => vec![serde_json::json!({"text": text})],
        Content::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => serde_json::json!({"text": text}),
                ContentPart::Image { source } => serde_json::json!({
                    "inline_data": {
                        "mime_type": source.media_type,
                        "data": source.data,
                    }
                }),
            })
            .collect(),
    };
    serde_json::json!({"role": role, "parts": parts})
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_part() -> ContentPart {
        ContentPart::Image {
            source: ImageSource {
                kind: "base64".to_string(),
                media_type: "image/png".to_string(),
                data: "AAAA".to_string(),
            },
        }
    }

    #[test]
    fn has_images_detects_image_parts() {
        let msg = Message {
            role: Role::User,
            content: Content::Parts(vec![ContentPart::Text { text: "hi".into() }, image_part()]),
        };
        assert!(has_images(&msg));
        assert!(!has_images(&Message::text(Role::User, "hi")));
    }

    #[test]
    fn extract_text_only_joins_text_parts() {
        let msg = Message {
            role: Role::User,
            content: Content::Parts(vec![
                ContentPart::Text { text: "line one".into() },
                ContentPart::Text { text: "line two".into() },
            ]),
        };
        let out = extract_text_only(&msg);
        assert_eq!(out.content, Content::Text("line one\nline two".to_string()));
    }

    #[test]
    fn extract_text_only_falls_back_to_image_placeholder() {
        let msg = Message { role: Role::User, content: Content::Parts(vec![image_part()]) };
        let out = extract_text_only(&msg);
        assert_eq!(out.content, Content::Text("(image)".to_string()));
    }

    #[test]
    fn extract_text_only_is_idempotent() {
        let msg = Message {
            role: Role::User,
            content: Content::Parts(vec![ContentPart::Text { text: "hi".into() }, image_part()]),
        };
        let once = extract_text_only(&msg);
        let twice = extract_text_only(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn mime_and_data_from_url_parses_data_url() {
        let (mime, data) = mime_and_data_from_url("data:image/png;base64,AAAA");
        assert_eq!(mime, "image/png");
        assert_eq!(data, "AAAA");
    }

    #[test]
    fn mime_and_data_from_url_falls_back_on_garbage() {
        let (mime, data) = mime_and_data_from_url("not-a-data-url");
        assert_eq!(mime, "image/jpeg");
        assert_eq!(data, "not-a-data-url");
    }

    #[test]
    fn format_for_openai_reconstructs_data_url() {
        let msg = Message {
            role: Role::User,
            content: Content::Parts(vec![image_part()]),
        };
        let value = format_for_openai(&msg);
        let url = value["content"][0]["image_url"]["url"].as_str().unwrap();
        assert_eq!(url, "data:image/png;base64,AAAA");
    }

    #[test]
    fn format_for_google_maps_assistant_to_model() {
        let msg = Message::text(Role::Assistant, "hi");
        let value = format_for_google(&msg);
        assert_eq!(value["role"], "model");
    }
}
