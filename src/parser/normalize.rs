//! Field-level normalisation (spec §4.D steps 5-7), grounded in
//! `utils/normalize.py` and `services/pipeline.py::_clean_answer_field`.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Priority order for extracting text from an object with an unknown shape
/// (spec §4.D step 6, `utils/normalize.py::TEXT_KEYS`).
pub const TEXT_KEYS: &[&str] = &[
    "statement",
    "fact",
    "text",
    "content",
    "description",
    "value",
    "improvement",
    "source",
    "item",
    "claim",
    "reason",
];

/// Recursive nested-envelope unwrap depth cap (SPEC_FULL.md §D.1): the
/// Python original recurses with no bound and would stack-overflow on a
/// pathological `{"answer": "{\"answer\": ...}"}` cycle.
const MAX_UNWRAP_DEPTH: u32 = 5;

const ANSWER_KEYS: [&str; 3] = ["final_answer", "answer", "improved_answer"];

fn nested_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)^\s*\{\s*"(?:final_answer|answer|improved_answer)"\s*:\s*"(.+)"#)
            .unwrap()
    })
}

fn trailing_noise_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)",?\s*"(?:confidence|sources_used|excluded|atomic_facts|improvements)".*$"#)
            .unwrap()
    })
}

fn trailing_brace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)"\s*\}\s*$"#).unwrap())
}

/// Clean an answer field that may itself contain a nested JSON/markdown
/// envelope (spec §4.D step 5).
pub fn clean_answer_field(value: &str) -> String {
    clean_answer_field_inner(value, 0)
}

fn clean_answer_field_inner(value: &str, depth: u32) -> String {
    if depth >= MAX_UNWRAP_DEPTH {
        return value.to_string();
    }

    let text = value.trim();
    if !(text.starts_with("```") || text.starts_with('{')) {
        return value.to_string();
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            let inner_json = &text[start..=end];
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(inner_json) {
                for key in ANSWER_KEYS {
                    if let Some(Value::String(nested)) = map.get(key) {
                        if nested != value {
                            return clean_answer_field_inner(nested, depth + 1);
                        }
                    }
                }
            }
        }
    }

    if text.starts_with('{') {
        if let Some(caps) = nested_prefix_re().captures(text) {
            let mut content = caps[1].to_string();
            content = trailing_noise_re().replace(&content, "").into_owned();
            content = trailing_brace_re().replace(&content, "").into_owned();
            if content.len() > 5 {
                return content.trim().to_string();
            }
        }
    }

    value.to_string()
}

fn extract_text_from_object(obj: &serde_json::Map<String, Value>) -> String {
    for key in TEXT_KEYS {
        if let Some(Value::String(s)) = obj.get(*key) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    for value in obj.values() {
        if let Value::String(s) = value {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    String::new()
}

/// Coerce a JSON value that should be a list of strings into one,
/// reducing dict elements to their best-guess text and dropping blanks
/// (spec §4.D step 6, `utils/normalize.py::normalize_string_list`).
pub fn normalize_string_list(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    let mut result = Vec::new();
    for item in items {
        match item {
            Value::String(s) => {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    result.push(trimmed.to_string());
                }
            }
            Value::Object(map) => {
                let text = extract_text_from_object(map);
                if !text.is_empty() {
                    result.push(text);
                }
            }
            Value::Null => {}
            other => result.push(other.to_string()),
        }
    }
    result
}

/// Coerce a value expected to be a string but that may be a list
/// (spec §4.D step 7, `utils/normalize.py::normalize_to_string`).
pub fn normalize_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let s = match item {
                    Value::String(s) => s.trim().to_string(),
                    Value::Null => return None,
                    other => other.to_string(),
                };
                if s.is_empty() { None } else { Some(s) }
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_answer_field_unwraps_nested_envelope() {
        let raw = r#"{"final_answer": "the real answer", "confidence": 0.9}"#;
        assert_eq!(clean_answer_field(raw), "the real answer");
    }

    #[test]
    fn clean_answer_field_recurses_through_double_nesting() {
        let inner = r#"{"answer": "deep answer"}"#;
        let outer = format!(r#"{{"final_answer": {}}}"#, serde_json::to_string(inner).unwrap());
        assert_eq!(clean_answer_field(&outer), "deep answer");
    }

    #[test]
    fn clean_answer_field_passes_through_plain_text() {
        assert_eq!(clean_answer_field("plain text"), "plain text");
    }

    #[test]
    fn clean_answer_field_falls_back_on_unterminated_json() {
        let raw = r#"{"final_answer": "Because of thermal expansion"#;
        assert_eq!(clean_answer_field(raw), "Because of thermal expansion");
    }

    #[test]
    fn normalize_string_list_extracts_text_from_objects() {
        let value = json!([{"statement": "fact1"}, "fact2", {"verified": true, "fact": "claim"}]);
        assert_eq!(normalize_string_list(&value), vec!["fact1", "fact2", "claim"]);
    }

    #[test]
    fn normalize_string_list_returns_empty_for_non_array() {
        assert_eq!(normalize_string_list(&json!("not a list")), Vec::<String>::new());
    }

    #[test]
    fn normalize_to_string_joins_list_with_commas() {
        assert_eq!(normalize_to_string(&json!(["good", "accurate"])), "good, accurate");
    }

    #[test]
    fn normalize_to_string_passes_through_plain_string() {
        assert_eq!(normalize_to_string(&json!("hello")), "hello");
    }
}
