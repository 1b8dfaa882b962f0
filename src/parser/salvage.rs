//! Last-resort text salvage (spec §4.D step 8), grounded in
//! `services/pipeline.py::_extract_text_fallback`. Used when neither a fast
//! parse nor JSON repair produced anything usable; tries a cascade of
//! increasingly loose patterns before giving up and returning the raw text.

use regex::Regex;
use std::sync::OnceLock;

use super::normalize::clean_answer_field;

fn fence_strip_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^```(?:json|markdown)?\s*").unwrap())
}

fn trailing_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\s*```\s*$").unwrap())
}

fn quoted_answer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)["']?(?:final_answer|answer|improved_answer)["']?\s*:\s*["'](.+)"#)
            .unwrap()
    })
}

fn answer_noise_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)["'],?\s*["']?(?:confidence|sources_used|excluded|atomic_facts)["']?\s*:.*$"#)
            .unwrap()
    })
}

fn trailing_quote_brace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?s)["',]*\s*\}?\s*$"#).unwrap())
}

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json|markdown)?\s*(.*?)\s*```").unwrap())
}

fn object_with_answer_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)\{[^{}]*"(?:final_answer|answer|improved_answer)"[^{}]*\}"#).unwrap()
    })
}

fn direct_answer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)"(?:final_answer|answer|improved_answer)"\s*:\s*"(.+)"#).unwrap()
    })
}

/// Extract meaningful text from a response that neither fast-parsed nor
/// repaired into usable JSON (spec §4.D step 8).
pub fn extract_text_fallback(raw: &str) -> String {
    let text = raw.trim();

    if let Some(content) = salvage_from_markdown_prefix(text) {
        return content;
    }
    if let Some(content) = salvage_from_inline_object(text) {
        return content;
    }
    if let Some(content) = salvage_from_fenced_block(text) {
        return content;
    }
    if let Some(content) = salvage_from_direct_structure(text) {
        return content;
    }

    text.to_string()
}

fn salvage_from_markdown_prefix(text: &str) -> Option<String> {
    if !text.starts_with("```") {
        return None;
    }
    let inner = fence_strip_re().replace(text, "");
    let inner = trailing_fence_re().replace(&inner, "");

    let caps = quoted_answer_re().captures(&inner)?;
    let mut content = caps[1].to_string();
    content = answer_noise_re().replace(&content, "").into_owned();
    content = trailing_quote_brace_re().replace(&content, "").into_owned();
    if content.len() > 5 {
        Some(content.trim().to_string())
    } else {
        None
    }
}

fn salvage_from_inline_object(text: &str) -> Option<String> {
    let object_text = object_with_answer_key_re().find(text)?.as_str();
    let data: serde_json::Value = serde_json::from_str(object_text).ok()?;
    for key in ["final_answer", "answer", "improved_answer"] {
        if let Some(serde_json::Value::String(s)) = data.get(key) {
            if !s.is_empty() {
                return Some(clean_answer_field(s));
            }
        }
    }
    None
}

fn salvage_from_fenced_block(text: &str) -> Option<String> {
    let caps = fenced_block_re().captures(text)?;
    let inner = caps[1].trim();
    if let Ok(data) = serde_json::from_str::<serde_json::Value>(inner) {
        if let serde_json::Value::Object(_) = &data {
            for key in ["final_answer", "answer", "improved_answer"] {
                if let Some(serde_json::Value::String(s)) = data.get(key) {
                    if !s.is_empty() {
                        return Some(s.to_string());
                    }
                }
            }
        }
        None
    } else if !inner.is_empty() && !inner.starts_with('{') {
        Some(inner.to_string())
    } else {
        None
    }
}

fn salvage_from_direct_structure(text: &str) -> Option<String> {
    if !text.starts_with('{') {
        return None;
    }
    let caps = direct_answer_re().captures(text)?;
    let mut content = caps[1].to_string();
    content = answer_noise_re().replace(&content, "").into_owned();
    content = trailing_quote_brace_re().replace(&content, "").into_owned();
    if content.len() > 5 {
        Some(content.trim().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salvages_from_unterminated_markdown_json() {
        let raw = r#"```json
{"final_answer": "Because of thermal expansion","#;
        assert_eq!(extract_text_fallback(raw), "Because of thermal expansion");
    }

    #[test]
    fn salvages_from_inline_object_with_trailing_junk() {
        let raw = r#"blah {"answer": "the real answer"} trailing junk"#;
        assert_eq!(extract_text_fallback(raw), "the real answer");
    }

    #[test]
    fn falls_back_to_raw_text_when_nothing_matches() {
        assert_eq!(extract_text_fallback("just plain words"), "just plain words");
    }

    #[test]
    fn falls_back_to_empty_string_for_whitespace_only() {
        assert_eq!(extract_text_fallback("   "), "");
    }
}
