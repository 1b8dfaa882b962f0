//! Candidate JSON extraction (spec §4.D step 1), grounded in
//! `services/pipeline.py::_extract_json`.

use regex::Regex;
use std::sync::OnceLock;

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").unwrap())
}

fn raw_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").unwrap())
}

/// Prefer a fenced ```json code block; otherwise the outermost `{...}`;
/// otherwise the whole text unchanged (spec §4.D.1).
pub fn extract_json_candidate(text: &str) -> String {
    if let Some(caps) = fenced_json_re().captures(text) {
        return caps[1].to_string();
    }
    if let Some(m) = raw_object_re().find(text) {
        return m.as_str().to_string();
    }
    text.to_string()
}
