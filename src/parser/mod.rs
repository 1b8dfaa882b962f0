//! Tolerant Parser (spec §4.D): turns whatever text a provider streamed
//! back into a best-effort stage record. Never propagates a parse failure;
//! every `parse_stepN_response` always returns a record, falling back to
//! salvaged text when structured extraction fails entirely.
//!
//! Grounded in `services/pipeline.py::_parse_step{1,2,3,4}_response`.

pub mod extract;
pub mod normalize;
pub mod repair;
pub mod salvage;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use extract::extract_json_candidate;
use normalize::{clean_answer_field, normalize_string_list, normalize_to_string};
use repair::{repair_json, unwrap_repaired};
use salvage::extract_text_fallback;

/// A single evaluator's judgement of one ranked response (spec §3 stage 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvaluation {
    pub score: i32,
    pub strengths: String,
    pub weaknesses: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step1Response {
    pub provider: String,
    pub answer: String,
    pub confidence: f64,
    pub atomic_facts: Vec<String>,
    pub raw_response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step2Response {
    pub provider: String,
    pub improved_answer: String,
    pub confidence: f64,
    pub improvements: Vec<String>,
    pub raw_response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step3Response {
    pub provider: String,
    pub ranking: Vec<String>,
    pub predicted_winner: String,
    pub evaluations: HashMap<String, ProviderEvaluation>,
    pub flagged_facts: Vec<String>,
    pub consensus_facts: Vec<String>,
    pub raw_response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step4Response {
    pub provider: String,
    pub final_answer: String,
    pub confidence: f64,
    pub sources_used: Vec<String>,
    pub excluded: Vec<String>,
    pub raw_response: String,
}

/// Run extraction + fast-parse + repair, producing a JSON object or `None`
/// if nothing recognisable could be recovered (spec §4.D steps 1-3).
fn parse_candidate_object(raw: &str) -> Option<Value> {
    let candidate = extract_json_candidate(raw);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str(&candidate) {
        return Some(value);
    }
    let repaired = repair_json(&candidate)?;
    unwrap_repaired(repaired)
}

fn get_str(data: &Value, key: &str) -> String {
    data.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// `data.get(key, 0.5)` clamped into `[0,1]`-or-reject, mirroring the
/// Pydantic `Field(ge=0.0, le=1.0)` validator: an out-of-range confidence
/// makes the whole record construction fail, which sends the caller down
/// the text-salvage fallback path (spec §4.D step 4, "missing fields take
/// defaults").
fn get_confidence(data: &Value) -> Option<f64> {
    let confidence = match data.get("confidence") {
        None => return Some(0.5),
        Some(Value::Null) => return Some(0.5),
        Some(v) => v.as_f64()?,
    };
    if (0.0..=1.0).contains(&confidence) {
        Some(confidence)
    } else {
        None
    }
}

/// Parse a stage-1 JSON object into its fields, or `None` if a constraint
/// (e.g. confidence range) is violated.
fn try_parse_step1(data: &Value) -> Option<Step1Response> {
    Some(Step1Response {
        provider: String::new(),
        answer: clean_answer_field(&get_str(data, "answer")),
        confidence: get_confidence(data)?,
        atomic_facts: normalize_string_list(data.get("atomic_facts").unwrap_or(&Value::Null)),
        raw_response: String::new(),
    })
}

pub fn parse_step1_response(provider: &str, raw: &str) -> Step1Response {
    if let Some(data) = parse_candidate_object(raw) {
        if let Some(mut parsed) = try_parse_step1(&data) {
            parsed.provider = provider.to_string();
            parsed.raw_response = raw.to_string();
            return parsed;
        }
    }
    Step1Response {
        provider: provider.to_string(),
        answer: extract_text_fallback(raw),
        confidence: 0.5,
        atomic_facts: Vec::new(),
        raw_response: raw.to_string(),
    }
}

fn try_parse_step2(data: &Value) -> Option<Step2Response> {
    Some(Step2Response {
        provider: String::new(),
        improved_answer: clean_answer_field(&get_str(data, "improved_answer")),
        confidence: get_confidence(data)?,
        improvements: normalize_string_list(data.get("improvements").unwrap_or(&Value::Null)),
        raw_response: String::new(),
    })
}

pub fn parse_step2_response(provider: &str, raw: &str) -> Step2Response {
    if let Some(data) = parse_candidate_object(raw) {
        if let Some(mut parsed) = try_parse_step2(&data) {
            parsed.provider = provider.to_string();
            parsed.raw_response = raw.to_string();
            return parsed;
        }
    }
    Step2Response {
        provider: provider.to_string(),
        improved_answer: extract_text_fallback(raw),
        confidence: 0.5,
        improvements: Vec::new(),
        raw_response: raw.to_string(),
    }
}

fn parse_evaluations(data: &Value) -> HashMap<String, ProviderEvaluation> {
    let Some(Value::Object(map)) = data.get("evaluations") else {
        return HashMap::new();
    };
    let mut evaluations = HashMap::new();
    for (label, eval_data) in map {
        let Value::Object(_) = eval_data else { continue };
        let score = eval_data
            .get("score")
            .and_then(Value::as_i64)
            .unwrap_or(5) as i32;
        evaluations.insert(
            label.clone(),
            ProviderEvaluation {
                score,
                strengths: normalize_to_string(eval_data.get("strengths").unwrap_or(&Value::Null)),
                weaknesses: normalize_to_string(eval_data.get("weaknesses").unwrap_or(&Value::Null)),
            },
        );
    }
    evaluations
}

fn ranking_from(data: &Value) -> Vec<String> {
    data.get("ranking")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

pub fn parse_step3_response(provider: &str, raw: &str) -> Step3Response {
    if let Some(data) = parse_candidate_object(raw) {
        return Step3Response {
            provider: provider.to_string(),
            ranking: ranking_from(&data),
            predicted_winner: get_str(&data, "predicted_winner"),
            evaluations: parse_evaluations(&data),
            flagged_facts: normalize_string_list(data.get("flagged_facts").unwrap_or(&Value::Null)),
            consensus_facts: normalize_string_list(data.get("consensus_facts").unwrap_or(&Value::Null)),
            raw_response: raw.to_string(),
        };
    }
    Step3Response {
        provider: provider.to_string(),
        ranking: Vec::new(),
        predicted_winner: String::new(),
        evaluations: HashMap::new(),
        flagged_facts: Vec::new(),
        consensus_facts: Vec::new(),
        raw_response: raw.to_string(),
    }
}

fn try_parse_step4(data: &Value) -> Option<Step4Response> {
    Some(Step4Response {
        provider: String::new(),
        final_answer: clean_answer_field(&get_str(data, "final_answer")),
        confidence: get_confidence(data)?,
        sources_used: normalize_string_list(data.get("sources_used").unwrap_or(&Value::Null)),
        excluded: normalize_string_list(data.get("excluded").unwrap_or(&Value::Null)),
        raw_response: String::new(),
    })
}

pub fn parse_step4_response(provider: &str, raw: &str) -> Step4Response {
    if let Some(data) = parse_candidate_object(raw) {
        if let Some(mut parsed) = try_parse_step4(&data) {
            parsed.provider = provider.to_string();
            parsed.raw_response = raw.to_string();
            return parsed;
        }
    }
    Step4Response {
        provider: provider.to_string(),
        final_answer: extract_text_fallback(raw),
        confidence: 0.5,
        sources_used: Vec::new(),
        excluded: Vec::new(),
        raw_response: raw.to_string(),
    }
}
