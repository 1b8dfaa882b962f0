//! Surprisingly Popular + Borda-count synthesizer election (spec §4.E.7),
//! grounded in `services/pipeline.py::_select_synthesizer`.

use std::collections::HashMap;

use crate::parser::Step3Response;

/// Elect the synthesizer's provider name from the stage-3 records.
///
/// `label_to_provider` resolves ranking/predicted-winner labels back to
/// provider names; `ordered_providers` breaks ties by iteration order and
/// supplies the fallbacks when no stage-3 signal exists (spec §4.E.7):
/// first provider with a stage-2 record, else the first configured
/// provider.
pub fn select_synthesizer(
    step3_responses: &HashMap<String, Step3Response>,
    label_to_provider: &HashMap<String, String>,
    step2_responses: &HashMap<String, crate::parser::Step2Response>,
    ordered_providers: &[String],
) -> Option<String> {
    if step3_responses.is_empty() {
        for provider in ordered_providers {
            if step2_responses.contains_key(provider) {
                return Some(provider.clone());
            }
        }
        return ordered_providers.first().cloned();
    }

    let mut actual_first_place: HashMap<String, i64> = HashMap::new();
    let mut predicted_first_place: HashMap<String, i64> = HashMap::new();
    let mut borda_scores: HashMap<String, i64> = HashMap::new();

    let resolve = |label: &str| label_to_provider.get(label).cloned().unwrap_or_else(|| label.to_string());

    for response in step3_responses.values() {
        if let Some(first_label) = response.ranking.first() {
            let provider = resolve(first_label);
            *actual_first_place.entry(provider).or_insert(0) += 1;
        }

        if !response.predicted_winner.is_empty() {
            let provider = resolve(&response.predicted_winner);
            *predicted_first_place.entry(provider).or_insert(0) += 1;
        }

        let num_ranked = response.ranking.len() as i64;
        for (position, label) in response.ranking.iter().enumerate() {
            let provider = resolve(label);
            let points = num_ranked - position as i64;
            *borda_scores.entry(provider).or_insert(0) += points;
        }
    }

    if borda_scores.is_empty() {
        return ordered_providers.first().cloned();
    }

    let mut best: Option<(String, f64)> = None;
    for provider in ordered_providers {
        if !borda_scores.contains_key(provider) {
            continue;
        }
        let actual = *actual_first_place.get(provider).unwrap_or(&0) as f64;
        let predicted = *predicted_first_place.get(provider).unwrap_or(&0) as f64;
        let borda = *borda_scores.get(provider).unwrap_or(&0) as f64;
        let sp_score = actual - predicted + 0.1 * borda;

        match &best {
            Some((_, best_score)) if *best_score >= sp_score => {}
            _ => best = Some((provider.clone(), sp_score)),
        }
    }

    best.map(|(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Step2Response;

    fn step3(ranking: &[&str], predicted_winner: &str) -> Step3Response {
        Step3Response {
            provider: "x".to_string(),
            ranking: ranking.iter().map(|s| s.to_string()).collect(),
            predicted_winner: predicted_winner.to_string(),
            evaluations: HashMap::new(),
            flagged_facts: vec![],
            consensus_facts: vec![],
            raw_response: String::new(),
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(l, p)| (l.to_string(), p.to_string())).collect()
    }

    #[test]
    fn two_provider_trivial_run_picks_unanimous_first_place() {
        let label_to_provider = labels(&[("A", "P1"), ("B", "P2")]);
        let mut step3 = HashMap::new();
        step3.insert("P1".to_string(), step3(&["A", "B"], "A"));
        step3.insert("P2".to_string(), step3(&["A", "B"], "A"));
        let ordered = vec!["P1".to_string(), "P2".to_string()];

        let synthesizer =
            select_synthesizer(&step3, &label_to_provider, &HashMap::new(), &ordered);
        assert_eq!(synthesizer, Some("P1".to_string()));
    }

    #[test]
    fn surprisingly_popular_wins_over_pure_borda() {
        let label_to_provider = labels(&[("A", "P1"), ("B", "P2"), ("C", "P3")]);
        let mut step3 = HashMap::new();
        step3.insert("P1".to_string(), step3(&["A", "B", "C"], "A"));
        step3.insert("P2".to_string(), step3(&["A", "B", "C"], "A"));
        step3.insert("P3".to_string(), step3(&["B", "A", "C"], "A"));
        let ordered = vec!["P1".to_string(), "P2".to_string(), "P3".to_string()];

        let synthesizer =
            select_synthesizer(&step3, &label_to_provider, &HashMap::new(), &ordered);
        assert_eq!(synthesizer, Some("P2".to_string()));
    }

    #[test]
    fn falls_back_to_first_step2_provider_without_step3_records() {
        let mut step2 = HashMap::new();
        step2.insert(
            "P2".to_string(),
            Step2Response {
                provider: "P2".to_string(),
                improved_answer: "x".to_string(),
                confidence: 0.5,
                improvements: vec![],
                raw_response: String::new(),
            },
        );
        let ordered = vec!["P1".to_string(), "P2".to_string()];

        let synthesizer =
            select_synthesizer(&HashMap::new(), &HashMap::new(), &step2, &ordered);
        assert_eq!(synthesizer, Some("P2".to_string()));
    }

    #[test]
    fn falls_back_to_first_provider_when_nothing_else_available() {
        let ordered = vec!["P1".to_string(), "P2".to_string()];
        let synthesizer =
            select_synthesizer(&HashMap::new(), &HashMap::new(), &HashMap::new(), &ordered);
        assert_eq!(synthesizer, Some("P1".to_string()));
    }
}
