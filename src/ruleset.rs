//! The ruleset evaluator.
//!
//! Ported from `original_source/src/consolidator/strategy/ruleset.py` and
//! the shared `Strategy.unify_field` primitive in
//! `.../strategy/base.py`, which is implemented once here
//! (`unify_field`) and reused by the city fallback (§4.G).

use serde::Deserialize;
use serde_json::Value;

use crate::model::Candidate;

/// `Strategy.unify_field`: collapse a field across a set of candidates to
/// the single value they all agree on.
///
/// - Non-null values are collected; the most common one is the
///   candidate result.
/// - If `allow_veto` and more than one distinct non-null value appears,
///   the result is `None` (unanimity veto) even though a plurality
///   winner exists.
/// - If `!allow_veto`, the most common value wins outright (simple
///   majority, ties broken by first occurrence among the tied values).
/// - If `allow_null` is false and every candidate is null for this
///   field, the caller-visible behavior is the same as "no unification" --
///   `None` either way, since there's nothing to unify.
pub fn unify_field(candidates: &[Candidate], field: &str, allow_veto: bool) -> Option<String> {
    let values: Vec<String> = candidates
        .iter()
        .filter_map(|c| field_value_as_string(c, field))
        .collect();
    if values.is_empty() {
        return None;
    }

    let mut counts: Vec<(String, usize)> = Vec::new();
    for value in &values {
        if let Some(entry) = counts.iter_mut().find(|(v, _)| v == value) {
            entry.1 += 1;
        } else {
            counts.push((value.clone(), 1));
        }
    }

    if allow_veto && counts.len() > 1 {
        return None;
    }

    // `counts` is in first-insertion order; fold with a strict `>` so a
    // later value with an equal count never displaces an earlier one.
    let mut best: Option<(String, usize)> = None;
    for (value, count) in counts {
        if best.as_ref().map_or(true, |(_, best_count)| count > *best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

fn field_value_as_string(candidate: &Candidate, field: &str) -> Option<String> {
    match field {
        "city" => candidate.city.clone(),
        "country_code" => candidate.country_code.clone(),
        "provider" => Some(candidate.provider.clone()),
        "accuracy" => candidate.accuracy.as_ref().map(value_to_string),
        "confidence" => candidate.confidence.as_ref().map(value_to_string),
        "quality" => candidate.quality.as_ref().map(value_to_string),
        _ => candidate
            .meta
            .get(field)
            .filter(|v| !v.is_null())
            .map(value_to_string),
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field_value_numeric(candidate: &Candidate, field: &str) -> Option<f64> {
    let raw = match field {
        "accuracy" => candidate.accuracy.as_ref(),
        "confidence" => candidate.confidence.as_ref(),
        "quality" => candidate.quality.as_ref(),
        _ => candidate.meta.get(field),
    }?;
    raw.as_f64()
        .or_else(|| raw.as_str().and_then(|s| s.parse::<f64>().ok()))
}

/// `{fields, required, filter}` -- which fields a ruleset cares about and
/// which of those are filter (segmentation) fields.
#[derive(Debug, Clone, Deserialize)]
pub struct Schema {
    #[allow(dead_code)]
    pub fields: Vec<String>,
    #[allow(dead_code)]
    pub required: Vec<String>,
    pub filter: Vec<String>,
}

/// A rule is a field-name -> expected-value map. `serde_json::Map`
/// preserves declaration order, which matters only for readability here
/// (rule *order* within `Ruleset::rules` is what drives ranking, not key
/// order within a rule).
pub type Rule = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Deserialize)]
pub struct Ruleset {
    pub schema: Schema,
    pub rules: Vec<Rule>,
}

impl Ruleset {
    /// Does `candidate` match `rule`? Filter fields are excluded from the
    /// match test -- they already served as the rule-subset selector.
    fn is_match(&self, candidate: &Candidate, rule: &Rule) -> bool {
        rule.iter().all(|(key, expected)| {
            if self.schema.filter.contains(key) {
                return true;
            }
            if expected.is_null() {
                return true;
            }
            match field_value_numeric_or_raw(candidate, key, expected) {
                FieldTest::Numeric(candidate_value) => {
                    let Some(expected_value) = expected
                        .as_f64()
                        .or_else(|| expected.as_str().and_then(|s| s.parse::<f64>().ok()))
                    else {
                        return false;
                    };
                    candidate_value >= expected_value
                }
                FieldTest::String(candidate_value) => {
                    candidate_value == value_to_string(expected)
                }
                FieldTest::Missing => false,
            }
        })
    }

    /// Keep only rules whose filter-field values exactly equal
    /// `unified`. `unified[f] == None` matches a rule whose filter value
    /// for `f` is JSON null.
    fn filter_rules(&self, unified: &[(String, Option<String>)]) -> Vec<Rule> {
        self.rules
            .iter()
            .filter(|rule| {
                unified.iter().all(|(field, value)| {
                    let rule_value = rule.get(field);
                    match (rule_value, value) {
                        (None, None) => true,
                        (Some(v), None) => v.is_null(),
                        (None, Some(_)) => false,
                        (Some(v), Some(value)) => {
                            !v.is_null() && value_to_string(v) == *value
                        }
                    }
                })
            })
            .cloned()
            .collect()
    }

    fn default_rules(&self) -> Vec<Rule> {
        self.rules
            .iter()
            .filter(|rule| {
                self.schema
                    .filter
                    .iter()
                    .all(|field| rule.get(field).map(Value::is_null).unwrap_or(true))
            })
            .cloned()
            .collect()
    }

    fn obtain_rules(&self, candidates: &[Candidate]) -> Vec<Rule> {
        let unified: Vec<(String, Option<String>)> = self
            .schema
            .filter
            .iter()
            .map(|field| (field.clone(), unify_field(candidates, field, true)))
            .collect();

        if unified.iter().all(|(_, v)| v.is_none()) {
            return self.default_rules();
        }

        let subset = self.filter_rules(&unified);
        if subset.is_empty() {
            self.default_rules()
        } else {
            subset
        }
    }

    /// Rank a single candidate against an ordered rule list: the 1-based
    /// position of the first matching rule, or `None` if no rule
    /// matches.
    fn rank_candidate(&self, candidate: &Candidate, rules: &[Rule]) -> Option<usize> {
        rules
            .iter()
            .position(|rule| self.is_match(candidate, rule))
            .map(|idx| idx + 1)
    }

    /// `get_top_ranked`: the finalist with the lowest (best) rank, ties
    /// broken by first occurrence in `candidates`.
    pub fn get_top_ranked(&self, candidates: &[Candidate]) -> Option<Candidate> {
        let rules = self.obtain_rules(candidates);
        candidates
            .iter()
            .filter_map(|c| self.rank_candidate(c, &rules).map(|rank| (rank, c)))
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, c)| c.clone())
    }
}

enum FieldTest {
    Numeric(f64),
    String(String),
    Missing,
}

fn field_value_numeric_or_raw(candidate: &Candidate, field: &str, expected: &Value) -> FieldTest {
    if expected.is_number() {
        match field_value_numeric(candidate, field) {
            Some(n) => FieldTest::Numeric(n),
            None => FieldTest::Missing,
        }
    } else {
        match field_value_as_string(candidate, field) {
            Some(s) => FieldTest::String(s),
            None => FieldTest::Missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;
    use serde_json::json;

    fn candidate(provider: &str, country_code: Option<&str>, confidence: Option<f64>) -> Candidate {
        Candidate {
            entity_type: EntityType::Accommodation,
            entity_id: 1,
            provider: provider.to_owned(),
            longitude: Some("1.0".parse().unwrap()),
            latitude: Some("2.0".parse().unwrap()),
            accuracy: None,
            confidence: confidence.map(|c| json!(c)),
            quality: None,
            score: None,
            city: None,
            country_code: country_code.map(|s| s.to_owned()),
            meta: serde_json::Map::new(),
            batch_id: None,
            timestamp: None,
        }
    }

    #[test]
    fn unify_field_majority_with_veto_returns_null_on_split() {
        let candidates = vec![
            candidate("a", Some("NL"), None),
            candidate("b", Some("US"), None),
            candidate("c", Some("US"), None),
        ];
        // majority is US (2 vs 1), but veto fires because more than one
        // distinct non-null value is present.
        assert_eq!(unify_field(&candidates, "country_code", true), None);
    }

    #[test]
    fn unify_field_majority_without_veto_picks_plurality() {
        let candidates = vec![
            candidate("a", Some("NL"), None),
            candidate("b", Some("US"), None),
            candidate("c", Some("US"), None),
        ];
        assert_eq!(
            unify_field(&candidates, "country_code", false),
            Some("US".to_owned())
        );
    }

    #[test]
    fn ruleset_falls_back_to_default_rules_when_filter_subset_empty() {
        let ruleset = Ruleset {
            schema: Schema {
                fields: vec!["confidence".to_owned()],
                required: vec![],
                filter: vec!["country_code".to_owned()],
            },
            rules: vec![
                serde_json::from_value(json!({"country_code": null, "confidence": 5.0})).unwrap(),
            ],
        };
        let candidates = vec![candidate("google", Some("US"), Some(8.0))];
        let winner = ruleset.get_top_ranked(&candidates);
        assert!(winner.is_some());
    }

    #[test]
    fn ruleset_ranks_by_first_matching_rule_position() {
        let ruleset = Ruleset {
            schema: Schema {
                fields: vec!["confidence".to_owned()],
                required: vec![],
                filter: vec![],
            },
            rules: vec![
                serde_json::from_value(json!({"confidence": 9.0})).unwrap(),
                serde_json::from_value(json!({"confidence": 5.0})).unwrap(),
            ],
        };
        let candidates = vec![
            candidate("tomtom", None, Some(10.0)),
            candidate("mapbox", None, Some(6.0)),
        ];
        let winner = ruleset.get_top_ranked(&candidates).unwrap();
        assert_eq!(winner.provider, "tomtom");
    }

    #[test]
    fn unmatched_candidates_are_not_finalists() {
        let ruleset = Ruleset {
            schema: Schema {
                fields: vec!["confidence".to_owned()],
                required: vec![],
                filter: vec![],
            },
            rules: vec![serde_json::from_value(json!({"confidence": 9.0})).unwrap()],
        };
        let candidates = vec![candidate("mapbox", None, Some(1.0))];
        assert!(ruleset.get_top_ranked(&candidates).is_none());
    }
}
