//! The consolidator: orchestrates the ruleset/fallback cascade and
//! enforces the monotonic-score rule.
//!
//! Ported from `original_source/src/consolidator/approach/
//! accommodation.py` (cascade stages and scores) and
//! `.../consolidator/entity.py` (`get_eligible_candidates`, the
//! monotonic-score guard).
//!
//! This crate unifies on `provider = "consolidated_<env>"` for both
//! emission and detection, so the monotonic-score guard actually fires
//! against a previously written winner -- the original source's
//! read/write spelling mismatch (`consolidator_` vs `consolidated_`) is
//! treated as the bug it looks like, not reproduced.

use serde_json::Map;

use crate::decimal::Decimal;
use crate::fallback::CityFallback;
use crate::model::{provider, Candidate, EntityKey, EntityType};
use crate::ruleset::Ruleset;

/// The rulesets and fallback service a single consolidation run needs.
/// `item_fallback_provider` is the hard-coded single-rule ruleset
/// (`{provider: trivago}` for accommodations); entity types with no
/// feed-supplied guess (destinations) pass `None`.
pub struct Cascade<'a> {
    pub geocoder_ruleset: &'a Ruleset,
    pub partner_ruleset: &'a Ruleset,
    pub city_fallback: &'a CityFallback,
    pub item_fallback_provider: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stage {
    GeocoderRuleset,
    PartnerRuleset,
    CityFallback,
    ItemFallback,
}

impl Stage {
    fn score(self) -> f64 {
        match self {
            Stage::GeocoderRuleset => 1.0,
            Stage::PartnerRuleset => 0.5,
            Stage::CityFallback => 0.0,
            Stage::ItemFallback => 0.0,
        }
    }
}

/// Candidates eligible as consolidator input: every row whose provider is
/// not itself a consolidation marker (invariant 5, "no self-selection").
pub fn eligible_candidates(candidates: &[Candidate], environment: &str) -> Vec<Candidate> {
    candidates
        .iter()
        .filter(|c| !provider::is_consolidation_marker(&c.provider, environment))
        .cloned()
        .collect()
}

/// The previously written winner row for this entity, if any.
pub fn previous_winner(candidates: &[Candidate], environment: &str) -> Option<Candidate> {
    candidates
        .iter()
        .find(|c| provider::is_consolidation_marker(&c.provider, environment))
        .cloned()
}

fn make_winner(entity_type: EntityType, entity_id: u64, source: &Candidate, stage: Stage) -> Candidate {
    Candidate {
        entity_type,
        entity_id,
        provider: source.provider.clone(),
        longitude: source.longitude.clone(),
        latitude: source.latitude.clone(),
        accuracy: None,
        confidence: None,
        quality: None,
        score: Some(stage.score()),
        city: source.city.clone(),
        country_code: source.country_code.clone(),
        meta: Map::new(),
        batch_id: source.batch_id.clone(),
        timestamp: None,
    }
}

/// Run the cascade for one entity. `all_candidates` must already be
/// restricted to rows for a single `entity` (callers typically obtain
/// this from `CandidateStore::get_all_by_entity`).
///
/// Returns `None` if no stage produces a winner, or if a winner is
/// produced but the monotonic-score guard rejects it.
pub fn consolidate(
    entity: &EntityKey,
    all_candidates: &[Candidate],
    cascade: &Cascade,
    environment: &str,
) -> Option<Candidate> {
    let eligible = eligible_candidates(all_candidates, environment);
    let previous = previous_winner(all_candidates, environment);

    let winner = cascade
        .geocoder_ruleset
        .get_top_ranked(&eligible)
        .map(|c| (c, Stage::GeocoderRuleset))
        .or_else(|| {
            cascade
                .partner_ruleset
                .get_top_ranked(&eligible)
                .map(|c| (c, Stage::PartnerRuleset))
        })
        .or_else(|| {
            cascade
                .city_fallback
                .get_fallback_coordinates(&eligible)
                .map(|c| (c, Stage::CityFallback))
        })
        .or_else(|| item_fallback(&eligible, cascade.item_fallback_provider).map(|c| (c, Stage::ItemFallback)))?;

    let (source, stage) = winner;
    let candidate = make_winner(entity.entity_type, entity.entity_id, &source, stage);

    match &previous {
        Some(prev) if prev.score.unwrap_or(0.0) >= candidate.score.unwrap_or(0.0) => None,
        _ => Some(candidate),
    }
}

/// Stage 4: a hard-coded single-rule ruleset matching only
/// `{provider: item_fallback_provider}`, gated on a non-null coordinate
/// pair.
fn item_fallback(candidates: &[Candidate], item_fallback_provider: Option<&str>) -> Option<Candidate> {
    let provider_name = item_fallback_provider?;
    candidates
        .iter()
        .find(|c| c.provider == provider_name && c.has_coordinate())
        .cloned()
}

/// Build a `trivago`-sourced candidate winner carrying a trusted feed's
/// own coordinate, used by the router's trusted branch to store an
/// immediate winner without running the cascade at all.
pub fn trusted_winner(
    entity: &EntityKey,
    longitude: Decimal,
    latitude: Decimal,
    city: Option<String>,
    country_code: Option<String>,
) -> Candidate {
    Candidate {
        entity_type: entity.entity_type,
        entity_id: entity.entity_id,
        provider: String::new(), // filled in by the caller with consolidated_<env>
        longitude: Some(longitude),
        latitude: Some(latitude),
        accuracy: None,
        confidence: None,
        quality: None,
        score: Some(1.0),
        city,
        country_code,
        meta: Map::new(),
        batch_id: None,
        timestamp: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{CityFallback, Destination};
    use crate::model::EntityType;
    use crate::ruleset::{Ruleset, Schema};
    use serde_json::{json, Value};

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
            meta: Map::new(),
            batch_id: None,
            timestamp: None,
        }
    }

    fn empty_ruleset() -> Ruleset {
        Ruleset {
            schema: Schema {
                fields: vec![],
                required: vec![],
                filter: vec![],
            },
            rules: vec![],
        }
    }

    #[test]
    fn item_fallback_wins_when_nothing_else_matches() {
        let geocoder = empty_ruleset();
        let partner = empty_ruleset();
        let fallback = CityFallback::new(vec![]);
        let cascade = Cascade {
            geocoder_ruleset: &geocoder,
            partner_ruleset: &partner,
            city_fallback: &fallback,
            item_fallback_provider: Some("trivago"),
        };
        let entity = EntityKey::new(EntityType::Accommodation, 1);
        let candidates = vec![candidate("trivago", None, None)];

        let winner = consolidate(&entity, &candidates, &cascade, "test").unwrap();
        assert_eq!(winner.provider, "trivago");
        assert_eq!(winner.score, Some(0.0));
    }

    #[test]
    fn monotonic_guard_blocks_lower_or_equal_score() {
        let geocoder = empty_ruleset();
        let partner = empty_ruleset();
        let fallback = CityFallback::new(vec![Destination {
            name: "Nowhere".to_owned(),
            longitude: 1.0,
            latitude: 1.0,
            country_code: None,
            destination_id: None,
        }]);
        let cascade = Cascade {
            geocoder_ruleset: &geocoder,
            partner_ruleset: &partner,
            city_fallback: &fallback,
            item_fallback_provider: None,
        };
        let entity = EntityKey::new(EntityType::Accommodation, 1);

        let mut previous = candidate("consolidated_test", None, None);
        previous.score = Some(0.5);
        let mut feeder = candidate("google", None, None);
        feeder.city = Some("Nowhere".to_owned());
        let candidates = vec![previous, feeder];

        // City fallback would produce score 0.0, which must not overwrite
        // the existing 0.5 winner.
        assert!(consolidate(&entity, &candidates, &cascade, "test").is_none());
    }

    #[test]
    fn eligible_candidates_excludes_consolidation_marker() {
        let candidates = vec![
            candidate("consolidated_test", None, None),
            candidate("google", None, None),
        ];
        let eligible = eligible_candidates(&candidates, "test");
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].provider, "google");
    }

    fn geo_candidate(
        provider: &str,
        accuracy: Option<&str>,
        confidence: Option<f64>,
        quality: Value,
        country_code: Option<&str>,
    ) -> Candidate {
        let mut c = candidate(provider, country_code, confidence);
        c.accuracy = accuracy.map(|a| json!(a));
        c.quality = if quality.is_null() { None } else { Some(quality) };
        c
    }

    fn us_geocoder_ruleset() -> Ruleset {
        Ruleset {
            schema: Schema {
                fields: vec!["confidence".to_owned(), "quality".to_owned()],
                required: vec![],
                filter: vec!["country_code".to_owned()],
            },
            rules: vec![
                serde_json::from_value(json!({"country_code": "US", "quality": 0.9})).unwrap(),
                serde_json::from_value(json!({"country_code": "US", "confidence": 9.5})).unwrap(),
                serde_json::from_value(json!({"country_code": "US", "confidence": 9.2})).unwrap(),
            ],
        }
    }

    #[test]
    fn geocoder_ruleset_picks_the_best_ranked_candidate_for_the_country() {
        let geocoder = us_geocoder_ruleset();
        let partner = empty_ruleset();
        let fallback = CityFallback::new(vec![]);
        let cascade = Cascade {
            geocoder_ruleset: &geocoder,
            partner_ruleset: &partner,
            city_fallback: &fallback,
            item_fallback_provider: Some(crate::model::provider::TRIVAGO),
        };
        let entity = EntityKey::new(EntityType::Accommodation, 1);
        let candidates = vec![
            geo_candidate("google", Some("ROOFTOP"), Some(8.0), json!("political"), Some("US")),
            geo_candidate("tomtom", None, Some(10.0), json!("Point Address"), Some("US")),
            geo_candidate("mapbox", Some("interpolated"), None, json!(0.9), Some("US")),
        ];

        let winner = consolidate(&entity, &candidates, &cascade, "test").unwrap();
        assert_eq!(winner.provider, "mapbox");
        assert_eq!(winner.score, Some(1.0));
        assert_eq!(winner.country_code.as_deref(), Some("US"));
    }

    #[test]
    fn partner_ruleset_wins_when_no_geocoder_row_matches_its_ruleset() {
        let geocoder = us_geocoder_ruleset();
        let partner = Ruleset {
            schema: Schema {
                fields: vec![],
                required: vec![],
                filter: vec![],
            },
            rules: vec![serde_json::from_value(json!({"provider": "Hotelwiz"})).unwrap()],
        };
        let fallback = CityFallback::new(vec![]);
        let cascade = Cascade {
            geocoder_ruleset: &geocoder,
            partner_ruleset: &partner,
            city_fallback: &fallback,
            item_fallback_provider: Some(crate::model::provider::TRIVAGO),
        };
        let entity = EntityKey::new(EntityType::Accommodation, 1);
        // tomtom's confidence has dropped below the ruleset's threshold and
        // neither of the other two rows carries a qualifying field, so no
        // geocoder rule matches; the cascade falls through to the partner
        // ruleset, which Hotelwiz alone satisfies.
        let candidates = vec![
            geo_candidate("google", Some("ROOFTOP"), Some(3.0), Value::Null, Some("US")),
            geo_candidate("tomtom", None, Some(9.0), json!("Point Address"), Some("US")),
            geo_candidate("mapbox", Some("interpolated"), None, Value::Null, Some("US")),
            candidate("Hotelwiz", None, None),
        ];

        let winner = consolidate(&entity, &candidates, &cascade, "test").unwrap();
        assert_eq!(winner.provider, "Hotelwiz");
        assert_eq!(winner.score, Some(0.5));
    }
}
