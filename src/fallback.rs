//! City fallback.
//!
//! Ported from `original_source/src/consolidator/strategy/fallback.py`'s
//! `CityFallback` singleton. Loaded once from the destinations reference
//! table at worker startup; the internal search index never changes
//! after construction, so a `RwLock` (rather than the `Mutex` the key
//! vault and country mapper need for their mutable caches) is sufficient.

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Map;

use crate::decimal::Decimal;
use crate::model::{provider, Candidate};
use crate::ruleset::unify_field;
use crate::similarity::ngram_search;

/// One row of the `data/destinations.json` reference table.
#[derive(Debug, Clone, Deserialize)]
pub struct Destination {
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub country_code: Option<String>,
    #[allow(dead_code)]
    pub destination_id: Option<u64>,
}

pub struct CityFallback {
    destinations: RwLock<Vec<Destination>>,
}

impl CityFallback {
    pub fn new(destinations: Vec<Destination>) -> CityFallback {
        CityFallback {
            destinations: RwLock::new(destinations),
        }
    }

    /// Destinations whose name has n-gram similarity >= 0.3 to
    /// `unified_city`, most-similar first.
    fn search_destinations(&self, unified_city: &str) -> Vec<Destination> {
        let destinations = self.destinations.read();
        let names: Vec<&str> = destinations.iter().map(|d| d.name.as_str()).collect();
        let matches = ngram_search(unified_city, &names, 0.3);
        matches
            .into_iter()
            .filter_map(|(name, _)| destinations.iter().find(|d| d.name == name).cloned())
            .collect()
    }

    /// `get_fallback_coordinates`: unify city (majority, no veto) and
    /// country_code (majority with veto) across `candidates`, then search
    /// for the first destination whose country code matches (or the
    /// first match at all, if the unified country code vetoed to null).
    pub fn get_fallback_coordinates(&self, candidates: &[Candidate]) -> Option<Candidate> {
        let unified_city = unify_field(candidates, "city", /* allow_veto */ false)?;
        let unified_country_code = unify_field(candidates, "country_code", /* allow_veto */ true);

        let matches = self.search_destinations(&unified_city);
        let destination = matches.iter().find(|d| match &unified_country_code {
            Some(cc) => d.country_code.as_deref() == Some(cc.as_str()),
            None => true,
        })?;

        let entity_type = candidates.first()?.entity_type;
        let entity_id = candidates.first()?.entity_id;

        Some(Candidate {
            entity_type,
            entity_id,
            provider: provider::CITY_POLYGONS.to_owned(),
            longitude: Some(Decimal::from_f64(destination.longitude)),
            latitude: Some(Decimal::from_f64(destination.latitude)),
            accuracy: None,
            confidence: None,
            quality: None,
            score: None,
            city: Some(destination.name.clone()),
            country_code: destination.country_code.clone(),
            meta: Map::new(),
            batch_id: None,
            timestamp: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;

    fn candidate(city: Option<&str>, country_code: Option<&str>) -> Candidate {
        Candidate {
            entity_type: EntityType::Accommodation,
            entity_id: 7,
            provider: "google".to_owned(),
            longitude: None,
            latitude: None,
            accuracy: None,
            confidence: None,
            quality: None,
            score: None,
            city: city.map(|s| s.to_owned()),
            country_code: country_code.map(|s| s.to_owned()),
            meta: Map::new(),
            batch_id: None,
            timestamp: None,
        }
    }

    fn sample_fallback() -> CityFallback {
        CityFallback::new(vec![
            Destination {
                name: "Amsterdam".to_owned(),
                longitude: 4.9,
                latitude: 52.37,
                country_code: Some("NL".to_owned()),
                destination_id: Some(1),
            },
            Destination {
                name: "Amsterdam".to_owned(),
                longitude: -73.8,
                latitude: 42.9,
                country_code: Some("US".to_owned()),
                destination_id: Some(2),
            },
        ])
    }

    #[test]
    fn dissenting_country_code_still_resolves_first_matching_destination() {
        // city="Amsterdamn" (typo), country codes {NL, US, US}. Country
        // unifies to null (veto). Expect the first-inserted
        // Amsterdam/NL destination to win.
        let fallback = sample_fallback();
        let candidates = vec![
            candidate(Some("Amsterdamn"), Some("NL")),
            candidate(Some("Amsterdamn"), Some("US")),
            candidate(Some("Amsterdamn"), Some("US")),
        ];
        let winner = fallback.get_fallback_coordinates(&candidates).unwrap();
        assert_eq!(winner.provider, provider::CITY_POLYGONS);
        assert_eq!(winner.city.as_deref(), Some("Amsterdam"));
        assert_eq!(winner.country_code.as_deref(), Some("NL"));
        assert_eq!(winner.score, None);
    }

    #[test]
    fn no_unified_city_yields_no_fallback() {
        let fallback = sample_fallback();
        let candidates = vec![candidate(None, None), candidate(None, None)];
        assert!(fallback.get_fallback_coordinates(&candidates).is_none());
    }

    #[test]
    fn agreeing_country_code_picks_matching_destination() {
        let fallback = sample_fallback();
        let candidates = vec![
            candidate(Some("Amsterdam"), Some("US")),
            candidate(Some("Amsterdam"), Some("US")),
        ];
        let winner = fallback.get_fallback_coordinates(&candidates).unwrap();
        assert_eq!(winner.country_code.as_deref(), Some("US"));
    }
}
