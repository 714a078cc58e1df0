//! Country-code normalisation.
//!
//! Grounded directly on `original_source/src/router/utils/
//! country_mapper.py`'s `CountryMapper`: a process-local singleton built
//! from the country-codes reference table, exposing ISO-3166 validation,
//! alpha-3 mapping, and fuzzy name search with a result cache.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::similarity::ngram_search;

/// One row of the `data/country_codes.json` reference table.
#[derive(Debug, Clone, Deserialize)]
pub struct CountryCodeRow {
    pub name: String,
    pub iso_3166_2: String,
    pub iso_3166_3: String,
    #[allow(dead_code)]
    pub destination_id: Option<u64>,
}

pub struct CountryMapper {
    valid_country_codes: Vec<String>,
    name_mapping: HashMap<String, String>,
    iso_3166_3_mapping: HashMap<String, String>,
    /// Folded name -> resolved iso_3166_2, filled in lazily by `map_name`.
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl CountryMapper {
    pub fn new(rows: Vec<CountryCodeRow>) -> CountryMapper {
        let valid_country_codes = rows.iter().map(|r| r.iso_3166_2.clone()).collect();
        let name_mapping = rows
            .iter()
            .map(|r| {
                (
                    crate::similarity::fold_lower(&r.name),
                    r.iso_3166_2.clone(),
                )
            })
            .collect();
        let iso_3166_3_mapping = rows
            .iter()
            .map(|r| (r.iso_3166_3.clone(), r.iso_3166_2.clone()))
            .collect();
        CountryMapper {
            valid_country_codes,
            name_mapping,
            iso_3166_3_mapping,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_valid_country_code(&self, code: &str) -> bool {
        self.valid_country_codes.iter().any(|c| c == code)
    }

    pub fn map_iso_3166_3(&self, code: &str) -> Option<String> {
        self.iso_3166_3_mapping.get(code).cloned()
    }

    /// Fuzzy name search, threshold 0.3, first (highest-similarity) match
    /// wins, cached by the original (folded) query string.
    pub fn map_name(&self, country: &str) -> Option<String> {
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.get(country) {
            return cached.clone();
        }
        let names: Vec<&str> = self.name_mapping.keys().map(|s| s.as_str()).collect();
        let matches = ngram_search(country, &names, 0.3);
        let resolved = matches
            .first()
            .and_then(|(name, _)| self.name_mapping.get(*name).cloned());
        cache.insert(country.to_owned(), resolved.clone());
        resolved
    }

    /// The full router step: keep a valid alpha-2 as-is, else map an
    /// alpha-3, else fuzzy-match the free-text name, else `None`.
    pub fn normalize(&self, raw_country_code: Option<&str>, raw_country_name: Option<&str>) -> Option<String> {
        if let Some(code) = raw_country_code {
            if self.is_valid_country_code(code) {
                return Some(code.to_owned());
            }
            if let Some(mapped) = self.map_iso_3166_3(code) {
                return Some(mapped);
            }
        }
        raw_country_name.and_then(|name| self.map_name(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mapper() -> CountryMapper {
        CountryMapper::new(vec![
            CountryCodeRow {
                name: "Netherlands".to_owned(),
                iso_3166_2: "NL".to_owned(),
                iso_3166_3: "NLD".to_owned(),
                destination_id: None,
            },
            CountryCodeRow {
                name: "United States".to_owned(),
                iso_3166_2: "US".to_owned(),
                iso_3166_3: "USA".to_owned(),
                destination_id: None,
            },
        ])
    }

    #[test]
    fn keeps_valid_alpha_2_unchanged() {
        let mapper = sample_mapper();
        assert_eq!(
            mapper.normalize(Some("US"), None),
            Some("US".to_owned())
        );
    }

    #[test]
    fn maps_alpha_3_to_alpha_2() {
        let mapper = sample_mapper();
        assert_eq!(
            mapper.normalize(Some("NLD"), None),
            Some("NL".to_owned())
        );
    }

    #[test]
    fn fuzzy_matches_free_text_name() {
        let mapper = sample_mapper();
        assert_eq!(
            mapper.normalize(None, Some("Netherland")),
            Some("NL".to_owned())
        );
    }

    #[test]
    fn falls_back_to_none_when_nothing_matches() {
        let mapper = sample_mapper();
        assert_eq!(mapper.normalize(Some("ZZ"), Some("Nowhereland")), None);
    }
}
