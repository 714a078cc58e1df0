//! Fuzzy string matching shared by the country mapper (4.E) and the city
//! fallback (4.G) -- both are the same `ngram.NGram` trigram search in the
//! original, just over different candidate lists and thresholds.

use std::collections::BTreeSet;

use strsim::{normalized_levenshtein, sorensen_dice};

/// ASCII-fold and lower-case, approximating `unidecode.unidecode(x).lower()`.
/// A full transliteration table is overkill for the city/country name data
/// this crate actually searches over; stripping combining diacritics
/// covers the common case (`"Amsterdamn"`, `"Köln"`) without pulling in a
/// general Unicode transliteration dependency.
pub fn fold_lower(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' => 'a',
            'è' | 'é' | 'ê' | 'ë' => 'e',
            'ì' | 'í' | 'î' | 'ï' => 'i',
            'ò' | 'ó' | 'ô' | 'ö' | 'õ' => 'o',
            'ù' | 'ú' | 'û' | 'ü' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Search `candidates` for the entries whose n-gram (Sorensen-Dice)
/// similarity to `query` is at least `threshold`, sorted by descending
/// similarity (ties keep the candidates' original relative order, i.e. a
/// stable sort). Both `query` and the candidate strings are fed through
/// `fold_lower` first, exactly as `CountryMapper.map_name` and
/// `CityFallback.search_destinations` do.
pub fn ngram_search<'a>(query: &str, candidates: &[&'a str], threshold: f64) -> Vec<(&'a str, f64)> {
    let folded_query = fold_lower(query);
    let mut scored: Vec<(&str, f64)> = candidates
        .iter()
        .map(|candidate| {
            let score = sorensen_dice(&folded_query, &fold_lower(candidate));
            (*candidate, score)
        })
        .filter(|(_, score)| *score >= threshold)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

/// An order-independent field similarity score in `[0.0, 1.0]`, used by
/// the provider adapters' alternate-scoring function to compare e.g. an
/// input `street` value against a returned one. This
/// plays the role of Python's `fuzzywuzzy.token_set_ratio`: tokenize both
/// strings, then compare the sorted-unique-token forms rather than the
/// raw strings, so that word order and duplicate words don't matter.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let sorted_tokens = |s: &str| -> String {
        let tokens: BTreeSet<String> = s
            .split_whitespace()
            .map(|tok| fold_lower(tok))
            .collect();
        tokens.into_iter().collect::<Vec<_>>().join(" ")
    };
    normalized_levenshtein(&sorted_tokens(a), &sorted_tokens(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_set_ratio_ignores_word_order() {
        let score = token_set_ratio("Main Street North", "North Main Street");
        assert!(score > 0.99);
    }

    #[test]
    fn token_set_ratio_penalizes_different_words() {
        let score = token_set_ratio("Main Street", "Oak Avenue");
        assert!(score < 0.5);
    }

    #[test]
    fn fold_lower_strips_common_diacritics() {
        assert_eq!(fold_lower("Köln"), "koln");
        assert_eq!(fold_lower("São Paulo"), "sao paulo");
    }

    #[test]
    fn ngram_search_finds_typo_tolerant_match() {
        let candidates = ["Amsterdam", "Rotterdam", "Berlin"];
        let matches = ngram_search("Amsterdamn", &candidates, 0.3);
        assert!(!matches.is_empty());
        assert_eq!(matches[0].0, "Amsterdam");
    }

    #[test]
    fn ngram_search_respects_threshold() {
        let candidates = ["Amsterdam"];
        let matches = ngram_search("Tokyo", &candidates, 0.3);
        assert!(matches.is_empty());
    }
}
