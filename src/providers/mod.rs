//! Provider adapters: the shared capability set, the
//! iterative-shedding/meta-assembly algorithm every adapter runs through,
//! and the alternate-scoring function.
//!
//! Grounded on `original_source/src/geocode/providers/base.py`'s
//! `Geocoder` base class (`geocode`, `geocoder_process`, `rate_result`)
//! and `examples/faradayio-geocode-csv/src/geocoders/mod.rs`'s
//! `Geocoder` trait shape.

pub mod arcgis;
pub mod baidu;
pub mod bing;
pub mod geonames;
pub mod google;
pub mod google_places;
pub mod here;
pub mod mapbox;
pub mod mapquest;
pub mod osm;
pub mod rest;
pub mod tomtom;

use async_trait::async_trait;
use geo::algorithm::haversine_distance::HaversineDistance;
use geo::Point;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::decimal::Decimal;
use crate::errors::GeocodeError;
use crate::model::{Address, Candidate, EntityKey};
use crate::similarity::token_set_ratio;

/// One alternate returned by a provider's raw HTTP call, before scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResult {
    pub longitude: f64,
    pub latitude: f64,
    /// The provider's raw JSON for this alternate, handed to
    /// `parse_returned_address` to extract structured fields.
    pub raw: Value,
}

/// The request a dispatcher hands to an adapter: an entity identity plus
/// the address to geocode (which may already carry a `guess`
/// coordinate from the source feed).
pub struct GeocodeRequest {
    pub entity: EntityKey,
    pub address: Address,
    pub batch_id: Option<String>,
}

/// The per-provider capability set. The shared shedding/meta-assembly
/// algorithm (`geocode_with_shedding`, below) is implemented exactly
/// once and calls into this trait only for the parts that genuinely vary
/// per provider.
#[async_trait]
pub trait GeocoderAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Max of this adapter's own declared version and any base
    /// version it builds on. Adapters with no shared base just return
    /// their own version.
    fn version(&self) -> u32;

    /// Maximum age in seconds a successful response may be cached;
    /// `None` means unlimited.
    fn default_ttl(&self) -> Option<i64>;

    /// Wall-clock epoch at which an exhausted quota may be retried.
    /// Default: one hour from now.
    fn quota_reset_epoch(&self) -> i64 {
        now() + 3600
    }

    fn required_fields(&self) -> &[&'static str];

    /// Optional fields in trailing-first shed order: the *last* entry is
    /// shed first.
    fn priority_fields(&self) -> &[&'static str];

    fn nr_of_retries(&self) -> u32 {
        3
    }

    fn initial_backoff(&self) -> f64 {
        1.0
    }

    /// Google-family adapters set this: a final rate-limit failure is
    /// re-raised as `QuotaExhausted`, because the API does not
    /// distinguish per-second throttling from daily exhaustion.
    fn quota_exceed_on_throttle(&self) -> bool {
        false
    }

    async fn raw_geocode(&self, projected: &Address) -> Result<Vec<RawResult>, GeocodeError>;

    fn parse_returned_address(&self, raw: &RawResult) -> Address;
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Project `address` down to the fields a call to `adapter` is allowed to
/// use: the union of required and priority fields that are actually
/// present.
fn project(address: &Address, required: &[&'static str], priority: &[&'static str]) -> Address {
    let mut projected = Address::default();
    for field in required.iter().chain(priority.iter()) {
        if let Some(value) = address.get(field) {
            set_field(&mut projected, field, value.to_owned());
        }
    }
    projected.guess = address.guess;
    projected
}

fn set_field(address: &mut Address, field: &str, value: String) {
    match field {
        "street" => address.street = Some(value),
        "house_number" => address.house_number = Some(value),
        "name" => address.name = Some(value),
        "district" => address.district = Some(value),
        "city" => address.city = Some(value),
        "region" => address.region = Some(value),
        "postal_code" => address.postal_code = Some(value),
        "country" => address.country = Some(value),
        "country_code" => address.country_code = Some(value),
        _ => {}
    }
}

/// The shared algorithm every adapter's `geocode` runs: project fields,
/// call out with iterative shedding on `NoResultsFound`, score
/// alternates, and assemble the final `Candidate` with its `meta`
/// bookkeeping.
pub async fn geocode_with_shedding(
    adapter: &dyn GeocoderAdapter,
    request: &GeocodeRequest,
) -> Result<Candidate, GeocodeError> {
    let required = adapter.required_fields();
    let priority = adapter.priority_fields();
    let mut current = project(&request.address, required, priority);
    let mut shed_stack: Vec<&'static str> = priority.to_vec();
    let mut rejected: Vec<String> = Vec::new();

    let alternates = loop {
        match adapter.raw_geocode(&current).await {
            Ok(alternates) if !alternates.is_empty() => break alternates,
            Ok(_) | Err(GeocodeError::NoResultsFound { .. }) => {
                match shed_stack.pop() {
                    Some(field) => {
                        current = current.without(field);
                        rejected.push(field.to_owned());
                    }
                    None => {
                        return Err(GeocodeError::NoResultsFound {
                            provider: adapter.name().to_owned(),
                        })
                    }
                }
            }
            Err(other) => return Err(other),
        }
    };

    let best = pick_best_alternate(adapter, &current, &alternates);
    let parsed = adapter.parse_returned_address(best);

    let mut meta = Map::new();
    meta.insert(
        "address".to_owned(),
        serde_json::to_value(&current).unwrap_or(Value::Null),
    );
    meta.insert(
        "address_out".to_owned(),
        serde_json::to_value(&parsed).unwrap_or(Value::Null),
    );
    meta.insert(
        "supplied".to_owned(),
        Value::Array(
            current
                .present_fields()
                .into_iter()
                .map(|(k, _)| Value::String(k.to_owned()))
                .collect(),
        ),
    );
    meta.insert(
        "rejected".to_owned(),
        Value::Array(rejected.into_iter().map(Value::String).collect()),
    );
    if let Some(guess) = current.guess {
        meta.insert(
            "guess".to_owned(),
            serde_json::json!({"longitude": guess.longitude, "latitude": guess.latitude}),
        );
        let distance = haversine_distance_metres(
            guess.longitude,
            guess.latitude,
            best.longitude,
            best.latitude,
        );
        meta.insert("distance".to_owned(), serde_json::json!(distance));
    }

    let timestamp = adapter.default_ttl().map(|ttl| now() + ttl);

    Ok(Candidate {
        entity_type: request.entity.entity_type,
        entity_id: request.entity.entity_id,
        provider: adapter.name().to_owned(),
        longitude: Some(Decimal::from_f64(best.longitude)),
        latitude: Some(Decimal::from_f64(best.latitude)),
        accuracy: None,
        confidence: None,
        quality: None,
        score: None,
        city: parsed.city.clone(),
        country_code: parsed.country_code.clone(),
        meta,
        batch_id: request.batch_id.clone(),
        timestamp,
    })
}

fn haversine_distance_metres(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let a = Point::new(lon1, lat1);
    let b = Point::new(lon2, lat2);
    a.haversine_distance(&b)
}

/// The scoring function used to pick among several returned alternates.
/// `tau = -10 / ln(0.5)`, a half-life of 10 metres past the first 10
/// metres free.
fn pick_best_alternate<'a>(
    adapter: &dyn GeocoderAdapter,
    input: &Address,
    alternates: &'a [RawResult],
) -> &'a RawResult {
    alternates
        .iter()
        .max_by(|a, b| {
            score_alternate(adapter, input, a)
                .partial_cmp(&score_alternate(adapter, input, b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .expect("alternates is non-empty")
}

fn score_alternate(adapter: &dyn GeocoderAdapter, input: &Address, alternate: &RawResult) -> f64 {
    let parsed = adapter.parse_returned_address(alternate);
    let mut score = 0.0;

    for field in ["street", "district", "city", "postal_code", "region"] {
        let input_value = match field {
            "street" => compose_street(input),
            other => input.get(other).map(|s| s.to_owned()),
        };
        let returned_value = match field {
            "street" => compose_street(&parsed),
            other => parsed.get(other).map(|s| s.to_owned()),
        };
        if let (Some(a), Some(b)) = (input_value, returned_value) {
            if token_set_ratio(&a, &b) >= 0.75 {
                score += 1.0;
            }
        }
    }

    if let Some(guess) = input.guess {
        const TAU: f64 = 14.4269; // -10 / ln(0.5)
        let distance = haversine_distance_metres(
            guess.longitude,
            guess.latitude,
            alternate.longitude,
            alternate.latitude,
        );
        let baseline = 3.0;
        score += if distance > 10.0 {
            baseline * ((10.0 - distance) / TAU).exp()
        } else {
            baseline
        };
    }

    score
}

/// `"{house_number} {street}"` when both are present, else whichever one
/// is present, else `None`.
fn compose_street(address: &Address) -> Option<String> {
    match (&address.house_number, &address.street) {
        (Some(house_number), Some(street)) => Some(format!("{} {}", house_number, street)),
        (None, Some(street)) => Some(street.clone()),
        (Some(house_number), None) => Some(house_number.clone()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, Guess};
    use serde_json::json;

    struct StubAdapter {
        required: Vec<&'static str>,
        priority: Vec<&'static str>,
        results_per_call: std::sync::Mutex<Vec<Result<Vec<RawResult>, GeocodeError>>>,
    }

    #[async_trait]
    impl GeocoderAdapter for StubAdapter {
        fn name(&self) -> &str {
            "stub"
        }
        fn version(&self) -> u32 {
            1
        }
        fn default_ttl(&self) -> Option<i64> {
            None
        }
        fn required_fields(&self) -> &[&'static str] {
            &self.required
        }
        fn priority_fields(&self) -> &[&'static str] {
            &self.priority
        }
        async fn raw_geocode(&self, _projected: &Address) -> Result<Vec<RawResult>, GeocodeError> {
            self.results_per_call.lock().unwrap().remove(0)
        }
        fn parse_returned_address(&self, raw: &RawResult) -> Address {
            Address {
                city: raw.raw.get("city").and_then(|v| v.as_str()).map(String::from),
                ..Default::default()
            }
        }
    }

    fn request() -> GeocodeRequest {
        GeocodeRequest {
            entity: EntityKey::new(EntityType::Accommodation, 1),
            address: Address {
                street: Some("1 Main St".to_owned()),
                city: Some("Springfield".to_owned()),
                region: Some("IL".to_owned()),
                ..Default::default()
            },
            batch_id: None,
        }
    }

    #[tokio::test]
    async fn sheds_trailing_priority_field_on_no_results_then_succeeds() {
        let adapter = StubAdapter {
            required: vec!["city"],
            priority: vec!["street", "region"],
            results_per_call: std::sync::Mutex::new(vec![
                Err(GeocodeError::NoResultsFound {
                    provider: "stub".to_owned(),
                }),
                Ok(vec![RawResult {
                    longitude: 1.0,
                    latitude: 2.0,
                    raw: json!({"city": "Springfield"}),
                }]),
            ]),
        };
        let candidate = geocode_with_shedding(&adapter, &request()).await.unwrap();
        assert_eq!(candidate.city.as_deref(), Some("Springfield"));
        let rejected = candidate.meta.get("rejected").unwrap().as_array().unwrap();
        assert_eq!(rejected, &vec![json!("region")]);
    }

    #[tokio::test]
    async fn gives_up_with_no_results_found_once_priority_fields_exhausted() {
        let adapter = StubAdapter {
            required: vec!["city"],
            priority: vec!["region"],
            results_per_call: std::sync::Mutex::new(vec![
                Err(GeocodeError::NoResultsFound {
                    provider: "stub".to_owned(),
                }),
                Err(GeocodeError::NoResultsFound {
                    provider: "stub".to_owned(),
                }),
            ]),
        };
        let result = geocode_with_shedding(&adapter, &request()).await;
        assert!(matches!(result, Err(GeocodeError::NoResultsFound { .. })));
    }

    #[tokio::test]
    async fn picks_highest_scoring_alternate() {
        let adapter = StubAdapter {
            required: vec!["city"],
            priority: vec![],
            results_per_call: std::sync::Mutex::new(vec![Ok(vec![
                RawResult {
                    longitude: 1.0,
                    latitude: 2.0,
                    raw: json!({"city": "Nowhere"}),
                },
                RawResult {
                    longitude: 3.0,
                    latitude: 4.0,
                    raw: json!({"city": "Springfield"}),
                },
            ])]),
        };
        let candidate = geocode_with_shedding(&adapter, &request()).await.unwrap();
        // The second alternate's city matches the input exactly, so it
        // should score higher and win.
        assert_eq!(candidate.longitude.unwrap().as_str(), "3");
    }

    #[test]
    fn compose_street_prefers_combined_form() {
        let address = Address {
            house_number: Some("221B".to_owned()),
            street: Some("Baker Street".to_owned()),
            ..Default::default()
        };
        assert_eq!(compose_street(&address), Some("221B Baker Street".to_owned()));
    }

    #[test]
    fn distance_score_decays_past_ten_metres_free_radius() {
        let far = RawResult {
            longitude: 2.0,
            latitude: 2.0,
            raw: json!({}),
        };
        let input = Address {
            guess: Some(Guess {
                longitude: 0.0,
                latitude: 0.0,
            }),
            ..Default::default()
        };
        struct NullAdapter;
        #[async_trait]
        impl GeocoderAdapter for NullAdapter {
            fn name(&self) -> &str {
                "null"
            }
            fn version(&self) -> u32 {
                1
            }
            fn default_ttl(&self) -> Option<i64> {
                None
            }
            fn required_fields(&self) -> &[&'static str] {
                &[]
            }
            fn priority_fields(&self) -> &[&'static str] {
                &[]
            }
            async fn raw_geocode(&self, _: &Address) -> Result<Vec<RawResult>, GeocodeError> {
                unreachable!()
            }
            fn parse_returned_address(&self, _: &RawResult) -> Address {
                Address::default()
            }
        }
        let score = score_alternate(&NullAdapter, &input, &far);
        assert!(score < 3.0);
        assert!(score > 0.0);
    }
}
