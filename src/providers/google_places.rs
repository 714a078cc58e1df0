//! Google Places-backed geocoding adapter.
//!
//! Near-identical to `google.rs` in the original (`GooglePlaces` in
//! `google.py` differs from `Google` only by name, endpoint, and an
//! extra quota-protective pre-request sleep). Rather than duplicate the
//! whole adapter, this wraps `Google`'s field mapping and response
//! parsing and only varies the name, endpoint, and retry policy.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::GeocodeError;
use crate::model::Address;

use super::google::Google;
use super::rest::{get_json, HttpsClient};
use super::{GeocoderAdapter, RawResult};

const NAME: &str = "google_places";
const API_URL: &str = "https://maps.googleapis.com/maps/api/place/findplacefromtext/json";

pub struct GooglePlaces {
    client: HttpsClient,
    api_key: String,
    inner_field_mapping: Google,
}

impl GooglePlaces {
    pub fn new(client: HttpsClient, api_key: String) -> GooglePlaces {
        GooglePlaces {
            client: client.clone(),
            api_key: api_key.clone(),
            inner_field_mapping: Google::new(client, api_key),
        }
    }
}

#[async_trait]
impl GeocoderAdapter for GooglePlaces {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> u32 {
        self.inner_field_mapping.version()
    }

    fn default_ttl(&self) -> Option<i64> {
        self.inner_field_mapping.default_ttl()
    }

    fn quota_reset_epoch(&self) -> i64 {
        self.inner_field_mapping.quota_reset_epoch()
    }

    fn required_fields(&self) -> &[&'static str] {
        self.inner_field_mapping.required_fields()
    }

    fn priority_fields(&self) -> &[&'static str] {
        self.inner_field_mapping.priority_fields()
    }

    fn nr_of_retries(&self) -> u32 {
        1
    }

    fn initial_backoff(&self) -> f64 {
        3.0
    }

    fn quota_exceed_on_throttle(&self) -> bool {
        true
    }

    async fn raw_geocode(&self, projected: &Address) -> Result<Vec<RawResult>, GeocodeError> {
        // `check_quota()` in the original just sleeps to stay under the
        // Places API's stricter per-second budget before every call.
        tokio::time::sleep(Duration::from_secs_f64(2.0)).await;

        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("key", self.api_key.clone());
        params.insert("inputtype", "textquery".to_owned());
        if let Some(address_line) = projected
            .street
            .clone()
            .or_else(|| projected.city.clone())
        {
            params.insert("input", address_line);
        }
        params.insert("fields", "geometry,address_component".to_owned());

        let (status, body) = get_json(&self.client, NAME, API_URL, &params).await?;
        map_places_response(status, &body)
    }

    fn parse_returned_address(&self, raw: &RawResult) -> Address {
        self.inner_field_mapping.parse_returned_address(raw)
    }
}

fn map_places_response(
    status: u16,
    body: &serde_json::Value,
) -> Result<Vec<RawResult>, GeocodeError> {
    let google_status = body.get("status").and_then(|v| v.as_str()).unwrap_or("");
    match google_status {
        "OK" => {
            let candidates = body
                .get("candidates")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let alternates = candidates
                .into_iter()
                .filter_map(|candidate| {
                    let location = candidate.get("geometry")?.get("location")?;
                    let longitude = location.get("lng")?.as_f64()?;
                    let latitude = location.get("lat")?.as_f64()?;
                    Some(RawResult {
                        longitude,
                        latitude,
                        raw: candidate,
                    })
                })
                .collect::<Vec<_>>();
            if alternates.is_empty() {
                Err(GeocodeError::NoResultsFound {
                    provider: NAME.to_owned(),
                })
            } else {
                Ok(alternates)
            }
        }
        "OVER_QUERY_LIMIT" => Err(GeocodeError::RateLimitExceeded {
            provider: NAME.to_owned(),
        }),
        "UNKNOWN_ERROR" | "REQUEST_DENIED" => Err(GeocodeError::FailedRequest {
            provider: NAME.to_owned(),
            detail: format!("http {}: {}", status, google_status),
        }),
        "INVALID_REQUEST" => Err(GeocodeError::InvalidRequest {
            provider: NAME.to_owned(),
            detail: google_status.to_owned(),
        }),
        _ => Err(GeocodeError::NoResultsFound {
            provider: NAME.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_no_candidates_to_no_results_found() {
        let body = json!({"status": "OK", "candidates": []});
        let result = map_places_response(200, &body);
        assert!(matches!(result, Err(GeocodeError::NoResultsFound { .. })));
    }
}
