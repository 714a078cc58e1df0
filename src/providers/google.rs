//! Google Geocoding API adapter.
//!
//! Field mapping, retry configuration, and quota-reset time are ported
//! field-for-field from `original_source/src/geocode/providers/
//! google.py`'s `Google` class.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use chrono_tz::US::Pacific;
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::GeocodeError;
use crate::model::Address;

use super::rest::{get_json, HttpsClient};
use super::{GeocoderAdapter, RawResult};

const OWN_VERSION: u32 = 1;
const NAME: &str = "google";
const API_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

pub struct Google {
    client: HttpsClient,
    api_key: String,
}

impl Google {
    pub fn new(client: HttpsClient, api_key: String) -> Google {
        Google { client, api_key }
    }
}

#[async_trait]
impl GeocoderAdapter for Google {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> u32 {
        OWN_VERSION
    }

    fn default_ttl(&self) -> Option<i64> {
        Some(30 * 24 * 3600)
    }

    /// `quota_reset()`: next midnight Pacific, as a UTC epoch.
    fn quota_reset_epoch(&self) -> i64 {
        let pacific_now = Utc::now().with_timezone(&Pacific);
        let tomorrow = pacific_now.date_naive() + chrono::Duration::days(1);
        let midnight = tomorrow.and_hms_opt(0, 0, 0).expect("valid midnight time");
        Pacific
            .from_local_datetime(&midnight)
            .single()
            .unwrap_or_else(|| Pacific.from_utc_datetime(&midnight))
            .with_timezone(&Utc)
            .timestamp()
    }

    fn required_fields(&self) -> &[&'static str] {
        &["country", "postal_code"]
    }

    fn priority_fields(&self) -> &[&'static str] {
        &["region", "city", "district", "street"]
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
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("key", self.api_key.clone());

        let components = google_components(projected);
        if !components.is_empty() {
            params.insert("components", components);
        }
        let address_line = compose_address_line(projected);
        if let Some(address_line) = address_line {
            params.insert("address", address_line);
        }

        let (status, body) = get_json(&self.client, NAME, API_URL, &params).await?;
        map_google_response(status, &body)
    }

    fn parse_returned_address(&self, raw: &RawResult) -> Address {
        parse_google_address(&raw.raw)
    }
}

fn google_components(address: &Address) -> String {
    let mut parts = address.present_fields();
    parts.sort_by(|a, b| a.0.cmp(b.0));
    parts
        .into_iter()
        .filter(|(field, _)| *field != "street" && *field != "name")
        .map(|(field, value)| format!("{}:{}", field, value))
        .collect::<Vec<_>>()
        .join("|")
}

fn compose_address_line(address: &Address) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(street) = &address.street {
        parts.push(street.clone());
    }
    if let Some(city) = &address.city {
        parts.push(city.clone());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Maps Google's `status` field to the error taxonomy, per `google.py`'s
/// `_geocode` body: `OVER_QUERY_LIMIT` -> rate limit; `UNKNOWN_ERROR` /
/// `REQUEST_DENIED` -> failed request; `INVALID_REQUEST` -> invalid
/// request; anything else with no results -> no results found.
fn map_google_response(status: u16, body: &Value) -> Result<Vec<RawResult>, GeocodeError> {
    let google_status = body.get("status").and_then(Value::as_str).unwrap_or("");
    match google_status {
        "OK" => {
            let results = body
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let alternates = results
                .into_iter()
                .filter_map(|result| {
                    let location = result.get("geometry")?.get("location")?;
                    let longitude = location.get("lng")?.as_f64()?;
                    let latitude = location.get("lat")?.as_f64()?;
                    Some(RawResult {
                        longitude,
                        latitude,
                        raw: result,
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

/// Ported from `_parse_returned_address`'s defaultdict-of-defaultdicts
/// traversal over `address_components`. The "infinite defaultdict" idiom
/// has no Rust analogue; plain `Option` chaining preserves the same
/// semantics (a missing nested key yields `None`, never a panic).
fn parse_google_address(result: &Value) -> Address {
    let components = result
        .get("address_components")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let find = |kind: &str, long: bool| -> Option<String> {
        components.iter().find_map(|component| {
            let types = component.get("types")?.as_array()?;
            if types.iter().any(|t| t.as_str() == Some(kind)) {
                let key = if long { "long_name" } else { "short_name" };
                component.get(key)?.as_str().map(String::from)
            } else {
                None
            }
        })
    };

    Address {
        street: find("route", true),
        house_number: find("street_number", true),
        district: find("sublocality", true),
        city: find("locality", true),
        postal_code: find("postal_code", true),
        region: find("administrative_area_level_1", true),
        country: find("country", true),
        country_code: find("country", false),
        name: None,
        guess: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_over_query_limit_to_rate_limit_exceeded() {
        let body = json!({"status": "OVER_QUERY_LIMIT"});
        let result = map_google_response(200, &body);
        assert!(matches!(result, Err(GeocodeError::RateLimitExceeded { .. })));
    }

    #[test]
    fn maps_invalid_request_status() {
        let body = json!({"status": "INVALID_REQUEST"});
        let result = map_google_response(200, &body);
        assert!(matches!(result, Err(GeocodeError::InvalidRequest { .. })));
    }

    #[test]
    fn parses_address_components_defensively() {
        let result = json!({
            "address_components": [
                {"types": ["route"], "long_name": "Evergreen Terrace", "short_name": "Evergreen Terrace"},
                {"types": ["locality"], "long_name": "Springfield", "short_name": "Springfield"},
                {"types": ["country"], "long_name": "United States", "short_name": "US"},
            ],
        });
        let address = parse_google_address(&result);
        assert_eq!(address.street.as_deref(), Some("Evergreen Terrace"));
        assert_eq!(address.city.as_deref(), Some("Springfield"));
        assert_eq!(address.country_code.as_deref(), Some("US"));
        assert_eq!(address.district, None);
    }

    #[test]
    fn empty_results_is_no_results_found() {
        let body = json!({"status": "OK", "results": []});
        let result = map_google_response(200, &body);
        assert!(matches!(result, Err(GeocodeError::NoResultsFound { .. })));
    }
}
