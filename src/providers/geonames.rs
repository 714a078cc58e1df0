//! GeoNames `searchJSON` adapter.
//!
//! GeoNames indexes populated places, not street addresses, so this
//! adapter is the weakest-precision member of the default cascade and
//! only ever contributes city-level fallback coordinates.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::GeocodeError;
use crate::model::Address;

use super::rest::{get_json, HttpsClient};
use super::{GeocoderAdapter, RawResult};

const NAME: &str = "geonames";
const API_URL: &str = "http://api.geonames.org/searchJSON";

pub struct GeoNames {
    client: HttpsClient,
    username: String,
}

impl GeoNames {
    pub fn new(client: HttpsClient, username: String) -> GeoNames {
        GeoNames { client, username }
    }
}

#[async_trait]
impl GeocoderAdapter for GeoNames {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> u32 {
        1
    }

    fn default_ttl(&self) -> Option<i64> {
        Some(30 * 24 * 3600)
    }

    fn required_fields(&self) -> &[&'static str] {
        &["city"]
    }

    fn priority_fields(&self) -> &[&'static str] {
        &["region", "country"]
    }

    async fn raw_geocode(&self, projected: &Address) -> Result<Vec<RawResult>, GeocodeError> {
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("username", self.username.clone());
        params.insert("maxRows", "5".to_owned());
        if let Some(city) = &projected.city {
            params.insert("name_equals", city.clone());
        }
        if let Some(country) = &projected.country_code {
            params.insert("country", country.clone());
        }
        let (status, body) = get_json(&self.client, NAME, API_URL, &params).await?;
        map_geonames_response(status, &body)
    }

    fn parse_returned_address(&self, raw: &RawResult) -> Address {
        let get = |key: &str| -> Option<String> {
            raw.raw.get(key).and_then(Value::as_str).map(String::from)
        };
        Address {
            street: None,
            house_number: None,
            district: None,
            city: get("name").or_else(|| get("toponymName")),
            postal_code: None,
            region: get("adminName1"),
            country: get("countryName"),
            country_code: get("countryCode").map(|cc| cc.to_uppercase()),
            name: None,
            guess: None,
        }
    }
}

fn map_geonames_response(status: u16, body: &Value) -> Result<Vec<RawResult>, GeocodeError> {
    if let Some(status_obj) = body.get("status") {
        let code = status_obj.get("value").and_then(Value::as_i64).unwrap_or(0);
        let message = status_obj
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return match code {
            18 | 19 | 20 => Err(GeocodeError::RateLimitExceeded {
                provider: NAME.to_owned(),
            }),
            10 | 11 => Err(GeocodeError::InvalidRequest {
                provider: NAME.to_owned(),
                detail: message.to_owned(),
            }),
            _ => Err(GeocodeError::FailedRequest {
                provider: NAME.to_owned(),
                detail: message.to_owned(),
            }),
        };
    }
    if status >= 500 {
        return Err(GeocodeError::FailedRequest {
            provider: NAME.to_owned(),
            detail: format!("http {}", status),
        });
    }
    let geonames = body
        .get("geonames")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let alternates = geonames
        .into_iter()
        .filter_map(|entry| {
            let longitude = entry.get("lng")?.as_str().and_then(|s| s.parse::<f64>().ok())
                .or_else(|| entry.get("lng")?.as_f64())?;
            let latitude = entry.get("lat")?.as_str().and_then(|s| s.parse::<f64>().ok())
                .or_else(|| entry.get("lat")?.as_f64())?;
            Some(RawResult {
                longitude,
                latitude,
                raw: entry,
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_quota_status_to_rate_limit() {
        let body = json!({"status": {"value": 19, "message": "daily limit exceeded"}});
        assert!(matches!(
            map_geonames_response(200, &body),
            Err(GeocodeError::RateLimitExceeded { .. })
        ));
    }

    #[test]
    fn parses_string_lat_lng() {
        let body = json!({"geonames": [{"lng": "4.9", "lat": "52.37", "name": "Amsterdam"}]});
        let alternates = map_geonames_response(200, &body).unwrap();
        assert_eq!(alternates[0].longitude, 4.9);
        assert_eq!(alternates[0].latitude, 52.37);
    }
}
