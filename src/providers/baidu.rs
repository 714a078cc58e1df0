//! Baidu Maps Geocoding API v3 adapter.
//!
//! Scoped to addresses that already carry a Chinese administrative
//! division (`region`/`city`); Baidu's coverage outside mainland China
//! is unreliable enough that the original only ever wires this adapter
//! in behind a country-code check upstream.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::GeocodeError;
use crate::model::Address;

use super::rest::{get_json, HttpsClient};
use super::{GeocoderAdapter, RawResult};

const NAME: &str = "baidu";
const API_URL: &str = "https://api.map.baidu.com/geocoding/v3/";

pub struct Baidu {
    client: HttpsClient,
    api_key: String,
}

impl Baidu {
    pub fn new(client: HttpsClient, api_key: String) -> Baidu {
        Baidu { client, api_key }
    }
}

#[async_trait]
impl GeocoderAdapter for Baidu {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> u32 {
        1
    }

    fn default_ttl(&self) -> Option<i64> {
        Some(14 * 24 * 3600)
    }

    fn required_fields(&self) -> &[&'static str] {
        &["city"]
    }

    fn priority_fields(&self) -> &[&'static str] {
        &["postal_code", "district", "street"]
    }

    async fn raw_geocode(&self, projected: &Address) -> Result<Vec<RawResult>, GeocodeError> {
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("ak", self.api_key.clone());
        params.insert("output", "json".to_owned());
        params.insert("ret_coordtype", "gcj02ll".to_owned());
        if let Some(city) = &projected.city {
            params.insert("city", city.clone());
        }
        let mut address = String::new();
        if let Some(district) = &projected.district {
            address.push_str(district);
        }
        if let Some(street) = &projected.street {
            if !address.is_empty() {
                address.push(' ');
            }
            address.push_str(street);
        }
        if !address.is_empty() {
            params.insert("address", address);
        }
        let (status, body) = get_json(&self.client, NAME, API_URL, &params).await?;
        map_baidu_response(status, &body)
    }

    fn parse_returned_address(&self, _raw: &RawResult) -> Address {
        // Baidu's v3 response carries only the resolved point plus a
        // confidence score, no structured address components to echo back.
        Address {
            street: None,
            house_number: None,
            district: None,
            city: None,
            postal_code: None,
            region: None,
            country: None,
            country_code: Some("CN".to_owned()),
            name: None,
            guess: None,
        }
    }
}

fn map_baidu_response(status: u16, body: &Value) -> Result<Vec<RawResult>, GeocodeError> {
    let baidu_status = body.get("status").and_then(Value::as_i64).unwrap_or(-1);
    match baidu_status {
        0 => {
            let location = body
                .get("result")
                .and_then(|r| r.get("location"))
                .cloned();
            let longitude = location
                .as_ref()
                .and_then(|l| l.get("lng"))
                .and_then(Value::as_f64);
            let latitude = location
                .as_ref()
                .and_then(|l| l.get("lat"))
                .and_then(Value::as_f64);
            match (longitude, latitude) {
                (Some(longitude), Some(latitude)) => Ok(vec![RawResult {
                    longitude,
                    latitude,
                    raw: body.get("result").cloned().unwrap_or(Value::Null),
                }]),
                _ => Err(GeocodeError::NoResultsFound {
                    provider: NAME.to_owned(),
                }),
            }
        }
        2 => Err(GeocodeError::InvalidRequest {
            provider: NAME.to_owned(),
            detail: "missing required parameter".to_owned(),
        }),
        5 | 301 => Err(GeocodeError::InvalidRequest {
            provider: NAME.to_owned(),
            detail: "invalid ak".to_owned(),
        }),
        302 => Err(GeocodeError::RateLimitExceeded {
            provider: NAME.to_owned(),
        }),
        _ => Err(GeocodeError::FailedRequest {
            provider: NAME.to_owned(),
            detail: format!("http {} baidu status {}", status, baidu_status),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_quota_status_to_rate_limit() {
        let body = json!({"status": 302});
        assert!(matches!(
            map_baidu_response(200, &body),
            Err(GeocodeError::RateLimitExceeded { .. })
        ));
    }

    #[test]
    fn parses_successful_location() {
        let body = json!({"status": 0, "result": {"location": {"lng": 116.4, "lat": 39.9}}});
        let alternates = map_baidu_response(200, &body).unwrap();
        assert_eq!(alternates[0].longitude, 116.4);
        assert_eq!(alternates[0].latitude, 39.9);
    }
}
