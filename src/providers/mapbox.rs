//! Mapbox Geocoding API adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::GeocodeError;
use crate::model::Address;

use super::rest::{get_json, HttpsClient};
use super::{GeocoderAdapter, RawResult};

const NAME: &str = "mapbox";
const API_URL: &str = "https://api.mapbox.com/geocoding/v5/mapbox.places/query.json";

pub struct Mapbox {
    client: HttpsClient,
    access_token: String,
}

impl Mapbox {
    pub fn new(client: HttpsClient, access_token: String) -> Mapbox {
        Mapbox {
            client,
            access_token,
        }
    }
}

#[async_trait]
impl GeocoderAdapter for Mapbox {
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
        &["country"]
    }

    fn priority_fields(&self) -> &[&'static str] {
        &["postal_code", "region", "city", "street"]
    }

    async fn raw_geocode(&self, projected: &Address) -> Result<Vec<RawResult>, GeocodeError> {
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("access_token", self.access_token.clone());
        params.insert("limit", "5".to_owned());
        if let Some(country) = &projected.country_code {
            params.insert("country", country.to_lowercase());
        }
        let (status, body) = get_json(&self.client, NAME, API_URL, &params).await?;
        map_mapbox_response(status, &body)
    }

    fn parse_returned_address(&self, raw: &RawResult) -> Address {
        let context = raw.raw.get("context").and_then(Value::as_array);
        let find = |prefix: &str| -> Option<String> {
            context?.iter().find_map(|entry| {
                let id = entry.get("id")?.as_str()?;
                if id.starts_with(prefix) {
                    entry.get("text")?.as_str().map(String::from)
                } else {
                    None
                }
            })
        };
        Address {
            street: raw
                .raw
                .get("text")
                .and_then(Value::as_str)
                .map(String::from),
            house_number: raw
                .raw
                .get("address")
                .and_then(Value::as_str)
                .map(String::from),
            district: find("neighborhood"),
            city: find("place"),
            postal_code: find("postcode"),
            region: find("region"),
            country: find("country"),
            country_code: raw
                .raw
                .get("properties")
                .and_then(|p| p.get("short_code"))
                .and_then(Value::as_str)
                .map(|s| s.to_uppercase()),
            name: None,
            guess: None,
        }
    }
}

fn map_mapbox_response(status: u16, body: &Value) -> Result<Vec<RawResult>, GeocodeError> {
    if status == 401 || status == 403 {
        return Err(GeocodeError::InvalidRequest {
            provider: NAME.to_owned(),
            detail: "unauthorized".to_owned(),
        });
    }
    if status == 429 {
        return Err(GeocodeError::RateLimitExceeded {
            provider: NAME.to_owned(),
        });
    }
    if status >= 500 {
        return Err(GeocodeError::FailedRequest {
            provider: NAME.to_owned(),
            detail: format!("http {}", status),
        });
    }
    let features = body
        .get("features")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let alternates = features
        .into_iter()
        .filter_map(|feature| {
            let center = feature.get("center")?.as_array()?;
            let longitude = center.first()?.as_f64()?;
            let latitude = center.get(1)?.as_f64()?;
            Some(RawResult {
                longitude,
                latitude,
                raw: feature,
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
    fn maps_unauthorized_to_invalid_request() {
        assert!(matches!(
            map_mapbox_response(401, &Value::Null),
            Err(GeocodeError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn parses_center_array() {
        let body = json!({"features": [{"center": [4.9, 52.37]}]});
        let alternates = map_mapbox_response(200, &body).unwrap();
        assert_eq!(alternates[0].longitude, 4.9);
        assert_eq!(alternates[0].latitude, 52.37);
    }
}
