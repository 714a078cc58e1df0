//! HERE Geocoding and Search API adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::GeocodeError;
use crate::model::Address;

use super::rest::{get_json, HttpsClient};
use super::{GeocoderAdapter, RawResult};

const NAME: &str = "here";
const API_URL: &str = "https://geocode.search.hereapi.com/v1/geocode";

pub struct Here {
    client: HttpsClient,
    api_key: String,
}

impl Here {
    pub fn new(client: HttpsClient, api_key: String) -> Here {
        Here { client, api_key }
    }
}

#[async_trait]
impl GeocoderAdapter for Here {
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
        params.insert("apiKey", self.api_key.clone());
        let q = compose_query(projected);
        if let Some(q) = q {
            params.insert("q", q);
        }
        let (status, body) = get_json(&self.client, NAME, API_URL, &params).await?;
        map_here_response(status, &body)
    }

    fn parse_returned_address(&self, raw: &RawResult) -> Address {
        let addr = raw.raw.get("address");
        let get = |key: &str| -> Option<String> {
            addr.and_then(|a| a.get(key))
                .and_then(Value::as_str)
                .map(String::from)
        };
        Address {
            street: get("street"),
            house_number: get("houseNumber"),
            district: get("district"),
            city: get("city"),
            postal_code: get("postalCode"),
            region: get("state"),
            country: get("countryName"),
            country_code: get("countryCode").map(|cc| cc.to_uppercase()),
            name: None,
            guess: None,
        }
    }
}

fn compose_query(address: &Address) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(street) = &address.street {
        parts.push(street.clone());
    }
    if let Some(city) = &address.city {
        parts.push(city.clone());
    }
    if let Some(country) = &address.country {
        parts.push(country.clone());
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn map_here_response(status: u16, body: &Value) -> Result<Vec<RawResult>, GeocodeError> {
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
    if status == 400 {
        return Err(GeocodeError::InvalidRequest {
            provider: NAME.to_owned(),
            detail: "bad request".to_owned(),
        });
    }
    if status >= 500 {
        return Err(GeocodeError::FailedRequest {
            provider: NAME.to_owned(),
            detail: format!("http {}", status),
        });
    }
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let alternates = items
        .into_iter()
        .filter_map(|item| {
            let position = item.get("position")?;
            let longitude = position.get("lng")?.as_f64()?;
            let latitude = position.get("lat")?.as_f64()?;
            Some(RawResult {
                longitude,
                latitude,
                raw: item,
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
            map_here_response(403, &Value::Null),
            Err(GeocodeError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn parses_items_position() {
        let body = json!({"items": [{"position": {"lat": 52.37, "lng": 4.9}}]});
        let alternates = map_here_response(200, &body).unwrap();
        assert_eq!(alternates[0].latitude, 52.37);
        assert_eq!(alternates[0].longitude, 4.9);
    }
}
