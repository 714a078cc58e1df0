//! OpenStreetMap Nominatim adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::GeocodeError;
use crate::model::Address;

use super::rest::{get_json, HttpsClient};
use super::{GeocoderAdapter, RawResult};

const NAME: &str = "osm";
const API_URL: &str = "https://nominatim.openstreetmap.org/search";

pub struct Osm {
    client: HttpsClient,
}

impl Osm {
    pub fn new(client: HttpsClient) -> Osm {
        Osm { client }
    }
}

#[async_trait]
impl GeocoderAdapter for Osm {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> u32 {
        1
    }

    fn default_ttl(&self) -> Option<i64> {
        Some(7 * 24 * 3600)
    }

    fn required_fields(&self) -> &[&'static str] {
        &["country"]
    }

    fn priority_fields(&self) -> &[&'static str] {
        &["postal_code", "state", "city", "street"]
    }

    async fn raw_geocode(&self, projected: &Address) -> Result<Vec<RawResult>, GeocodeError> {
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("format", "jsonv2".to_owned());
        params.insert("addressdetails", "1".to_owned());
        if let Some(street) = &projected.street {
            params.insert("street", street.clone());
        }
        if let Some(city) = &projected.city {
            params.insert("city", city.clone());
        }
        if let Some(region) = &projected.region {
            params.insert("state", region.clone());
        }
        if let Some(postal_code) = &projected.postal_code {
            params.insert("postalcode", postal_code.clone());
        }
        if let Some(country) = &projected.country {
            params.insert("country", country.clone());
        }

        let (status, body) = get_json(&self.client, NAME, API_URL, &params).await?;
        map_osm_response(status, &body)
    }

    fn parse_returned_address(&self, raw: &RawResult) -> Address {
        let addr = raw.raw.get("address");
        let get = |key: &str| -> Option<String> {
            addr.and_then(|a| a.get(key)).and_then(Value::as_str).map(String::from)
        };
        Address {
            street: get("road"),
            house_number: get("house_number"),
            district: get("suburb"),
            city: get("city").or_else(|| get("town")).or_else(|| get("village")),
            postal_code: get("postcode"),
            region: get("state"),
            country: get("country"),
            country_code: get("country_code").map(|cc| cc.to_uppercase()),
            name: None,
            guess: None,
        }
    }
}

fn map_osm_response(status: u16, body: &Value) -> Result<Vec<RawResult>, GeocodeError> {
    if status >= 500 {
        return Err(GeocodeError::FailedRequest {
            provider: NAME.to_owned(),
            detail: format!("http {}", status),
        });
    }
    if status == 429 {
        return Err(GeocodeError::RateLimitExceeded {
            provider: NAME.to_owned(),
        });
    }
    if status >= 400 {
        return Err(GeocodeError::InvalidRequest {
            provider: NAME.to_owned(),
            detail: format!("http {}", status),
        });
    }
    let results = body.as_array().cloned().unwrap_or_default();
    let alternates = results
        .into_iter()
        .filter_map(|result| {
            let longitude = result.get("lon")?.as_str()?.parse::<f64>().ok()?;
            let latitude = result.get("lat")?.as_str()?.parse::<f64>().ok()?;
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
