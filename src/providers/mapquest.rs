//! MapQuest Geocoding API adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::GeocodeError;
use crate::model::Address;

use super::rest::{get_json, HttpsClient};
use super::{GeocoderAdapter, RawResult};

const NAME: &str = "mapquest";
const API_URL: &str = "https://www.mapquestapi.com/geocoding/v1/address";

pub struct MapQuest {
    client: HttpsClient,
    api_key: String,
}

impl MapQuest {
    pub fn new(client: HttpsClient, api_key: String) -> MapQuest {
        MapQuest { client, api_key }
    }
}

#[async_trait]
impl GeocoderAdapter for MapQuest {
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
        params.insert("key", self.api_key.clone());
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
            params.insert("postalCode", postal_code.clone());
        }
        if let Some(country) = &projected.country {
            params.insert("country", country.clone());
        }
        let (status, body) = get_json(&self.client, NAME, API_URL, &params).await?;
        map_mapquest_response(status, &body)
    }

    fn parse_returned_address(&self, raw: &RawResult) -> Address {
        let get = |key: &str| -> Option<String> {
            raw.raw.get(key).and_then(Value::as_str).map(String::from)
        };
        Address {
            street: get("street"),
            house_number: None,
            district: None,
            city: get("adminArea5"),
            postal_code: get("postalCode"),
            region: get("adminArea3"),
            country: get("adminArea1"),
            country_code: get("adminArea1").map(|cc| cc.to_uppercase()),
            name: None,
            guess: None,
        }
    }
}

fn map_mapquest_response(status: u16, body: &Value) -> Result<Vec<RawResult>, GeocodeError> {
    let status_code = body
        .get("info")
        .and_then(|info| info.get("statuscode"))
        .and_then(Value::as_i64)
        .unwrap_or(i64::from(status));
    if status_code == 403 {
        return Err(GeocodeError::InvalidRequest {
            provider: NAME.to_owned(),
            detail: "unauthorized".to_owned(),
        });
    }
    if status_code == 500 {
        return Err(GeocodeError::FailedRequest {
            provider: NAME.to_owned(),
            detail: "internal error".to_owned(),
        });
    }
    let results = body
        .get("results")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let locations = results
        .into_iter()
        .flat_map(|result| {
            result
                .get("locations")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        })
        .collect::<Vec<_>>();
    let alternates = locations
        .into_iter()
        .filter_map(|location| {
            let latlng = location.get("latLng")?;
            let longitude = latlng.get("lng")?.as_f64()?;
            let latitude = latlng.get("lat")?.as_f64()?;
            Some(RawResult {
                longitude,
                latitude,
                raw: location,
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
    fn maps_statuscode_403_to_invalid_request() {
        let body = json!({"info": {"statuscode": 403}});
        assert!(matches!(
            map_mapquest_response(200, &body),
            Err(GeocodeError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn parses_locations_lat_lng() {
        let body = json!({"results": [{"locations": [{"latLng": {"lat": 52.37, "lng": 4.9}}]}]});
        let alternates = map_mapquest_response(200, &body).unwrap();
        assert_eq!(alternates[0].latitude, 52.37);
    }
}
