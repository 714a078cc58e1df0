//! Bing Maps Locations API adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::GeocodeError;
use crate::model::Address;

use super::rest::{get_json, HttpsClient};
use super::{GeocoderAdapter, RawResult};

const NAME: &str = "bing";
const API_URL: &str = "https://dev.virtualearth.net/REST/v1/Locations";

pub struct Bing {
    client: HttpsClient,
    api_key: String,
}

impl Bing {
    pub fn new(client: HttpsClient, api_key: String) -> Bing {
        Bing { client, api_key }
    }
}

#[async_trait]
impl GeocoderAdapter for Bing {
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
            params.insert("addressLine", street.clone());
        }
        if let Some(city) = &projected.city {
            params.insert("locality", city.clone());
        }
        if let Some(region) = &projected.region {
            params.insert("adminDistrict", region.clone());
        }
        if let Some(postal_code) = &projected.postal_code {
            params.insert("postalCode", postal_code.clone());
        }
        if let Some(country) = &projected.country {
            params.insert("countryRegion", country.clone());
        }
        let (status, body) = get_json(&self.client, NAME, API_URL, &params).await?;
        map_bing_response(status, &body)
    }

    fn parse_returned_address(&self, raw: &RawResult) -> Address {
        let addr = raw.raw.get("address");
        let get = |key: &str| -> Option<String> {
            addr.and_then(|a| a.get(key))
                .and_then(Value::as_str)
                .map(String::from)
        };
        Address {
            street: get("addressLine"),
            house_number: None,
            district: get("neighborhood"),
            city: get("locality"),
            postal_code: get("postalCode"),
            region: get("adminDistrict"),
            country: get("countryRegion"),
            country_code: get("countryRegionIso2").map(|cc| cc.to_uppercase()),
            name: None,
            guess: None,
        }
    }
}

fn map_bing_response(status: u16, body: &Value) -> Result<Vec<RawResult>, GeocodeError> {
    match status {
        200 => {
            let resource_sets = body
                .get("resourceSets")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let resources = resource_sets
                .into_iter()
                .flat_map(|set| {
                    set.get("resources")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>();
            let alternates = resources
                .into_iter()
                .filter_map(|resource| {
                    let point = resource.get("point")?.get("coordinates")?.as_array()?;
                    let latitude = point.first()?.as_f64()?;
                    let longitude = point.get(1)?.as_f64()?;
                    Some(RawResult {
                        longitude,
                        latitude,
                        raw: resource,
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
        400 => Err(GeocodeError::InvalidRequest {
            provider: NAME.to_owned(),
            detail: "bad request".to_owned(),
        }),
        401 | 403 => Err(GeocodeError::InvalidRequest {
            provider: NAME.to_owned(),
            detail: "unauthorized".to_owned(),
        }),
        429 => Err(GeocodeError::RateLimitExceeded {
            provider: NAME.to_owned(),
        }),
        _ => Err(GeocodeError::FailedRequest {
            provider: NAME.to_owned(),
            detail: format!("http {}", status),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_429_to_rate_limit_exceeded() {
        assert!(matches!(
            map_bing_response(429, &Value::Null),
            Err(GeocodeError::RateLimitExceeded { .. })
        ));
    }

    #[test]
    fn parses_lat_lng_order_from_coordinates() {
        let body = json!({
            "resourceSets": [{"resources": [{"point": {"coordinates": [52.37, 4.9]}}]}]
        });
        let alternates = map_bing_response(200, &body).unwrap();
        assert_eq!(alternates[0].latitude, 52.37);
        assert_eq!(alternates[0].longitude, 4.9);
    }

    #[test]
    fn empty_resource_sets_is_no_results_found() {
        let body = json!({"resourceSets": []});
        assert!(matches!(
            map_bing_response(200, &body),
            Err(GeocodeError::NoResultsFound { .. })
        ));
    }
}
