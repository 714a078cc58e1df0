//! Esri ArcGIS World Geocoding Service adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::GeocodeError;
use crate::model::Address;

use super::rest::{get_json, HttpsClient};
use super::{GeocoderAdapter, RawResult};

const NAME: &str = "arcgis";
const API_URL: &str =
    "https://geocode-api.arcgis.com/arcgis/rest/services/World/GeocodeServer/findAddressCandidates";

pub struct ArcGis {
    client: HttpsClient,
    token: String,
}

impl ArcGis {
    pub fn new(client: HttpsClient, token: String) -> ArcGis {
        ArcGis { client, token }
    }
}

#[async_trait]
impl GeocoderAdapter for ArcGis {
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
        params.insert("token", self.token.clone());
        params.insert("f", "json".to_owned());
        params.insert("outFields", "*".to_owned());
        if let Some(street) = &projected.street {
            params.insert("address", street.clone());
        }
        if let Some(city) = &projected.city {
            params.insert("city", city.clone());
        }
        if let Some(region) = &projected.region {
            params.insert("region", region.clone());
        }
        if let Some(postal_code) = &projected.postal_code {
            params.insert("postal", postal_code.clone());
        }
        if let Some(country) = &projected.country_code {
            params.insert("countryCode", country.clone());
        }
        let (status, body) = get_json(&self.client, NAME, API_URL, &params).await?;
        map_arcgis_response(status, &body)
    }

    fn parse_returned_address(&self, raw: &RawResult) -> Address {
        let attrs = raw.raw.get("attributes");
        let get = |key: &str| -> Option<String> {
            attrs
                .and_then(|a| a.get(key))
                .and_then(Value::as_str)
                .map(String::from)
        };
        Address {
            street: get("StAddr"),
            house_number: None,
            district: get("Nbrhd"),
            city: get("City"),
            postal_code: get("Postal"),
            region: get("Region"),
            country: get("Country"),
            country_code: get("Country").map(|cc| cc.to_uppercase()),
            name: None,
            guess: None,
        }
    }
}

fn map_arcgis_response(status: u16, body: &Value) -> Result<Vec<RawResult>, GeocodeError> {
    if let Some(error) = body.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return match code {
            498 | 499 => Err(GeocodeError::InvalidRequest {
                provider: NAME.to_owned(),
                detail: message.to_owned(),
            }),
            429 => Err(GeocodeError::RateLimitExceeded {
                provider: NAME.to_owned(),
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
    let candidates = body
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let alternates = candidates
        .into_iter()
        .filter_map(|candidate| {
            let location = candidate.get("location")?;
            let longitude = location.get("x")?.as_f64()?;
            let latitude = location.get("y")?.as_f64()?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_token_error_to_invalid_request() {
        let body = json!({"error": {"code": 498, "message": "Invalid token."}});
        assert!(matches!(
            map_arcgis_response(200, &body),
            Err(GeocodeError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn parses_candidate_location_xy() {
        let body = json!({"candidates": [{"location": {"x": 4.9, "y": 52.37}}]});
        let alternates = map_arcgis_response(200, &body).unwrap();
        assert_eq!(alternates[0].longitude, 4.9);
        assert_eq!(alternates[0].latitude, 52.37);
    }
}
