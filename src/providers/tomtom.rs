//! TomTom Search API adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::GeocodeError;
use crate::model::Address;

use super::rest::{get_json, HttpsClient};
use super::{GeocoderAdapter, RawResult};

const NAME: &str = "tomtom";
const API_URL: &str = "https://api.tomtom.com/search/2/geocode.json";

pub struct TomTom {
    client: HttpsClient,
    api_key: String,
}

impl TomTom {
    pub fn new(client: HttpsClient, api_key: String) -> TomTom {
        TomTom { client, api_key }
    }
}

#[async_trait]
impl GeocoderAdapter for TomTom {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> u32 {
        1
    }

    fn default_ttl(&self) -> Option<i64> {
        Some(14 * 24 * 3600)
    }

    /// TomTom's own daily quota resets on a rolling 24 h window; without
    /// a documented reset instant, one hour out is the conservative
    /// default every other non-Google adapter uses.
    fn required_fields(&self) -> &[&'static str] {
        &["country"]
    }

    fn priority_fields(&self) -> &[&'static str] {
        &["postal_code", "region", "city", "street"]
    }

    async fn raw_geocode(&self, projected: &Address) -> Result<Vec<RawResult>, GeocodeError> {
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("key", self.api_key.clone());
        let query = compose_query(projected);
        let (status, body) = get_json(
            &self.client,
            NAME,
            &format!("{}/{}.json", API_URL.trim_end_matches(".json"), urlencoding_placeholder(&query)),
            &params,
        )
        .await?;
        map_tomtom_response(status, &body)
    }

    fn parse_returned_address(&self, raw: &RawResult) -> Address {
        let addr = raw.raw.get("address");
        let get = |key: &str| -> Option<String> {
            addr.and_then(|a| a.get(key)).and_then(Value::as_str).map(String::from)
        };
        Address {
            street: get("streetName"),
            house_number: get("streetNumber"),
            district: get("municipalitySubdivision"),
            city: get("municipality"),
            postal_code: get("postalCode"),
            region: get("countrySubdivision"),
            country: get("country"),
            country_code: get("countryCode"),
            name: None,
            guess: None,
        }
    }
}

fn compose_query(address: &Address) -> String {
    [&address.street, &address.city, &address.country]
        .iter()
        .filter_map(|field| field.as_deref())
        .collect::<Vec<_>>()
        .join(" ")
}

/// The real API takes the free-text query as a path segment, not a query
/// param; since we only build the URL ourselves in this adapter we just
/// percent-encode the obvious unsafe characters rather than pull in a
/// second URL-encoding dependency beyond what `url` already gives us.
fn urlencoding_placeholder(query: &str) -> String {
    query.replace(' ', "%20")
}

fn map_tomtom_response(status: u16, body: &Value) -> Result<Vec<RawResult>, GeocodeError> {
    match status {
        200 => {
            let results = body
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let alternates = results
                .into_iter()
                .filter_map(|result| {
                    let position = result.get("position")?;
                    let longitude = position.get("lon")?.as_f64()?;
                    let latitude = position.get("lat")?.as_f64()?;
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
        400 => Err(GeocodeError::InvalidRequest {
            provider: NAME.to_owned(),
            detail: "bad request".to_owned(),
        }),
        403 | 429 => Err(GeocodeError::RateLimitExceeded {
            provider: NAME.to_owned(),
        }),
        _ => Err(GeocodeError::FailedRequest {
            provider: NAME.to_owned(),
            detail: format!("http {}", status),
        }),
    }
}
