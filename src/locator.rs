//! The locator: converts a winning coordinate+city into locality/country
//! identifiers through an AWS-SigV4-signed HTTP call, then republishes
//! the enriched record.
//!
//! Grounded on `examples/faradayio-geocode-csv/src/geocoders/smarty/
//! client.rs` for the request/response shape (built on the same
//! `hyper` + `hyper-rustls` client every provider adapter uses) and on
//! `aws-sigv4`/`aws-credential-types`/`aws-config`'s own documented
//! request-signing flow for the SigV4 step, since no code in this
//! lineage ever talked to an AWS-signed endpoint.

use std::time::{Duration, SystemTime};

use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningSettings};
use aws_sigv4::sign::v4;
use futures::StreamExt;
use hyper::{Body, Request};
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::messages::namespace_for;
use crate::providers::rest::HttpsClient;

/// `API_ID`/`API_KEY`/`AWS_REGION` bundled together for a single
/// locator worker instance.
pub struct LocatorConfig {
    /// Kept for parity with the required `API_ID` environment variable;
    /// this crate's endpoint comes from `LOCALITY_SERVICE_URL` rather
    /// than being assembled from `api_id`, so this field has no reader
    /// of its own.
    #[allow(dead_code)]
    pub api_id: String,
    pub api_key: String,
    pub region: String,
    pub endpoint: Url,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LocalityRow {
    locality_id: Option<i64>,
    country_id: Option<i64>,
    administrative_division_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct LocatorResult {
    pub locality_id: Option<i64>,
    pub locality_ns: Option<i32>,
    pub administrative_division_id: Option<i64>,
    pub administrative_division_ns: Option<i32>,
    pub country_id: Option<i64>,
    pub country_ns: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocatorOutcome {
    /// 200 with a non-empty body: the first element's ids.
    Found(LocatorResult),
    /// 200 with an empty body, or 400: nothing to enrich, log and move on.
    Skipped,
    /// 429 with body `"Limit Exceeded"`: stop working this task entirely.
    Aborted,
}

#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("locality service call failed: {0}")]
    Transport(String),
    #[error("locality service returned a fatal error (403)")]
    Fatal,
    #[error("timed out waiting for a non-429 response")]
    TimedOut,
}

const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Call the locality HTTP service for one entity's winning coordinate.
/// `timeout` bounds the fixed-delay retry loop for the "429, not
/// limit-exceeded" case.
pub async fn locate(
    client: &HttpsClient,
    config: &LocatorConfig,
    longitude: f64,
    latitude: f64,
    city: Option<&str>,
    timeout: Duration,
) -> Result<LocatorOutcome, LocatorError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let (status, body) = call_once(client, config, longitude, latitude, city).await?;
        match status {
            200 => {
                let rows: Vec<LocalityRow> = serde_json::from_slice(&body).unwrap_or_default();
                return Ok(match rows.into_iter().next() {
                    Some(row) => Ok(LocatorOutcome::Found(LocatorResult {
                        locality_id: row.locality_id,
                        locality_ns: namespace_for(row.locality_id),
                        administrative_division_id: row.administrative_division_id,
                        administrative_division_ns: namespace_for(row.administrative_division_id),
                        country_id: row.country_id,
                        country_ns: namespace_for(row.country_id),
                    })),
                    None => Ok(LocatorOutcome::Skipped),
                }?);
            }
            400 => {
                warn!(status, "locality service rejected request");
                return Ok(LocatorOutcome::Skipped);
            }
            403 => return Err(LocatorError::Fatal),
            429 => {
                if body_is_limit_exceeded(&body) {
                    return Ok(LocatorOutcome::Aborted);
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(LocatorError::TimedOut);
                }
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
            other => {
                return Err(LocatorError::Transport(format!(
                    "unexpected status {}",
                    other
                )))
            }
        }
    }
}

fn body_is_limit_exceeded(body: &[u8]) -> bool {
    std::str::from_utf8(body)
        .map(|s| s.trim_matches('"').eq_ignore_ascii_case("Limit Exceeded"))
        .unwrap_or(false)
}

async fn call_once(
    client: &HttpsClient,
    config: &LocatorConfig,
    longitude: f64,
    latitude: f64,
    city: Option<&str>,
) -> Result<(u16, Vec<u8>), LocatorError> {
    let mut url = config.endpoint.clone();
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("longitude", &longitude.to_string());
        query.append_pair("latitude", &latitude.to_string());
        if let Some(city) = city {
            query.append_pair("city", city);
        }
    }

    let request = sign_request(config, &url).await?;
    let response = client
        .request(request)
        .await
        .map_err(|err| LocatorError::Transport(err.to_string()))?;
    let status = response.status().as_u16();
    let mut body = response.into_body();
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| LocatorError::Transport(err.to_string()))?;
        bytes.extend_from_slice(&chunk);
    }
    Ok((status, bytes))
}

/// Sign a `GET` to `url` with AWS SigV4, using the ambient AWS
/// credential chain (env vars, shared config/credentials files,
/// container/IMDS role credentials) the way the real service expects --
/// `API_KEY` is a separate, static API-Gateway key and plays no part in
/// the signature, it only ever travels as the `x-api-key` header.
async fn sign_request(config: &LocatorConfig, url: &Url) -> Result<Request<Body>, LocatorError> {
    let sdk_config = aws_config::load_from_env().await;
    let credentials = sdk_config
        .credentials_provider()
        .ok_or_else(|| LocatorError::Transport("no AWS credentials provider configured".to_owned()))?
        .provide_credentials()
        .await
        .map_err(|err| LocatorError::Transport(err.to_string()))?;
    let identity = credentials.into();
    let signing_params = v4::SigningParams::builder()
        .identity(&identity)
        .region(&config.region)
        .name("execute-api")
        .time(SystemTime::now())
        .settings(SigningSettings::default())
        .build()
        .map_err(|err| LocatorError::Transport(err.to_string()))?
        .into();

    let signable_request = SignableRequest::new(
        "GET",
        url.as_str(),
        std::iter::empty(),
        SignableBody::Bytes(&[]),
    )
    .map_err(|err| LocatorError::Transport(err.to_string()))?;

    let (instructions, _signature) = sign(signable_request, &signing_params)
        .map_err(|err| LocatorError::Transport(err.to_string()))?
        .into_parts();

    let mut builder = Request::builder()
        .method("GET")
        .uri(url.as_str())
        .header("x-api-key", &config.api_key);
    for (name, value) in instructions.headers() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::empty())
        .map_err(|err| LocatorError::Transport(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_exceeded_body_is_recognised_case_insensitively() {
        assert!(body_is_limit_exceeded(b"\"Limit Exceeded\""));
        assert!(body_is_limit_exceeded(b"limit exceeded"));
        assert!(!body_is_limit_exceeded(b"something else"));
    }

    #[test]
    fn namespace_follows_id_presence() {
        assert_eq!(namespace_for(Some(9)), Some(crate::messages::NAMESPACE_TAG));
        assert_eq!(namespace_for(None), None);
    }
}

