//! Shared HTTP mechanics for "simple JSON REST" provider adapters.
//!
//! Grounded on `examples/faradayio-geocode-csv/src/geocoders/smarty/
//! client.rs`: build a request with `hyper`, accumulate the response body
//! via `StreamExt`, record metrics on both transport and remote errors,
//! and hand the caller a parsed JSON body plus status code. Each provider
//! module supplies only its URL, query parameters, and status-code
//! mapping; the request/response plumbing lives here once.

use std::collections::HashMap;

use futures::StreamExt;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Request};
use hyper_rustls::HttpsConnector;
use metrics::counter;
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::errors::GeocodeError;

pub type HttpsClient = Client<HttpsConnector<HttpConnector>>;

pub fn shared_http_client() -> HttpsClient {
    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_only()
        .enable_http2()
        .build();
    Client::builder().build(connector)
}

/// Perform a single `GET` against `base_url` with `params` as the query
/// string, returning the parsed JSON body and the HTTP status code. A
/// transport-level failure (connection refused, TLS error, etc.) is
/// reported as `FailedRequest`; the caller is expected to translate the
/// returned status code into the right taxonomy variant, since that
/// mapping is provider-specific.
#[instrument(level = "debug", skip(client, params), fields(provider))]
pub async fn get_json(
    client: &HttpsClient,
    provider: &str,
    base_url: &str,
    params: &HashMap<&str, String>,
) -> Result<(u16, Value), GeocodeError> {
    let mut url = Url::parse(base_url).map_err(|err| GeocodeError::InvalidRequest {
        provider: provider.to_owned(),
        detail: err.to_string(),
    })?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in params {
            query.append_pair(key, value);
        }
    }

    let request = Request::builder()
        .method("GET")
        .uri(url.as_str())
        .body(Body::empty())
        .map_err(|err| GeocodeError::InvalidRequest {
            provider: provider.to_owned(),
            detail: err.to_string(),
        })?;

    let response = client.request(request).await.map_err(|err| {
        counter!("geoconsolidate.provider_http.errors", 1, "provider" => provider.to_owned(), "cause" => "transport");
        GeocodeError::FailedRequest {
            provider: provider.to_owned(),
            detail: err.to_string(),
        }
    })?;

    let status = response.status().as_u16();
    let mut body = response.into_body();
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| {
            counter!("geoconsolidate.provider_http.errors", 1, "provider" => provider.to_owned(), "cause" => "body");
            GeocodeError::FailedRequest {
                provider: provider.to_owned(),
                detail: err.to_string(),
            }
        })?;
        bytes.extend_from_slice(&chunk);
    }

    let parsed: Value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    if status >= 400 {
        counter!("geoconsolidate.provider_http.errors", 1, "provider" => provider.to_owned(), "cause" => "remote_status");
    }

    Ok((status, parsed))
}
