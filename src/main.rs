#![recursion_limit = "128"]

use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics::describe_counter;
use serde_json::Value;
use tracing::{debug, info, info_span, warn};
use tracing_subscriber::{
    fmt::{format::FmtSpan, Subscriber},
    prelude::*,
    EnvFilter,
};

mod backoff;
mod consolidator;
mod country_mapper;
mod decimal;
mod dispatcher;
mod errors;
mod fallback;
mod key_vault;
mod kv_cache;
mod locator;
mod messages;
mod model;
mod providers;
mod router;
mod ruleset;
mod similarity;
mod status;
mod store;
mod transfer_table;

use crate::consolidator::Cascade;
use crate::country_mapper::{CountryCodeRow, CountryMapper};
use crate::dispatcher::{dispatch, ExhaustedMap};
use crate::errors::display_causes_and_backtrace;
use crate::fallback::{CityFallback, Destination};
use crate::key_vault::{Credential, KeyVault};
use crate::messages::{
    ConsolidatedOutputMessage, ConsolidatedOutputMeta, ConsolidatorTaskMessage,
    GeocoderTaskMessage, SourceFeedRecord,
};
use crate::model::provider;
use crate::providers::rest::{shared_http_client, HttpsClient};
use crate::providers::{GeocodeRequest, GeocoderAdapter};
use crate::ruleset::Ruleset;
use crate::store::{CandidateStore, InMemoryCandidateStore};
use crate::transfer_table::TransferTable;

/// Process-wide settings, loaded from this deployment's environment
/// variables. Grouped into one struct instead of scattered `env::var`
/// calls so every worker subcommand sees the same values.
#[derive(Debug, Clone)]
struct Config {
    environment: String,
    data_dir: PathBuf,
    geocoder_ruleset_version: String,
    partner_ruleset_version: String,
    geocoder_api_keys: HashMap<String, Vec<String>>,
    api_id: String,
    api_key: String,
    aws_region: String,
}

impl Config {
    fn from_env() -> Result<Config> {
        Ok(Config {
            environment: required_env("ENVIRONMENT")?,
            data_dir: PathBuf::from(
                std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_owned()),
            ),
            geocoder_ruleset_version: required_env("GEOCODER_RULESET_VERSION")?,
            partner_ruleset_version: required_env("PARTNER_RULESET_VERSION")?,
            geocoder_api_keys: serde_json::from_str(&required_env("GEOCODER_API_KEYS")?)
                .context("GEOCODER_API_KEYS must be a JSON object of provider -> [keys]")?,
            api_id: required_env("API_ID")?,
            api_key: required_env("API_KEY")?,
            aws_region: required_env("AWS_REGION")?,
        })
    }
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("missing required environment variable {name}"))
}

/// One pipeline worker stage per subcommand. Each reads newline-delimited
/// JSON from standard input and writes its output as newline-delimited
/// JSON to standard output. The cloud-provider queue/stream/table
/// plumbing a real deployment would use instead is out of scope here;
/// stdio stands in for it, the way this crate's ancestor used stdio for
/// CSV rows.
#[derive(Debug, Parser)]
#[command(author, version, about = "geocoding-candidate consolidation pipeline")]
struct Opt {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Classify source-feed records as trusted or needing geocoding.
    /// Reads `SourceFeedRecord` lines, writes `GeocoderTaskMessage`
    /// lines.
    Route,

    /// Run one provider geocode per task, with retry/rotation/quota
    /// tracking. Reads `GeocoderTaskMessage` lines, writes a
    /// `ConsolidatorTaskMessage` line for every candidate row written.
    Dispatch,

    /// Run the ruleset/fallback cascade for an entity. Reads
    /// `ConsolidatorTaskMessage` lines, writes a `ConsolidatedOutputMessage`
    /// line for every new winner.
    Consolidate,

    /// Enrich a winning coordinate with locality identifiers. Reads
    /// `ConsolidatedOutputMessage` lines, writes the `candidate_geo_data`
    /// record (as a JSON line) for every lookup that found something.
    Locate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env();
    Subscriber::builder()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_env_filter(filter)
        .finish()
        .init();
    let _span = info_span!("geo-consolidate").entered();
    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    describe_counter!(
        "geo_consolidate.selected_errors.count",
        "Particularly interesting errors, by component and cause"
    );

    let opt = Opt::parse();
    if let Err(err) = run(opt).await {
        display_causes_and_backtrace(&err);
        return Err(err);
    }
    Ok(())
}

async fn run(opt: Opt) -> Result<()> {
    let config = Config::from_env()?;
    match opt.cmd {
        Command::Route => run_route(&config).await,
        Command::Dispatch => run_dispatch(&config).await,
        Command::Consolidate => run_consolidate(&config).await,
        Command::Locate => run_locate(&config).await,
    }
}

fn load_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("could not parse {}", path.display()))
}

fn load_country_mapper(config: &Config) -> Result<CountryMapper> {
    let rows: Vec<CountryCodeRow> = load_json(&config.data_dir.join("country_codes.json"))?;
    Ok(CountryMapper::new(rows))
}

fn load_city_fallback(config: &Config) -> Result<CityFallback> {
    let rows: Vec<Destination> = load_json(&config.data_dir.join("destinations.json"))?;
    Ok(CityFallback::new(rows))
}

fn load_ruleset(config: &Config, name: &str, version: &str) -> Result<Ruleset> {
    load_json(&config.data_dir.join(format!("{name}-ruleset-{version}.json")))
}

/// Build a vault from `GEOCODER_API_KEYS`, wrapping every provider's raw
/// key strings under a uniform `api_key` credential field regardless of
/// what that provider calls it natively -- the vault has no notion of
/// per-provider credential shape, only opaque maps.
fn load_key_vault(config: &Config) -> KeyVault {
    let mut credentials: HashMap<String, Vec<Credential>> = config
        .geocoder_api_keys
        .iter()
        .map(|(provider, keys)| {
            let creds = keys
                .iter()
                .map(|key| {
                    let mut c = Credential::new();
                    c.insert("api_key".to_owned(), Value::String(key.clone()));
                    c
                })
                .collect();
            (provider.clone(), creds)
        })
        .collect();
    credentials
        .entry("osm".to_owned())
        .or_insert_with(|| vec![Credential::new()]);
    KeyVault::new(credentials)
}

/// Build the adapter for one task. Every adapter but OSM's takes a
/// single string credential, which we look up under `api_key` no matter
/// what the provider calls it natively (access token, app key,
/// username...).
fn build_adapter(
    provider_name: &str,
    client: &HttpsClient,
    credential: &Credential,
) -> Result<Box<dyn GeocoderAdapter>> {
    let api_key = || -> Result<String> {
        match credential.get("api_key").and_then(Value::as_str) {
            Some(key) => Ok(key.to_owned()),
            None => anyhow::bail!("missing api_key credential for provider {provider_name}"),
        }
    };
    Ok(match provider_name {
        "google" => Box::new(providers::google::Google::new(client.clone(), api_key()?)),
        "google_places" => Box::new(providers::google_places::GooglePlaces::new(
            client.clone(),
            api_key()?,
        )),
        "bing" => Box::new(providers::bing::Bing::new(client.clone(), api_key()?)),
        "here" => Box::new(providers::here::Here::new(client.clone(), api_key()?)),
        "osm" => Box::new(providers::osm::Osm::new(client.clone())),
        "tomtom" => Box::new(providers::tomtom::TomTom::new(client.clone(), api_key()?)),
        "mapbox" => Box::new(providers::mapbox::Mapbox::new(client.clone(), api_key()?)),
        "mapquest" => Box::new(providers::mapquest::MapQuest::new(client.clone(), api_key()?)),
        "arcgis" => Box::new(providers::arcgis::ArcGis::new(client.clone(), api_key()?)),
        "baidu" => Box::new(providers::baidu::Baidu::new(client.clone(), api_key()?)),
        "geonames" => Box::new(providers::geonames::GeoNames::new(client.clone(), api_key()?)),
        other => anyhow::bail!("unknown geocoder provider {other}"),
    })
}

/// Read newline-delimited JSON values from standard input until EOF,
/// skipping blank lines.
fn read_stdin_lines<T: serde::de::DeserializeOwned>() -> Result<Vec<T>> {
    std::io::stdin()
        .lock()
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .map(|line| {
            let line = line?;
            serde_json::from_str(&line).with_context(|| format!("could not parse line: {line}"))
        })
        .collect()
}

fn write_stdout_line<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

async fn run_route(config: &Config) -> Result<()> {
    let country_mapper = load_country_mapper(config)?;
    let transfer_table = TransferTable::default();
    let store = InMemoryCandidateStore::new();

    for record in read_stdin_lines::<SourceFeedRecord>()? {
        let outcome = router::route(
            &record,
            &config.environment,
            &country_mapper,
            &transfer_table,
            &store,
        )
        .await?;
        for task in outcome.geocoder_tasks {
            write_stdout_line(&task)?;
        }
    }
    Ok(())
}

async fn run_dispatch(config: &Config) -> Result<()> {
    let client = shared_http_client();
    let key_vault = load_key_vault(config);
    let exhausted = ExhaustedMap::new();
    let store = InMemoryCandidateStore::new();

    for task in read_stdin_lines::<GeocoderTaskMessage>()? {
        let request = GeocodeRequest {
            entity: model::EntityKey::new(task.entity_type, task.entity_id),
            address: task.address.clone(),
            batch_id: task.batch_id.clone(),
        };
        let provider_name = task.provider.clone();
        let outcome = dispatch(&provider_name, &request, &key_vault, &exhausted, |credential| {
            build_adapter(&provider_name, &client, &credential)
                .unwrap_or_else(|err| panic!("could not build {provider_name} adapter: {err}"))
        })
        .await;

        match outcome {
            Ok(candidate) => {
                store.upsert(candidate).await?;
                write_stdout_line(&ConsolidatorTaskMessage {
                    entity_type: task.entity_type,
                    entity_id: task.entity_id,
                    batch_id: task.batch_id,
                })?;
            }
            Err(err) => {
                warn!(provider = %task.provider, entity_id = task.entity_id, "{}", err);
            }
        }
    }
    Ok(())
}

async fn run_consolidate(config: &Config) -> Result<()> {
    let geocoder_ruleset = load_ruleset(config, "geocoder", &config.geocoder_ruleset_version)?;
    let partner_ruleset = load_ruleset(config, "partner", &config.partner_ruleset_version)?;
    let city_fallback = load_city_fallback(config)?;
    let store = InMemoryCandidateStore::new();
    let cascade = Cascade {
        geocoder_ruleset: &geocoder_ruleset,
        partner_ruleset: &partner_ruleset,
        city_fallback: &city_fallback,
        item_fallback_provider: Some(provider::TRIVAGO),
    };

    for task in read_stdin_lines::<ConsolidatorTaskMessage>()? {
        let entity = model::EntityKey::new(task.entity_type, task.entity_id);
        let candidates = store.get_all_by_entity(&entity).await?;

        let Some(winner) =
            consolidator::consolidate(&entity, &candidates, &cascade, &config.environment)
        else {
            continue;
        };
        let (Some(longitude), Some(latitude)) = (&winner.longitude, &winner.latitude) else {
            store.upsert(winner).await?;
            continue;
        };
        let longitude = longitude.as_f64()?;
        let latitude = latitude.as_f64()?;
        let message = ConsolidatedOutputMessage {
            entity_id: winner.entity_id,
            entity_type: winner.entity_type,
            batch_id: winner.batch_id.clone(),
            longitude,
            latitude,
            score: winner.score.unwrap_or(0.0),
            meta: ConsolidatedOutputMeta {
                city: winner.city.clone(),
                country_code: winner.country_code.clone(),
            },
        };
        store.upsert(winner).await?;
        write_stdout_line(&message)?;
    }
    Ok(())
}

async fn run_locate(config: &Config) -> Result<()> {
    let client = shared_http_client();
    let endpoint = required_env("LOCALITY_SERVICE_URL")?;
    let locator_config = locator::LocatorConfig {
        api_id: config.api_id.clone(),
        api_key: config.api_key.clone(),
        region: config.aws_region.clone(),
        endpoint: endpoint
            .parse()
            .context("LOCALITY_SERVICE_URL must be a URL")?,
    };
    let timeout = std::time::Duration::from_secs(30);

    for message in read_stdin_lines::<ConsolidatedOutputMessage>()? {
        let outcome = locator::locate(
            &client,
            &locator_config,
            message.longitude,
            message.latitude,
            message.meta.city.as_deref(),
            timeout,
        )
        .await?;

        match outcome {
            locator::LocatorOutcome::Found(result) => {
                let record = ProtoRecord {
                    candidate_id: message.entity_id,
                    longitude: message.longitude,
                    latitude: message.latitude,
                    locality_id: result.locality_id,
                    locality_ns: result.locality_ns,
                    administrative_division_id: result.administrative_division_id,
                    administrative_division_ns: result.administrative_division_ns,
                    country_id: result.country_id,
                    country_ns: result.country_ns,
                    valid_geo_point: true,
                };
                write_stdout_line(&record)?;
            }
            locator::LocatorOutcome::Skipped => {
                info!(entity_id = message.entity_id, "locator: nothing to enrich");
            }
            locator::LocatorOutcome::Aborted => {
                warn!(
                    entity_id = message.entity_id,
                    "locator: quota limit exceeded, abandoning task"
                );
            }
        }
    }
    Ok(())
}

/// Field-for-field mirror of the `candidate_geo_data` protobuf message
/// (`messages::proto::CandidateGeoData`), which doesn't derive
/// `serde::Serialize`. Used only to print the locator's result as a
/// JSON line on stdout; a real deployment would publish the protobuf
/// itself to the downstream stream instead.
#[derive(Debug, serde::Serialize)]
struct ProtoRecord {
    candidate_id: u64,
    longitude: f64,
    latitude: f64,
    locality_id: Option<i64>,
    locality_ns: Option<i32>,
    administrative_division_id: Option<i64>,
    administrative_division_ns: Option<i32>,
    country_id: Option<i64>,
    country_ns: Option<i32>,
    valid_geo_point: bool,
}
