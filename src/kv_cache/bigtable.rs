//! Support for using BigTable as a key/value store.
//!
//! Ported from `examples/faradayio-geocode-csv/src/key_value_stores/
//! bigtable.rs`; the fake `bigtable://` URL scheme, the column family
//! layout, and the batched read/write shape are unchanged.

use std::{
    borrow::Cow,
    collections::HashMap,
    time::{Duration, Instant},
};

use anyhow::{format_err, Context};
use async_trait::async_trait;
use bigtable_rs::{
    bigtable::{self, BigTable as BigTableClient, BigTableConnection},
    google::bigtable::v2::{
        mutate_rows_request::Entry,
        mutation::{self, SetCell},
        row_filter::{Chain, Filter},
        MutateRowsRequest, Mutation, ReadRowsRequest, RowFilter, RowSet,
    },
};
use metrics::{counter, describe_histogram, histogram, Unit};
use tracing::{instrument, trace};
use url::Url;

use super::{KeyValueStore, KeyValueStoreNew, PipelinedGet, PipelinedSet};

const CACHE_FAMILY_NAME: &str = "geo_consolidate";
const CACHE_COLUMN_NAME: &[u8] = b"v";

/// Worker-pool concurrency for the BigTable client; matches the
/// default used elsewhere in this crate's worker loops.
const CONCURRENCY: usize = 4;

struct BigTableConfig {
    project_id: String,
    instance_id: String,
    table_name: String,
}

impl BigTableConfig {
    /// Parse our own fake "bigtable:" URL schema into configuration information.
    fn from_url(url: &Url) -> anyhow::Result<BigTableConfig> {
        if url.scheme() == "bigtable" {
            if let Some(domain) = url.host_str() {
                if let Some(segments) = url.path_segments() {
                    let segments = segments.collect::<Vec<_>>();
                    if segments.len() == 2 {
                        return Ok(BigTableConfig {
                            project_id: domain.to_owned(),
                            instance_id: segments[0].to_owned(),
                            table_name: segments[1].to_owned(),
                        });
                    }
                }
            }
        }

        Err(format_err!(
            "expected bigtable:// URL, found {:?}",
            url.scheme()
        ))
    }
}

pub struct BigTable {
    connection: BigTableConnection,
    table_name: String,
    key_prefix: String,
}

impl BigTable {
    fn client(&self) -> BigTableClient {
        self.connection.client()
    }
}

impl KeyValueStore for BigTable {
    fn new_pipelined_get<'store>(&'store self) -> Box<dyn PipelinedGet<'store> + 'store> {
        Box::new(BigTablePipelinedGet {
            bigtable: self,
            row_keys: vec![],
        })
    }

    fn new_pipelined_set<'store>(&'store self) -> Box<dyn PipelinedSet<'store> + 'store> {
        Box::new(BigTablePipelinedSet {
            bigtable: self,
            entries: vec![],
        })
    }

    fn key_prefix(&self) -> &str {
        &self.key_prefix
    }
}

#[async_trait]
impl KeyValueStoreNew for BigTable {
    #[instrument(level = "debug", skip_all)]
    async fn new(url: Url, key_prefix: String) -> anyhow::Result<Self> {
        describe_histogram!(
            "geo_consolidate.bigtable.get_request.duration_seconds",
            Unit::Seconds,
            "Time required for BigTable read_rows requests"
        );
        describe_histogram!(
            "geo_consolidate.bigtable.set_request.duration_seconds",
            Unit::Seconds,
            "Time required for BigTable MutateRows requests"
        );

        let config = BigTableConfig::from_url(&url)?;
        let connection = BigTableConnection::new(
            &config.project_id,
            &config.instance_id,
            /* read_only */ false,
            CONCURRENCY,
            Some(Duration::from_secs(60)),
        )
        .await
        .context("could not connect to BigTable")?;

        Ok(BigTable {
            connection,
            table_name: config.table_name,
            key_prefix,
        })
    }
}

struct BigTablePipelinedGet<'store> {
    bigtable: &'store BigTable,
    row_keys: Vec<Vec<u8>>,
}

#[async_trait]
impl<'store> PipelinedGet<'store> for BigTablePipelinedGet<'store> {
    fn add_get(&mut self, key: String) {
        trace!("bigtable: reading {}", key);
        self.row_keys.push(key.into_bytes());
    }

    #[instrument(name = "PipelinedGet::execute", level = "trace", skip_all, fields(row_keys.len = self.row_keys.len()))]
    async fn execute(&self) -> anyhow::Result<Vec<Option<Vec<u8>>>> {
        let start = Instant::now();

        let mut client = self.bigtable.client();
        let request = ReadRowsRequest {
            table_name: client.get_full_table_name(&self.bigtable.table_name),
            rows: Some(RowSet {
                row_keys: self.row_keys.to_owned(),
                row_ranges: vec![],
            }),
            filter: Some(RowFilter {
                filter: Some(Filter::Chain(Chain {
                    filters: vec![
                        RowFilter {
                            filter: Some(Filter::FamilyNameRegexFilter(
                                CACHE_FAMILY_NAME.to_owned(),
                            )),
                        },
                        RowFilter {
                            filter: Some(Filter::ColumnQualifierRegexFilter(
                                CACHE_COLUMN_NAME.to_vec(),
                            )),
                        },
                        RowFilter {
                            filter: Some(Filter::CellsPerColumnLimitFilter(1)),
                        },
                    ],
                })),
            }),
            ..ReadRowsRequest::default()
        };
        let response = match client.read_rows(request).await {
            Ok(response) => response,
            Err(err) => {
                let cause = bigtable_error_cause_for_metrics(&err);
                counter!("geo_consolidate.selected_errors.count", 1, "component" => "bigtable", "cause" => cause);
                return Err(err).context("error checking BigTable for cached values");
            }
        };

        histogram!(
            "geo_consolidate.bigtable.get_request.duration_seconds",
            (Instant::now() - start).as_secs_f64(),
        );

        let mut result: Vec<Option<Vec<u8>>> = vec![None; self.row_keys.len()];
        let mut row_key_indices = HashMap::<Vec<u8>, Vec<usize>>::new();
        for (idx, row_key) in self.row_keys.iter().enumerate() {
            row_key_indices.entry(row_key.clone()).or_default().push(idx);
        }

        for (key, data) in response {
            for row_cell in data {
                if row_cell.family_name != CACHE_FAMILY_NAME {
                    return Err(format_err!(
                        "expected column family name {:?}, found {:?}",
                        CACHE_FAMILY_NAME,
                        row_cell.family_name,
                    ));
                }
                if row_cell.qualifier != CACHE_COLUMN_NAME {
                    return Err(format_err!(
                        "expected qualifier {:?}, found {:?}",
                        CACHE_COLUMN_NAME,
                        row_cell.qualifier,
                    ));
                }

                let indices = row_key_indices
                    .get(&key)
                    .expect("we should always have a known key");
                for idx in indices {
                    result[*idx] = Some(row_cell.value.clone());
                }
            }
        }
        Ok(result)
    }
}

struct BigTablePipelinedSet<'store> {
    bigtable: &'store BigTable,
    entries: Vec<Entry>,
}

#[async_trait]
impl<'store> PipelinedSet<'store> for BigTablePipelinedSet<'store> {
    fn add_set(&mut self, key: String, value: Vec<u8>) {
        trace!("bigtable: writing {} ({} bytes)", key, value.len());
        self.entries.push(Entry {
            row_key: key.into_bytes(),
            mutations: vec![Mutation {
                mutation: Some(mutation::Mutation::SetCell(SetCell {
                    family_name: CACHE_FAMILY_NAME.to_owned(),
                    column_qualifier: CACHE_COLUMN_NAME.to_owned(),
                    timestamp_micros: -1,
                    value,
                })),
            }],
        })
    }

    #[instrument(name = "PipelinedSet::execute", level = "trace", skip_all, fields(entries.len = self.entries.len()))]
    async fn execute(&self) -> anyhow::Result<()> {
        let start = Instant::now();

        let mut client = self.bigtable.client();
        let request = MutateRowsRequest {
            table_name: client.get_full_table_name(&self.bigtable.table_name),
            app_profile_id: "".to_owned(),
            entries: self.entries.clone(),
        };
        if let Err(err) = client.mutate_rows(request).await {
            let cause = bigtable_error_cause_for_metrics(&err);
            counter!("geo_consolidate.selected_errors.count", 1, "component" => "bigtable", "cause" => cause);
            return Err(err).context("error writing cached values to BigTable");
        }

        histogram!(
            "geo_consolidate.bigtable.set_request.duration_seconds",
            (Instant::now() - start).as_secs_f64(),
        );
        Ok(())
    }
}

fn bigtable_error_cause_for_metrics(err: &bigtable::Error) -> Cow<'static, str> {
    match err {
        bigtable::Error::AccessTokenError(_) => Cow::Borrowed("access token"),
        bigtable::Error::CertificateError(_) => Cow::Borrowed("certificate"),
        bigtable::Error::IoError(err) => Cow::Owned(format!("{:?}", err.kind())),
        bigtable::Error::TransportError(_) => Cow::Borrowed("transport"),
        bigtable::Error::RowNotFound => Cow::Borrowed("row not found"),
        bigtable::Error::RowWriteFailed => Cow::Borrowed("row write failed"),
        bigtable::Error::ObjectNotFound(_) => Cow::Borrowed("object not found"),
        bigtable::Error::ObjectCorrupt(_) => Cow::Borrowed("object corrupt"),
        bigtable::Error::RpcError(_) => Cow::Borrowed("rpc"),
        bigtable::Error::TimeoutError(_) => Cow::Borrowed("timeout"),
        bigtable::Error::ChunkError(_) => Cow::Borrowed("chunk"),
        bigtable::Error::GCPAuthError(_) => Cow::Borrowed("gcp auth"),
    }
}

#[test]
fn bigtable_config_from_url() {
    let url = Url::parse("bigtable://project-123/instance-456/table-789").unwrap();
    let config = BigTableConfig::from_url(&url).unwrap();
    assert_eq!(config.project_id, "project-123");
    assert_eq!(config.instance_id, "instance-456");
    assert_eq!(config.table_name, "table-789");
}
