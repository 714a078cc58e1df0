//! Common interface to key/value stores used for caching geocoder
//! responses, keyed on address plus `provider:version`.
//!
//! Ported from `examples/faradayio-geocode-csv/src/key_value_stores/
//! mod.rs`; the pipelined get/set interface and the Redis/BigTable
//! backends are unchanged, only the key derivation and the value this
//! crate caches (a [`RawResult`]) are new.

use anyhow::format_err;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use url::Url;

use crate::model::Address;
use crate::providers::RawResult;

mod bigtable;
mod redis;

/// A key/value store, like Redis or BigTable.
///
/// We focus only on "pipelined" operations, where many requests are sent at
/// once, to minimize network round trips.
pub trait KeyValueStore: Send + Sync + 'static {
    fn new_pipelined_get<'store>(&'store self) -> Box<dyn PipelinedGet<'store> + 'store>;
    fn new_pipelined_set<'store>(&'store self) -> Box<dyn PipelinedSet<'store> + 'store>;

    /// Prefix to use for all our keys; the `key_prefix` passed to
    /// `KeyValueStore::new_from_url`.
    fn key_prefix(&self) -> &str;

    fn prefix_key(&self, key: &mut String) {
        key.insert_str(0, self.key_prefix());
    }
}

impl dyn KeyValueStore {
    pub async fn new_from_url(url: Url, key_prefix: String) -> anyhow::Result<Box<dyn KeyValueStore>> {
        match url.scheme() {
            "redis" => Ok(Box::new(redis::Redis::new(url, key_prefix).await?)),
            "bigtable" => Ok(Box::new(bigtable::BigTable::new(url, key_prefix).await?)),
            scheme => Err(format_err!("don't know how to connect to {}: URLs", scheme)),
        }
    }
}

#[async_trait]
pub trait KeyValueStoreNew: KeyValueStore + Sized {
    async fn new(url: Url, key_prefix: String) -> anyhow::Result<Self>;
}

#[async_trait]
pub trait PipelinedGet<'store>: Send + Sync {
    fn add_get(&mut self, key: String);
    async fn execute(&self) -> anyhow::Result<Vec<Option<Vec<u8>>>>;
}

#[async_trait]
pub trait PipelinedSet<'store>: Send + Sync {
    fn add_set(&mut self, key: String, value: Vec<u8>);
    async fn execute(&self) -> anyhow::Result<()>;
}

/// Derive the cache key for one `(address, provider, version)` triple.
/// Hashing the serialized address keeps the key a fixed, reasonable
/// length regardless of how long the input fields are.
pub fn cache_key(address: &Address, provider: &str, version: u32) -> String {
    let mut hasher = Sha256::new();
    let canonical =
        serde_json::to_vec(address).expect("Address serialization is infallible");
    hasher.update(&canonical);
    let digest = hasher.finalize();
    format!("{provider}:{version}:{:x}", digest)
}

/// Look up a cached response for `address` under `provider:version`. A
/// `None` means there is nothing usable in the cache; callers fall
/// through to a live geocode.
pub async fn lookup(
    store: &dyn KeyValueStore,
    address: &Address,
    provider: &str,
    version: u32,
) -> anyhow::Result<Option<RawResult>> {
    let mut get = store.new_pipelined_get();
    get.add_get(cache_key(address, provider, version));
    let mut results = get.execute().await?;
    match results.pop().flatten() {
        Some(bytes) => {
            let (result, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
            Ok(Some(result))
        }
        None => Ok(None),
    }
}

/// Write a successful response to the cache under the adapter's own
/// `version`.
pub async fn store(
    store: &dyn KeyValueStore,
    address: &Address,
    provider: &str,
    version: u32,
    result: &RawResult,
) -> anyhow::Result<()> {
    let bytes = bincode::serde::encode_to_vec(result, bincode::config::standard())?;
    let mut set = store.new_pipelined_set();
    set.add_set(cache_key(address, provider, version), bytes);
    set.execute().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_changes_with_any_component() {
        let address = Address {
            city: Some("Springfield".to_owned()),
            ..Default::default()
        };
        let base = cache_key(&address, "google", 1);
        assert_ne!(base, cache_key(&address, "bing", 1));
        assert_ne!(base, cache_key(&address, "google", 2));

        let other_address = Address {
            city: Some("Shelbyville".to_owned()),
            ..Default::default()
        };
        assert_ne!(base, cache_key(&other_address, "google", 1));
    }
}
