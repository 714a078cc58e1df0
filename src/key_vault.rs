//! Per-provider rotating API-key pool.
//!
//! Grounded on `original_source/src/geocode/credentials.py`'s
//! `KeyHandler`, which keeps an `itertools.cycle` per provider. Rust has
//! no lazy infinite iterator we can mutate-in-place like that cheaply
//! here, so we keep an explicit index into a `Vec` instead; the
//! observable rotation behavior (cyclic, idempotent when only one
//! credential exists) is identical.

use std::collections::HashMap;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use serde_json::Value;

/// An opaque, provider-defined credential: a map of named fields (e.g.
/// `{"api_key": "..."}` or `{"client_id": "...", "client_secret": "..."}`).
pub type Credential = HashMap<String, Value>;

struct ProviderKeys {
    credentials: Vec<Credential>,
    active: usize,
}

/// A process-local singleton, constructed once at worker startup and
/// guarded by a mutex rather than exposed as global mutable state.
pub struct KeyVault {
    providers: Mutex<HashMap<String, ProviderKeys>>,
}

impl KeyVault {
    /// Build a vault from `GEOCODER_API_KEYS`-shaped data: a map from
    /// provider name to an ordered list of credential maps. The first
    /// credential in each list starts out active.
    pub fn new(credentials_by_provider: HashMap<String, Vec<Credential>>) -> KeyVault {
        let providers = credentials_by_provider
            .into_iter()
            .map(|(provider, credentials)| {
                (
                    provider,
                    ProviderKeys {
                        credentials,
                        active: 0,
                    },
                )
            })
            .collect();
        KeyVault {
            providers: Mutex::new(providers),
        }
    }

    /// The credential most recently made active for `provider`.
    pub fn current(&self, provider: &str) -> Result<Credential> {
        let providers = self.providers.lock();
        match providers.get(provider) {
            Some(keys) if !keys.credentials.is_empty() => Ok(keys.credentials[keys.active].clone()),
            _ => bail!("unknown-provider: {}", provider),
        }
    }

    /// Advance to the next credential in cyclic order. Idempotent (a
    /// no-op observably) when only one credential is configured.
    pub fn rotate(&self, provider: &str) -> Result<()> {
        let mut providers = self.providers.lock();
        match providers.get_mut(provider) {
            Some(keys) if !keys.credentials.is_empty() => {
                keys.active = (keys.active + 1) % keys.credentials.len();
                Ok(())
            }
            _ => bail!("unknown-provider: {}", provider),
        }
    }

    pub fn count(&self, provider: &str) -> usize {
        self.providers
            .lock()
            .get(provider)
            .map(|keys| keys.credentials.len())
            .unwrap_or(0)
    }
}
