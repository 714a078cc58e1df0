//! The transfer table: a short-lived store whose TTL eviction is the
//! signal that all geocoding and consolidation for an entity is
//! complete.
//!
//! Grounded on the `key_value_stores::KeyValueStore` trait shape
//! (get/set on an opaque blob) generalized here to carry the entity's
//! own partial record plus an explicit expiry, and on
//! `examples/original_source/src/router/consumer.py`'s 3-hour transfer
//! TTL.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::model::EntityKey;

pub const DEFAULT_TTL: Duration = Duration::from_secs(3 * 3600);

#[derive(Debug, Clone, Default)]
pub struct TransferRecord {
    pub city: Option<String>,
    pub country_code: Option<String>,
    pub batch_id: Option<String>,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct Entry {
    record: TransferRecord,
    expires_at: u64,
}

/// A process-local transfer table. Backed by a plain mutex-guarded map
/// rather than `DashMap` here: every operation already takes the lock
/// to check expiry, so a single guard is simpler than a sharded one.
pub struct TransferTable {
    ttl: Duration,
    rows: Mutex<HashMap<String, Entry>>,
}

impl Default for TransferTable {
    fn default() -> Self {
        TransferTable {
            ttl: DEFAULT_TTL,
            rows: Mutex::new(HashMap::new()),
        }
    }
}

impl TransferTable {
    pub fn new(ttl: Duration) -> TransferTable {
        TransferTable {
            ttl,
            rows: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or refresh) an entity's presence, resetting its expiry.
    pub fn register(&self, entity: &EntityKey, record: TransferRecord) {
        self.rows.lock().insert(
            entity.as_key(),
            Entry {
                record,
                expires_at: now() + self.ttl.as_secs(),
            },
        );
    }

    /// Entities whose expiry has passed, removing them from the table.
    /// Callers should treat each returned key as a "processing complete"
    /// signal and hand it to the locator.
    pub fn drain_expired(&self) -> Vec<(String, TransferRecord)> {
        let mut rows = self.rows.lock();
        let now = now();
        let expired: Vec<String> = rows
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|key| rows.remove(&key).map(|entry| (key, entry.record)))
            .collect()
    }

    pub fn contains(&self, entity: &EntityKey) -> bool {
        self.rows.lock().contains_key(&entity.as_key())
    }
}
