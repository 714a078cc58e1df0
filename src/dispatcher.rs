//! Geocoder dispatcher: retry/back-off, key rotation, and process-wide
//! quota disabling layered around a single adapter call.
//!
//! Ported from `examples/original_source/src/geocode/providers/base.py`'s
//! `Geocoder.geocoder_process` (the quota-disable check at the top of
//! every task, the key-rotation loop, the throttle-to-exhaustion
//! promotion) plus the `back_off_and_jitter` decorator, already carried
//! into [`crate::backoff`].

use dashmap::DashMap;

use crate::backoff::retry_with_backoff;
use crate::errors::GeocodeError;
use crate::key_vault::{Credential, KeyVault};
use crate::model::Candidate;
use crate::providers::{geocode_with_shedding, GeocodeRequest, GeocoderAdapter};
use crate::status::{log_status, Status};

const BACKOFF_CAP: f64 = 60.0;

/// Provider name -> epoch at which its quota is expected to reset.
/// Shared across every dispatcher call in the process, guarded
/// internally by `DashMap`'s own sharded locking rather than a single
/// coarse mutex.
pub type ExhaustedMap = DashMap<String, i64>;

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Runs one provider task to completion. `make_adapter` builds a fresh
/// adapter bound to the given credential; it's called once per key
/// rotation, since an adapter's HTTP client and key are immutable once
/// constructed.
pub async fn dispatch<F>(
    provider: &str,
    request: &GeocodeRequest,
    key_vault: &KeyVault,
    exhausted: &ExhaustedMap,
    make_adapter: F,
) -> Result<Candidate, GeocodeError>
where
    F: Fn(Credential) -> Box<dyn GeocoderAdapter>,
{
    if let Some(reset_epoch) = exhausted.get(provider).map(|entry| *entry) {
        if now() < reset_epoch {
            log_status(
                Status::QuotaExhausted,
                GeocodeError::QuotaExhausted {
                    provider: provider.to_owned(),
                }
                .status_code(),
                request.entity.entity_type,
                request.entity.entity_id,
                provider,
                request.batch_id.as_deref(),
            );
            return Err(GeocodeError::QuotaExhausted {
                provider: provider.to_owned(),
            });
        }
        exhausted.remove(provider);
    }

    let mut used = 0usize;
    let result = loop {
        let credential = match key_vault.current(provider) {
            Ok(credential) => credential,
            Err(err) => {
                break Err(GeocodeError::FailedRequest {
                    provider: provider.to_owned(),
                    detail: err.to_string(),
                })
            }
        };
        let adapter = make_adapter(credential);

        let outcome = retry_with_backoff(
            adapter.initial_backoff(),
            BACKOFF_CAP,
            adapter.nr_of_retries(),
            |_attempt| geocode_with_shedding(adapter.as_ref(), request),
            |err| {
                matches!(
                    err,
                    GeocodeError::FailedRequest { .. } | GeocodeError::RateLimitExceeded { .. }
                )
            },
        )
        .await;

        let outcome = match outcome {
            Err(GeocodeError::RateLimitExceeded { provider })
                if adapter.quota_exceed_on_throttle() =>
            {
                Err(GeocodeError::QuotaExhausted { provider })
            }
            other => other,
        };

        match outcome {
            Err(GeocodeError::QuotaExhausted { .. }) => {
                used += 1;
                if key_vault.count(provider) > used {
                    if key_vault.rotate(provider).is_err() {
                        break outcome;
                    }
                    continue;
                }
                exhausted.insert(provider.to_owned(), adapter.quota_reset_epoch());
                break outcome;
            }
            other => break other,
        }
    };

    let status = match &result {
        Ok(_) => Status::Ok,
        Err(GeocodeError::NoResultsFound { .. }) => Status::NoResults,
        Err(GeocodeError::QuotaExhausted { .. }) => Status::QuotaExhausted,
        Err(_) => Status::Reschedule,
    };
    let status_code = result.as_ref().err().map(GeocodeError::status_code).unwrap_or(0);
    log_status(
        status,
        status_code,
        request.entity.entity_type,
        request.entity.entity_id,
        provider,
        request.batch_id.as_deref(),
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, EntityKey, EntityType};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingAdapter {
        calls: Arc<AtomicUsize>,
        throttle_then_ok: bool,
        quota_exceed_on_throttle: bool,
    }

    #[async_trait]
    impl GeocoderAdapter for CountingAdapter {
        fn name(&self) -> &str {
            "stub"
        }
        fn version(&self) -> u32 {
            1
        }
        fn default_ttl(&self) -> Option<i64> {
            None
        }
        fn required_fields(&self) -> &[&'static str] {
            &[]
        }
        fn priority_fields(&self) -> &[&'static str] {
            &[]
        }
        fn nr_of_retries(&self) -> u32 {
            1
        }
        fn initial_backoff(&self) -> f64 {
            0.001
        }
        fn quota_exceed_on_throttle(&self) -> bool {
            self.quota_exceed_on_throttle
        }
        async fn raw_geocode(
            &self,
            _projected: &Address,
        ) -> Result<Vec<crate::providers::RawResult>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.throttle_then_ok {
                Err(GeocodeError::RateLimitExceeded {
                    provider: "stub".to_owned(),
                })
            } else {
                Ok(vec![crate::providers::RawResult {
                    longitude: 1.0,
                    latitude: 2.0,
                    raw: serde_json::json!({}),
                }])
            }
        }
        fn parse_returned_address(&self, _raw: &crate::providers::RawResult) -> Address {
            Address::default()
        }
    }

    fn credential(tag: &str) -> Credential {
        let mut c = Credential::new();
        c.insert("api_key".to_owned(), serde_json::json!(tag));
        c
    }

    fn request() -> GeocodeRequest {
        GeocodeRequest {
            entity: EntityKey::new(EntityType::Accommodation, 1),
            address: Address::default(),
            batch_id: None,
        }
    }

    #[tokio::test]
    async fn fails_fast_when_provider_still_exhausted() {
        let vault = KeyVault::new(HashMap::from([("stub".to_owned(), vec![credential("a")])]));
        let exhausted = ExhaustedMap::new();
        exhausted.insert("stub".to_owned(), now() + 3600);
        let calls = Arc::new(AtomicUsize::new(0));
        let result = dispatch("stub", &request(), &vault, &exhausted, |_| {
            Box::new(CountingAdapter {
                calls: calls.clone(),
                throttle_then_ok: false,
                quota_exceed_on_throttle: false,
            })
        })
        .await;
        assert!(matches!(result, Err(GeocodeError::QuotaExhausted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reenables_provider_once_reset_epoch_has_passed() {
        let vault = KeyVault::new(HashMap::from([("stub".to_owned(), vec![credential("a")])]));
        let exhausted = ExhaustedMap::new();
        exhausted.insert("stub".to_owned(), now() - 10);
        let calls = Arc::new(AtomicUsize::new(0));
        let result = dispatch("stub", &request(), &vault, &exhausted, |_| {
            Box::new(CountingAdapter {
                calls: calls.clone(),
                throttle_then_ok: false,
                quota_exceed_on_throttle: false,
            })
        })
        .await;
        assert!(result.is_ok());
        assert!(exhausted.get("stub").is_none());
    }

    #[tokio::test]
    async fn rotates_key_then_exhausts_quota_after_last_key() {
        let vault = KeyVault::new(HashMap::from([(
            "stub".to_owned(),
            vec![credential("a"), credential("b")],
        )]));
        let exhausted = ExhaustedMap::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let result = dispatch("stub", &request(), &vault, &exhausted, |_| {
            Box::new(CountingAdapter {
                calls: calls.clone(),
                throttle_then_ok: true,
                quota_exceed_on_throttle: true,
            })
        })
        .await;
        assert!(matches!(result, Err(GeocodeError::QuotaExhausted { .. })));
        assert!(exhausted.get("stub").is_some());
        // Each key gets nr_of_retries(1)+1 = 2 calls; two keys => 4 calls total.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
