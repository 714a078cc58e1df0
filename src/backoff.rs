//! Shared full-jitter exponential backoff.
//!
//! Ported from the original `back_off_and_jitter` decorator
//! (`geocode/providers/base.py`): sleep `U(0, min(cap, base * 2^attempt))`
//! before each retry. `examples/faradayio-geocode-csv/src/pipeline.rs`'s
//! `geocode_chunk` retry loop doubles a fixed delay with no jitter and no
//! cap; this keeps that loop's *shape* (counted attempts, sleep, retry)
//! but follows the full-jitter formula instead, since jitter smooths
//! thundering-herd retries across many concurrent tasks hitting the same
//! provider.

use rand::Rng;
use std::time::Duration;

/// `U(0, min(cap, base * 2^attempt))`, in seconds. `attempt` is 0-based
/// (the delay before the first retry uses `attempt = 0`).
pub fn jittered_delay(base: f64, cap: f64, attempt: u32) -> Duration {
    let ceiling = (base * 2f64.powi(attempt as i32)).min(cap);
    let seconds = rand::thread_rng().gen_range(0.0..=ceiling);
    Duration::from_secs_f64(seconds)
}

/// Run `f` up to `max_retries + 1` times, sleeping a jittered backoff
/// between attempts. `should_retry` decides, from the error, whether
/// another attempt is worth making; the final attempt's error (or the
/// first non-retryable error) is returned to the caller.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    base: f64,
    cap: f64,
    max_retries: u32,
    mut f: F,
    should_retry: R,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_retries && should_retry(&err) => {
                let delay = jittered_delay(base, cap, attempt);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_delay_never_exceeds_cap() {
        for attempt in 0..10 {
            let delay = jittered_delay(1.0, 60.0, attempt);
            assert!(delay.as_secs_f64() <= 60.0);
        }
    }

    #[test]
    fn jittered_delay_respects_exponential_ceiling_before_cap() {
        // base=1, attempt=2 => ceiling = 4, well under the cap of 60.
        for _ in 0..50 {
            let delay = jittered_delay(1.0, 60.0, 2);
            assert!(delay.as_secs_f64() <= 4.0);
        }
    }

    #[tokio::test]
    async fn retry_with_backoff_gives_up_after_max_retries() {
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(
            0.001,
            0.01,
            2,
            |_attempt| {
                calls += 1;
                async move { Err("boom") }
            },
            |_| true,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn retry_with_backoff_stops_on_non_retryable_error() {
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(
            0.001,
            0.01,
            5,
            |_attempt| {
                calls += 1;
                async move { Err("fatal") }
            },
            |_| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
