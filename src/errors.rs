//! Error-handling utilities, plus the geocoding error taxonomy.

use anyhow::Error;
use thiserror::Error as ThisError;

/// Display an error, plus all the underlying "causes" (ie, wrapped errors), plus a
/// backtrace.
pub(crate) fn display_causes_and_backtrace(err: &Error) {
    eprintln!("Error: {}", err);
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {}", cause);
    }
    eprintln!("{}", err.backtrace());
}

/// The five kinds of failure a provider adapter or the dispatcher can
/// surface. The dispatcher matches on these variants to decide whether to
/// retry, rotate keys, or disable a provider, so this has to be a typed
/// enum rather than an opaque `anyhow::Error`.
#[derive(Debug, ThisError, Clone, PartialEq)]
pub enum GeocodeError {
    /// A daily/global quota has been exhausted. The provider should be
    /// disabled until `reset_epoch`.
    #[error("quota exhausted for provider {provider}")]
    QuotaExhausted { provider: String },

    /// Per-second throttling. Back off and retry; on the final retry this
    /// may be promoted to `QuotaExhausted` if the adapter opts in.
    #[error("rate limit exceeded for provider {provider}")]
    RateLimitExceeded { provider: String },

    /// A provider-side 5xx or otherwise-unrecognized failure.
    #[error("request to {provider} failed: {detail}")]
    FailedRequest { provider: String, detail: String },

    /// A client-side 400: the request itself is malformed for this
    /// provider. Not retried.
    #[error("invalid request to {provider}: {detail}")]
    InvalidRequest { provider: String, detail: String },

    /// An empty or malformed success response. Triggers iterative field
    /// shedding; once all priority fields are shed this becomes terminal.
    #[error("no results found from {provider}")]
    NoResultsFound { provider: String },
}

impl GeocodeError {
    pub fn provider(&self) -> &str {
        match self {
            GeocodeError::QuotaExhausted { provider }
            | GeocodeError::RateLimitExceeded { provider }
            | GeocodeError::FailedRequest { provider, .. }
            | GeocodeError::InvalidRequest { provider, .. }
            | GeocodeError::NoResultsFound { provider } => provider,
        }
    }

    /// The integer status code used in the single structured status log
    /// line emitted per task.
    pub fn status_code(&self) -> i32 {
        match self {
            GeocodeError::QuotaExhausted { .. } => 1,
            GeocodeError::RateLimitExceeded { .. } => 2,
            GeocodeError::FailedRequest { .. } => 3,
            GeocodeError::InvalidRequest { .. } => 4,
            GeocodeError::NoResultsFound { .. } => 5,
        }
    }
}
