//! The single structured status line every task must emit.

use tracing::info;

use crate::model::EntityType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NoResults,
    Cache,
    Reschedule,
    QuotaExhausted,
}

impl Status {
    fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::NoResults => "NO RESULTS",
            Status::Cache => "CACHE",
            Status::Reschedule => "RESCHEDULE",
            Status::QuotaExhausted => "QUOTA EXHAUSTED",
        }
    }
}

/// Emit the one-per-task status line. `status_code` is only meaningful
/// for error statuses; pass 0 for `OK`/`CACHE`.
pub fn log_status(
    status: Status,
    status_code: i32,
    entity_type: EntityType,
    entity_id: u64,
    provider: &str,
    batch_id: Option<&str>,
) {
    info!(
        status = status.as_str(),
        status_code,
        entity_type = %entity_type,
        entity_id,
        provider,
        batch_id,
        "task status"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_spec_vocabulary() {
        assert_eq!(Status::Ok.as_str(), "OK");
        assert_eq!(Status::NoResults.as_str(), "NO RESULTS");
        assert_eq!(Status::QuotaExhausted.as_str(), "QUOTA EXHAUSTED");
    }
}
