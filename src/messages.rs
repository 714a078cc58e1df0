//! Wire-format types for the external interfaces this crate exposes:
//! the JSON queue messages exchanged between workers, and the outbound
//! `candidate_geo_data` protobuf. Inbound source-feed protobuf decoding
//! is out of scope; callers hand this crate an already-decoded
//! [`SourceFeedRecord`].

use serde::{Deserialize, Serialize};

use crate::model::{Address, EntityType};

/// One source-feed record, already decoded from its protobuf envelope
/// by a caller-owned deserializer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceFeedRecord {
    pub candidate_id: u64,
    pub name: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub is_valid_geocode: bool,
}

/// The geocoder task message, one per `(entity, provider)` fan-out from
/// the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderTaskMessage {
    pub provider: String,
    pub entity_id: u64,
    pub entity_type: EntityType,
    pub batch_id: Option<String>,
    pub address: Address,
}

/// The consolidator task message: triggered by a store-change event on
/// any row whose provider does not start with `consolidated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatorTaskMessage {
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedOutputMeta {
    pub city: Option<String>,
    pub country_code: Option<String>,
}

/// The consolidated output record, published to a downstream stream on
/// a store-change event filtered to `provider == consolidated_<env>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedOutputMessage {
    pub entity_id: u64,
    pub entity_type: EntityType,
    pub batch_id: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub score: f64,
    pub meta: ConsolidatedOutputMeta,
}

/// `prost`-generated bindings for the outbound `candidate_geo_data`
/// protobuf message. See `proto/candidate_geo_data.proto`.
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/candidate_geo_data.rs"));
}

/// The fixed namespace tag carried alongside any non-null `*_id` field
/// on the published `candidate_geo_data` record.
pub const NAMESPACE_TAG: i32 = 200;

/// Build the `candidate_geo_data` message's `*_ns` companion for a
/// given optional id: `Some(NAMESPACE_TAG)` when the id is present,
/// `None` otherwise.
pub fn namespace_for(id: Option<i64>) -> Option<i32> {
    id.map(|_| NAMESPACE_TAG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_tag_follows_presence_of_id() {
        assert_eq!(namespace_for(Some(42)), Some(NAMESPACE_TAG));
        assert_eq!(namespace_for(None), None);
    }

    #[test]
    fn geocoder_task_message_round_trips_through_json() {
        let message = GeocoderTaskMessage {
            provider: "google".to_owned(),
            entity_id: 1,
            entity_type: EntityType::CandidateAccommodation,
            batch_id: None,
            address: Address {
                city: Some("Springfield".to_owned()),
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&message).unwrap();
        let decoded: GeocoderTaskMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.provider, "google");
        assert_eq!(decoded.address.city.as_deref(), Some("Springfield"));
    }
}
