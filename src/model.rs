//! The candidate data model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{Display, EnumString};

use crate::decimal::Decimal;

/// What kind of thing an entity is. Modeled as a tag rather than a class
/// hierarchy: the original source distinguishes `Accommodation`,
/// `CandidateAccommodation`, and `ReferenceAccommodation` purely by an
/// `entity_type` string, with no behavioral difference between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Accommodation,
    CandidateAccommodation,
    ReferenceAccommodation,
    PointOfInterest,
    Destination,
}

/// The composite key identifying an entity across every candidate row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub entity_id: u64,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, entity_id: u64) -> Self {
        EntityKey {
            entity_type,
            entity_id,
        }
    }

    /// `"{entity_type}:{entity_id}"`, the `entity` composite key used
    /// throughout the store, queues, and logs.
    pub fn as_key(&self) -> String {
        format!("{}:{}", self.entity_type, self.entity_id)
    }
}

/// A provider is either one of the known external geocoders, or one of a
/// handful of synthetic pseudo-providers produced internally.
pub mod provider {
    pub const TRIVAGO: &str = "trivago";
    pub const CITY_POLYGONS: &str = "city_polygons";

    /// The provider name written for a consolidated winner row. This
    /// crate unifies the emission side and the detection side on this
    /// single spelling (the original source had the two sides disagree
    /// -- `consolidated_` on write, `consolidator_` on read -- which
    /// meant the monotonic-score guard never fired).
    pub fn consolidated(environment: &str) -> String {
        format!("consolidated_{}", environment)
    }

    /// True for any provider name that marks a previously-written
    /// consolidation winner, i.e. a row the consolidator must exclude
    /// from its own inputs (no self-selection).
    pub fn is_consolidation_marker(provider: &str, environment: &str) -> bool {
        provider == consolidated(environment)
    }

    pub const DEFAULT_GEOCODER_PROVIDERS: &[&str] = &["google", "osm", "arcgis", "tomtom"];
}

/// A free-text address, as supplied by a feed or as parsed out of a
/// provider's response. All fields are optional: a partial address is a
/// perfectly normal intermediate state (e.g. after field shedding).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Address {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub house_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    /// Present only when the source record carried both a longitude and
    /// a latitude (ported from `entity.py`'s `address` property, which
    /// only adds `guess` when both are non-null).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guess: Option<Guess>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Guess {
    pub longitude: f64,
    pub latitude: f64,
}

impl Address {
    /// Returns this address as an ordered list of `(field_name, value)`
    /// pairs, excluding `guess`, for use by the field-shedding and
    /// scoring logic in the provider adapters.
    pub fn present_fields(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        macro_rules! push {
            ($name:literal, $field:expr) => {
                if let Some(v) = &$field {
                    out.push(($name, v.clone()));
                }
            };
        }
        push!("street", self.street);
        push!("house_number", self.house_number);
        push!("name", self.name);
        push!("district", self.district);
        push!("city", self.city);
        push!("region", self.region);
        push!("postal_code", self.postal_code);
        push!("country", self.country);
        push!("country_code", self.country_code);
        out
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        match field {
            "street" => self.street.as_deref(),
            "house_number" => self.house_number.as_deref(),
            "name" => self.name.as_deref(),
            "district" => self.district.as_deref(),
            "city" => self.city.as_deref(),
            "region" => self.region.as_deref(),
            "postal_code" => self.postal_code.as_deref(),
            "country" => self.country.as_deref(),
            "country_code" => self.country_code.as_deref(),
            _ => None,
        }
    }

    pub fn without(&self, field: &str) -> Address {
        let mut copy = self.clone();
        match field {
            "street" => copy.street = None,
            "house_number" => copy.house_number = None,
            "name" => copy.name = None,
            "district" => copy.district = None,
            "city" => copy.city = None,
            "region" => copy.region = None,
            "postal_code" => copy.postal_code = None,
            "country" => copy.country = None,
            "country_code" => copy.country_code = None,
            _ => {}
        }
        copy
    }
}

/// One row per `(entity, provider)`: a single provider's proposal for an
/// entity's coordinates, or a synthesized winner/fallback row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub entity_type: EntityType,
    pub entity_id: u64,
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<Value>,

    /// Only set on winner rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    /// Unix-second TTL marker; only set in non-production environments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Candidate {
    pub fn entity(&self) -> EntityKey {
        EntityKey::new(self.entity_type, self.entity_id)
    }

    pub fn has_coordinate(&self) -> bool {
        self.longitude.is_some() && self.latitude.is_some()
    }

    /// Invariant 2: `longitude ∈ [-180,180]`, `latitude ∈ [-90,90]` for
    /// every row with a coordinate.
    pub fn coordinate_in_range(&self) -> bool {
        let lon_ok = self
            .longitude
            .as_ref()
            .and_then(|d| d.as_f64().ok())
            .map(|lon| (-180.0..=180.0).contains(&lon))
            .unwrap_or(true);
        let lat_ok = self
            .latitude
            .as_ref()
            .and_then(|d| d.as_f64().ok())
            .map(|lat| (-90.0..=90.0).contains(&lat))
            .unwrap_or(true);
        lon_ok && lat_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_key_formats_as_type_colon_id() {
        let key = EntityKey::new(EntityType::Accommodation, 42);
        assert_eq!(key.as_key(), "accommodation:42");
    }

    #[test]
    fn consolidated_marker_is_unified_both_directions() {
        assert!(provider::is_consolidation_marker(
            "consolidated_test",
            "test"
        ));
        assert!(!provider::is_consolidation_marker(
            "consolidator_test",
            "test"
        ));
    }

    #[test]
    fn coordinate_range_check_rejects_out_of_bounds_latitude() {
        let mut c = Candidate {
            entity_type: EntityType::Accommodation,
            entity_id: 1,
            provider: "google".to_owned(),
            longitude: Some("10.0".parse().unwrap()),
            latitude: Some("95.0".parse().unwrap()),
            accuracy: None,
            confidence: None,
            quality: None,
            score: None,
            city: None,
            country_code: None,
            meta: Map::new(),
            batch_id: None,
            timestamp: None,
        };
        assert!(!c.coordinate_in_range());
        c.latitude = Some("45.0".parse().unwrap());
        assert!(c.coordinate_in_range());
    }

    #[test]
    fn address_without_field_clears_only_that_field() {
        let a = Address {
            street: Some("Main St".to_owned()),
            city: Some("Springfield".to_owned()),
            ..Default::default()
        };
        let b = a.without("street");
        assert_eq!(b.street, None);
        assert_eq!(b.city.as_deref(), Some("Springfield"));
    }
}
