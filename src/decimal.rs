//! Exact-decimal storage for coordinate fields.
//!
//! Coordinates round-trip through JSON, provider responses, and the
//! candidate store many times over an entity's lifetime. Parsing them to
//! `f64` and reformatting on every hop accumulates drift, so we keep the
//! original decimal string and only parse it lazily when a numeric value
//! is actually needed (scoring, distance).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A coordinate value preserved as the exact decimal string it was
/// produced from. Two `Decimal`s are equal iff their strings are equal
/// after stripping a leading `+` and normalizing `-0` to `0` -- we do not
/// attempt general decimal canonicalization (e.g. trailing zeros), since
/// every value this crate writes is normalized at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Decimal(String);

impl Decimal {
    /// Build a `Decimal` from a value this crate computed itself (e.g. a
    /// city-fallback coordinate copied from the destinations table).
    pub fn from_f64(value: f64) -> Decimal {
        Decimal(format!("{}", value))
    }

    /// Parse the string form, for use in scoring/distance math.
    pub fn as_f64(&self) -> Result<f64, std::num::ParseFloatError> {
        f64::from_str(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Decimal {
    type Err = std::num::ParseFloatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Validate it's actually numeric, but keep the original string.
        f64::from_str(s)?;
        Ok(Decimal(s.to_owned()))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        normalize(&self.0) == normalize(&other.0)
    }
}

fn normalize(s: &str) -> &str {
    let s = s.strip_prefix('+').unwrap_or(s);
    if s == "-0" {
        "0"
    } else {
        s
    }
}
