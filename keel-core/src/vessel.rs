//! Shared vessel vocabulary
//!
//! Hull and fuel classifications plus the [`Spec`] wrapper used wherever an
//! attribute may legitimately be unknown. Unknown attributes are serialized as
//! the `"not specified"` sentinel instead of being dropped, so every profile
//! has the same set of keys regardless of how much the user supplied.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Sentinel written in place of any unknown attribute
pub const NOT_SPECIFIED: &str = "not specified";

/// An attribute value that may be unknown
#[derive(Debug, Clone, PartialEq)]
pub enum Spec<T> {
    /// A known value
    Specified(T),
    /// The attribute was not supplied and could not be inferred
    NotSpecified,
}

impl<T> Default for Spec<T> {
    fn default() -> Self {
        Spec::NotSpecified
    }
}

impl<T> Spec<T> {
    /// Wrap an optional value
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Spec::Specified(v),
            None => Spec::NotSpecified,
        }
    }

    /// Borrow the value if known
    pub fn value(&self) -> Option<&T> {
        match self {
            Spec::Specified(v) => Some(v),
            Spec::NotSpecified => None,
        }
    }

    /// Take the value if known
    pub fn into_option(self) -> Option<T> {
        match self {
            Spec::Specified(v) => Some(v),
            Spec::NotSpecified => None,
        }
    }

    pub fn is_specified(&self) -> bool {
        matches!(self, Spec::Specified(_))
    }

    /// Map the inner value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spec<U> {
        match self {
            Spec::Specified(v) => Spec::Specified(f(v)),
            Spec::NotSpecified => Spec::NotSpecified,
        }
    }

    /// Map a borrowed inner value
    pub fn map_ref<U>(&self, f: impl FnOnce(&T) -> U) -> Spec<U> {
        match self {
            Spec::Specified(v) => Spec::Specified(f(v)),
            Spec::NotSpecified => Spec::NotSpecified,
        }
    }

    /// Keep `self` if known, otherwise fall back to `other`
    pub fn or(self, other: Spec<T>) -> Spec<T> {
        match self {
            Spec::Specified(_) => self,
            Spec::NotSpecified => other,
        }
    }
}

impl<T: fmt::Display> Spec<T> {
    /// Render the value, or the sentinel when unknown
    pub fn display(&self) -> String {
        match self {
            Spec::Specified(v) => v.to_string(),
            Spec::NotSpecified => NOT_SPECIFIED.to_string(),
        }
    }

    /// Render the value with a unit suffix, or the sentinel when unknown
    pub fn display_with_unit(&self, unit: &str) -> String {
        match self {
            Spec::Specified(v) => format!("{} {}", v, unit),
            Spec::NotSpecified => NOT_SPECIFIED.to_string(),
        }
    }
}

impl<T> From<Option<T>> for Spec<T> {
    fn from(value: Option<T>) -> Self {
        Spec::from_option(value)
    }
}

impl<T: Serialize> Serialize for Spec<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Spec::Specified(v) => v.serialize(serializer),
            Spec::NotSpecified => serializer.serialize_str(NOT_SPECIFIED),
        }
    }
}

impl<'de, T: serde::de::DeserializeOwned> Deserialize<'de> for Spec<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Null => Ok(Spec::NotSpecified),
            serde_json::Value::String(ref s) if s.eq_ignore_ascii_case(NOT_SPECIFIED) => {
                Ok(Spec::NotSpecified)
            }
            other => T::deserialize(other)
                .map(Spec::Specified)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Hull classification used by the resistance estimate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HullType {
    FlatBottom,
    MultiHull,
    Pontoon,
    Rhib,
    SemiDisplacement,
    VBottom,
    Displacement,
    /// Free-text hull description that matched no known class
    Other(String),
}

impl HullType {
    /// Classify a free-text hull description.
    ///
    /// Matching ignores case, spaces and punctuation, so `"v bottom"`,
    /// `"V-Bottom"` and `"vbottom"` all land on [`HullType::VBottom`].
    pub fn parse(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match key.as_str() {
            "flatbottom" | "flat" | "jonboat" => HullType::FlatBottom,
            "multihull" | "catamaran" | "trimaran" => HullType::MultiHull,
            "pontoon" | "tritoon" => HullType::Pontoon,
            "rhib" | "rib" | "rigidinflatable" => HullType::Rhib,
            "semidisplacement" | "semiplaning" => HullType::SemiDisplacement,
            "vbottom" | "deepv" | "modifiedv" | "vhull" => HullType::VBottom,
            "displacement" | "fulldisplacement" => HullType::Displacement,
            _ => HullType::Other(raw.trim().to_string()),
        }
    }

    /// Relative fuel burn compared to a planing V-bottom of the same size
    pub fn fuel_factor(&self) -> f64 {
        match self {
            HullType::VBottom | HullType::Other(_) => 1.0,
            HullType::FlatBottom => 0.8,
            HullType::MultiHull => 0.7,
            HullType::Pontoon => 0.9,
            HullType::Rhib => 1.1,
            HullType::SemiDisplacement => 0.85,
            HullType::Displacement => 0.75,
        }
    }

    /// Form factor `1 + k` applied to frictional resistance
    pub fn form_factor(&self) -> f64 {
        match self {
            HullType::Displacement => 1.20,
            HullType::SemiDisplacement => 1.25,
            HullType::MultiHull => 1.15,
            HullType::Pontoon => 1.35,
            HullType::FlatBottom => 1.30,
            HullType::Rhib | HullType::VBottom | HullType::Other(_) => 1.28,
        }
    }
}

impl fmt::Display for HullType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HullType::FlatBottom => "Flat Bottom",
            HullType::MultiHull => "Multi-hull",
            HullType::Pontoon => "Pontoon",
            HullType::Rhib => "RHIB",
            HullType::SemiDisplacement => "Semi-Displacement",
            HullType::VBottom => "V-Bottom",
            HullType::Displacement => "Displacement",
            HullType::Other(s) => s.as_str(),
        };
        f.write_str(label)
    }
}

impl Serialize for HullType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HullType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(HullType::parse(&raw))
    }
}

/// Propulsion fuel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FuelType {
    #[serde(rename = "gasoline")]
    Gasoline,
    #[serde(rename = "marineDiesel")]
    MarineDiesel,
    #[serde(rename = "hybrid")]
    Hybrid,
    #[serde(rename = "electric")]
    Electric,
    #[serde(rename = "other")]
    Other,
}

impl FuelType {
    /// Classify a free-text fuel description, `None` when unrecognized
    pub fn parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match key.as_str() {
            "gasoline" | "gas" | "petrol" | "unleaded" => Some(FuelType::Gasoline),
            "marinediesel" | "diesel" => Some(FuelType::MarineDiesel),
            "hybrid" => Some(FuelType::Hybrid),
            "electric" | "battery" => Some(FuelType::Electric),
            "other" => Some(FuelType::Other),
            _ => None,
        }
    }

    /// Energy content of one gallon expressed as engine output, in hp·h.
    ///
    /// Derived from typical brake-specific fuel consumption: ~0.50 lb/hp·h
    /// for gasoline outboards (6.1 lb/gal) and ~0.40 lb/hp·h for marine
    /// diesels (7.1 lb/gal).
    pub fn hp_hours_per_gallon(&self) -> f64 {
        match self {
            FuelType::Gasoline | FuelType::Other => 12.2,
            FuelType::MarineDiesel => 17.75,
            FuelType::Hybrid => 15.0,
            FuelType::Electric => 0.0,
        }
    }
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FuelType::Gasoline => "gasoline",
            FuelType::MarineDiesel => "marineDiesel",
            FuelType::Hybrid => "hybrid",
            FuelType::Electric => "electric",
            FuelType::Other => "other",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_serializes_sentinel() {
        let spec: Spec<f64> = Spec::NotSpecified;
        assert_eq!(serde_json::to_value(&spec).unwrap(), serde_json::json!(NOT_SPECIFIED));

        let spec = Spec::Specified(25.0);
        assert_eq!(serde_json::to_value(&spec).unwrap(), serde_json::json!(25.0));
    }

    #[test]
    fn test_spec_deserializes_sentinel_and_null() {
        let spec: Spec<f64> = serde_json::from_value(serde_json::json!("not specified")).unwrap();
        assert_eq!(spec, Spec::NotSpecified);

        let spec: Spec<String> = serde_json::from_value(serde_json::Value::Null).unwrap();
        assert_eq!(spec, Spec::NotSpecified);

        let spec: Spec<String> = serde_json::from_value(serde_json::json!("Outrage 23")).unwrap();
        assert_eq!(spec, Spec::Specified("Outrage 23".to_string()));
    }

    #[test]
    fn test_hull_type_parse_synonyms() {
        assert_eq!(HullType::parse("V-Bottom"), HullType::VBottom);
        assert_eq!(HullType::parse("deep v"), HullType::VBottom);
        assert_eq!(HullType::parse("Catamaran"), HullType::MultiHull);
        assert_eq!(HullType::parse("RIB"), HullType::Rhib);
        assert_eq!(
            HullType::parse("  Tunnel hull "),
            HullType::Other("Tunnel hull".to_string())
        );
    }

    #[test]
    fn test_hull_type_display_round_trip() {
        for hull in [
            HullType::FlatBottom,
            HullType::MultiHull,
            HullType::Pontoon,
            HullType::Rhib,
            HullType::SemiDisplacement,
            HullType::VBottom,
            HullType::Displacement,
            HullType::Other("Tunnel".to_string()),
        ] {
            assert_eq!(HullType::parse(&hull.to_string()), hull);
        }
    }

    #[test]
    fn test_fuel_type_parse() {
        assert_eq!(FuelType::parse("Marine Diesel"), Some(FuelType::MarineDiesel));
        assert_eq!(FuelType::parse("marineDiesel"), Some(FuelType::MarineDiesel));
        assert_eq!(FuelType::parse("petrol"), Some(FuelType::Gasoline));
        assert_eq!(FuelType::parse("kerosene"), None);
    }
}
