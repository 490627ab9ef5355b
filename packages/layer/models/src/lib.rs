#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Feature layer types shared across the hex feature pipeline.
//!
//! A feature layer is one named category of map features (roads,
//! buildings, points of interest, land use, natural features) as handed
//! over by an extractor: geometries plus a free-form attribute map whose
//! keys are not known until the data is read.

pub mod crs;

use std::collections::{BTreeMap, BTreeSet};

use geo::Geometry;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use crs::{Crs, UnsupportedCrs};

/// The five feature layer kinds aggregated onto the grid.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LayerKind {
    /// Drivable road network edges.
    Roads,
    /// Building footprints.
    Buildings,
    /// Amenity and shop points of interest.
    Pois,
    /// Land-use polygons.
    Landuse,
    /// Natural-feature polygons.
    Natural,
}

impl LayerKind {
    /// All layer kinds in aggregation order.
    pub const ALL: &[Self] = &[
        Self::Roads,
        Self::Buildings,
        Self::Pois,
        Self::Landuse,
        Self::Natural,
    ];
}

/// A scalar attribute value on a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Boolean value.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// Free text value.
    Text(String),
}

impl AttributeValue {
    /// Coerces the value to a number.
    ///
    /// Text is parsed after trimming; anything unparseable is `None`
    /// rather than an error. Booleans map to `1.0`/`0.0`.
    #[must_use]
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(*n),
            Self::Number(_) => None,
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    /// Renders the value as a category label.
    #[must_use]
    pub fn to_label(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    /// Whether the value carries no information (blank text).
    #[must_use]
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A single feature: geometry plus attributes. Absent keys are missing
/// values.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Feature geometry in the owning layer's CRS.
    pub geometry: Geometry<f64>,
    /// Attribute map; the key set varies from feature to feature.
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Feature {
    /// Creates a feature without attributes.
    #[must_use]
    pub const fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry,
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute, builder style.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Returns an attribute value, treating blank text as missing.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key).filter(|v| !v.is_blank())
    }
}

/// An extracted feature layer. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLayer {
    /// Which layer this is.
    pub kind: LayerKind,
    /// Coordinate reference of every geometry in `features`.
    pub crs: Crs,
    /// The features.
    pub features: Vec<Feature>,
}

impl FeatureLayer {
    /// Creates a layer.
    #[must_use]
    pub const fn new(kind: LayerKind, crs: Crs, features: Vec<Feature>) -> Self {
        Self {
            kind,
            crs,
            features,
        }
    }

    /// Creates an empty layer.
    #[must_use]
    pub const fn empty(kind: LayerKind, crs: Crs) -> Self {
        Self::new(kind, crs, Vec::new())
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the layer holds no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Which optional attributes a particular extraction actually carries.
///
/// Produced once per layer and consulted by the aggregators instead of
/// inspecting features ad hoc. An attribute is present when at least one
/// feature has a non-blank value for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerCapabilities {
    /// Optional numeric attributes present with at least one parseable value.
    pub numeric: BTreeSet<String>,
    /// Optional category attributes present with at least one value.
    pub categories: BTreeSet<String>,
}

impl LayerCapabilities {
    /// Describes `layer` with respect to the attributes of interest.
    #[must_use]
    pub fn describe(layer: &FeatureLayer, numeric: &[&str], categories: &[&str]) -> Self {
        let mut caps = Self::default();

        for feature in &layer.features {
            for &name in numeric {
                if !caps.numeric.contains(name)
                    && feature.get(name).and_then(AttributeValue::to_number).is_some()
                {
                    caps.numeric.insert(name.to_string());
                }
            }
            for &name in categories {
                if !caps.categories.contains(name) && feature.get(name).is_some() {
                    caps.categories.insert(name.to_string());
                }
            }
        }

        caps
    }

    /// Whether a numeric attribute is available.
    #[must_use]
    pub fn has_numeric(&self, name: &str) -> bool {
        self.numeric.contains(name)
    }

    /// Whether a category attribute is available.
    #[must_use]
    pub fn has_category(&self, name: &str) -> bool {
        self.categories.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;

    #[test]
    fn layer_kind_names_are_snake_case() {
        assert_eq!(LayerKind::Pois.to_string(), "pois");
        assert_eq!("landuse".parse::<LayerKind>().unwrap(), LayerKind::Landuse);
        assert_eq!(LayerKind::ALL.len(), 5);
    }

    #[test]
    fn numeric_coercion_treats_garbage_as_missing() {
        assert_eq!(AttributeValue::from("2").to_number(), Some(2.0));
        assert_eq!(AttributeValue::from(" 50 ").to_number(), Some(50.0));
        assert_eq!(AttributeValue::from("2;3").to_number(), None);
        assert_eq!(AttributeValue::from("50 mph").to_number(), None);
        assert_eq!(AttributeValue::Number(f64::NAN).to_number(), None);
        assert_eq!(AttributeValue::Bool(true).to_number(), Some(1.0));
    }

    #[test]
    fn capabilities_only_list_attributes_with_values() {
        let layer = FeatureLayer::new(
            LayerKind::Buildings,
            Crs::Wgs84,
            vec![
                Feature::new(point!(x: 0.0, y: 0.0).into())
                    .with("building", "house")
                    .with("height", "n/a"),
                Feature::new(point!(x: 1.0, y: 1.0).into())
                    .with("building:levels", "3")
                    .with("roof", ""),
            ],
        );

        let caps = LayerCapabilities::describe(
            &layer,
            &["building:levels", "height"],
            &["building", "roof"],
        );

        assert!(caps.has_numeric("building:levels"));
        assert!(!caps.has_numeric("height"));
        assert!(caps.has_category("building"));
        assert!(!caps.has_category("roof"));
    }
}
