//! `GeoJSON` encoding of feature layers.
//!
//! Layers are persisted as a `FeatureCollection`. The coordinate reference
//! travels in the legacy top-level `crs` member
//! (`{"type": "name", "properties": {"name": "EPSG:32755"}}`) so layers in
//! projected references survive a round trip; a missing member means WGS84.

use std::collections::BTreeMap;

use geojson::{FeatureCollection, GeoJson, JsonObject, JsonValue};
use hex_features_layer_models::{AttributeValue, Crs, Feature, FeatureLayer, LayerKind};

use crate::LayerError;

/// Reads the CRS from a collection's foreign members, defaulting to WGS84.
///
/// # Errors
///
/// Returns [`LayerError::Crs`] if a `crs` member names an unsupported
/// reference.
pub fn crs_from_members(members: Option<&JsonObject>) -> Result<Crs, LayerError> {
    let name = members
        .and_then(|m| m.get("crs"))
        .and_then(|crs| crs.get("properties"))
        .and_then(|props| props.get("name"))
        .and_then(JsonValue::as_str);

    match name {
        Some(name) => Ok(name.parse::<Crs>()?),
        None => Ok(Crs::Wgs84),
    }
}

/// Builds the foreign-member map that records `crs`.
#[must_use]
pub fn crs_members(crs: Crs) -> JsonObject {
    let mut members = JsonObject::new();
    members.insert(
        "crs".to_string(),
        serde_json::json!({
            "type": "name",
            "properties": { "name": crs.to_string() },
        }),
    );
    members
}

/// Parses `GeoJSON` text into a feature layer.
///
/// Features without geometry are dropped. Null properties are treated as
/// missing; arrays and objects are kept as their JSON text.
///
/// # Errors
///
/// Returns [`LayerError`] if the text is not a `FeatureCollection` or a
/// geometry cannot be converted.
pub fn layer_from_geojson_str(kind: LayerKind, text: &str) -> Result<FeatureLayer, LayerError> {
    let geojson: GeoJson = text.parse()?;
    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(LayerError::NotACollection);
    };
    layer_from_collection(kind, collection)
}

/// Converts a parsed `FeatureCollection` into a feature layer.
///
/// # Errors
///
/// Returns [`LayerError`] if the CRS is unsupported or a geometry cannot be
/// converted.
pub fn layer_from_collection(
    kind: LayerKind,
    collection: FeatureCollection,
) -> Result<FeatureLayer, LayerError> {
    let crs = crs_from_members(collection.foreign_members.as_ref())?;
    let mut features = Vec::with_capacity(collection.features.len());
    let mut skipped = 0_usize;

    for feature in collection.features {
        let Some(geometry) = feature.geometry else {
            skipped += 1;
            continue;
        };
        let geometry: geo::Geometry<f64> = geometry.try_into()?;
        let attributes = feature
            .properties
            .map(attributes_from_properties)
            .unwrap_or_default();
        features.push(Feature {
            geometry,
            attributes,
        });
    }

    if skipped > 0 {
        log::debug!("Dropped {skipped} {kind} features without geometry");
    }

    Ok(FeatureLayer::new(kind, crs, features))
}

/// Converts a feature layer into a `FeatureCollection`.
#[must_use]
pub fn layer_to_collection(layer: &FeatureLayer) -> FeatureCollection {
    let features = layer
        .features
        .iter()
        .map(|f| geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&f.geometry))),
            id: None,
            properties: Some(properties_from_attributes(&f.attributes)),
            foreign_members: None,
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(crs_members(layer.crs)),
    }
}

/// Serializes a feature layer to `GeoJSON` text.
#[must_use]
pub fn layer_to_geojson_string(layer: &FeatureLayer) -> String {
    GeoJson::from(layer_to_collection(layer)).to_string()
}

/// Maps JSON properties onto scalar attributes.
#[must_use]
pub fn attributes_from_properties(props: JsonObject) -> BTreeMap<String, AttributeValue> {
    props
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                JsonValue::Null => return None,
                JsonValue::Bool(b) => AttributeValue::Bool(b),
                JsonValue::Number(n) => AttributeValue::Number(n.as_f64()?),
                JsonValue::String(s) => AttributeValue::Text(s),
                other @ (JsonValue::Array(_) | JsonValue::Object(_)) => {
                    AttributeValue::Text(other.to_string())
                }
            };
            Some((key, value))
        })
        .collect()
}

fn properties_from_attributes(attributes: &BTreeMap<String, AttributeValue>) -> JsonObject {
    attributes
        .iter()
        .map(|(key, value)| {
            let json = match value {
                AttributeValue::Bool(b) => JsonValue::Bool(*b),
                AttributeValue::Number(n) => serde_json::Number::from_f64(*n)
                    .map_or(JsonValue::Null, JsonValue::Number),
                AttributeValue::Text(s) => JsonValue::String(s.clone()),
            };
            (key.clone(), json)
        })
        .collect()
}
