//! The layer extraction boundary.
//!
//! Parsing raw map-data archives is not done in-process. The pipeline talks
//! to a [`LayerExtractor`], and the stock implementation,
//! [`Ogr2OgrExtractor`], shells out to GDAL's `ogr2ogr` with the OSM driver
//! and reads back the `GeoJSON` it writes to stdout.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use geo::Rect;
use hex_features_layer_models::{AttributeValue, FeatureLayer, LayerKind};

use crate::geojson_io;

/// What an extractor needs to know about the area being extracted.
#[derive(Debug, Clone)]
pub struct ExtractArea {
    /// Human-readable AOI name.
    pub name: String,
    /// AOI slug (also the cache key).
    pub slug: String,
    /// Resolved raw source file.
    pub source: PathBuf,
    /// AOI bounds in WGS84 degrees, used to clip the extraction.
    pub bounds: Rect<f64>,
}

/// Produces unprocessed feature layers for an area.
pub trait LayerExtractor: Send + Sync {
    /// Whether [`Self::extract`] needs [`ExtractArea::source`] to point at a
    /// resolved raw source file.
    fn needs_source(&self) -> bool {
        true
    }

    /// Extracts one layer for one area.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] when the extraction cannot be produced.
    fn extract(&self, kind: LayerKind, area: &ExtractArea) -> Result<FeatureLayer, ExtractError>;
}

/// Extraction failures.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The external tool could not be started.
    #[error("Failed to run {tool} (is GDAL installed?): {source}")]
    Spawn {
        /// Program name.
        tool: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The external tool exited unsuccessfully.
    #[error("{tool} failed for {kind} in {area}: {stderr}")]
    Tool {
        /// Program name.
        tool: String,
        /// Layer being extracted.
        kind: LayerKind,
        /// AOI name.
        area: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The tool output could not be decoded.
    #[error("Invalid extractor output: {0}")]
    Layer(#[from] crate::LayerError),

    /// Extraction failed for another reason.
    #[error("{0}")]
    Other(String),
}

/// Highway values that are not part of the drivable network.
pub const NON_DRIVING_HIGHWAYS: &[&str] = &[
    "abandoned",
    "bridleway",
    "bus_guideway",
    "construction",
    "corridor",
    "cycleway",
    "elevator",
    "escalator",
    "footway",
    "path",
    "pedestrian",
    "planned",
    "platform",
    "proposed",
    "raceway",
    "steps",
    "track",
];

/// `ogr2ogr` invocation parameters for one layer kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OgrQuery {
    /// OSM driver layer (`points`, `lines`, `multipolygons`).
    pub ogr_layer: &'static str,
    /// OGR SQL attribute filter.
    pub filter: String,
}

impl OgrQuery {
    /// The query used for `kind`.
    #[must_use]
    pub fn for_kind(kind: LayerKind) -> Self {
        match kind {
            LayerKind::Roads => {
                let excluded = NON_DRIVING_HIGHWAYS
                    .iter()
                    .map(|h| format!("'{h}'"))
                    .collect::<Vec<_>>()
                    .join(",");
                Self {
                    ogr_layer: "lines",
                    filter: format!("highway IS NOT NULL AND highway NOT IN ({excluded})"),
                }
            }
            LayerKind::Buildings => Self {
                ogr_layer: "multipolygons",
                filter: "building IS NOT NULL".to_string(),
            },
            LayerKind::Pois => Self {
                ogr_layer: "points",
                filter: "other_tags LIKE '%\"amenity\"=>%' OR other_tags LIKE '%\"shop\"=>%'"
                    .to_string(),
            },
            LayerKind::Landuse => Self {
                ogr_layer: "multipolygons",
                filter: "landuse IS NOT NULL".to_string(),
            },
            LayerKind::Natural => Self {
                ogr_layer: "multipolygons",
                filter: "\"natural\" IS NOT NULL".to_string(),
            },
        }
    }
}

/// Extracts layers from `.osm.pbf` files with `ogr2ogr`.
#[derive(Debug, Clone)]
pub struct Ogr2OgrExtractor {
    program: String,
}

impl Default for Ogr2OgrExtractor {
    fn default() -> Self {
        Self {
            program: "ogr2ogr".to_string(),
        }
    }
}

impl Ogr2OgrExtractor {
    /// Uses a specific `ogr2ogr` binary.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Builds the argument list for one extraction.
    #[must_use]
    pub fn args(kind: LayerKind, area: &ExtractArea) -> Vec<String> {
        let query = OgrQuery::for_kind(kind);
        let (min, max) = (area.bounds.min(), area.bounds.max());
        vec![
            "-f".to_string(),
            "GeoJSON".to_string(),
            "/vsistdout/".to_string(),
            area.source.display().to_string(),
            query.ogr_layer.to_string(),
            "-spat".to_string(),
            min.x.to_string(),
            min.y.to_string(),
            max.x.to_string(),
            max.y.to_string(),
            "-where".to_string(),
            query.filter,
            "-skipfailures".to_string(),
        ]
    }
}

impl LayerExtractor for Ogr2OgrExtractor {
    fn extract(&self, kind: LayerKind, area: &ExtractArea) -> Result<FeatureLayer, ExtractError> {
        log::info!(
            "Extracting {kind} for {} from {}",
            area.name,
            area.source.display()
        );

        let output = Command::new(&self.program)
            .args(Self::args(kind, area))
            .output()
            .map_err(|source| ExtractError::Spawn {
                tool: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractError::Tool {
                tool: self.program.clone(),
                kind,
                area: area.name.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut layer = geojson_io::layer_from_geojson_str(kind, &text)?;
        for feature in &mut layer.features {
            expand_other_tags(&mut feature.attributes);
        }

        log::info!("Extracted {} {kind} features for {}", layer.len(), area.name);
        Ok(layer)
    }
}

/// Moves the OSM driver's `other_tags` hstore string into individual
/// attributes. Explicit columns win over duplicated hstore keys.
pub fn expand_other_tags(attributes: &mut BTreeMap<String, AttributeValue>) {
    let Some(AttributeValue::Text(raw)) = attributes.remove("other_tags") else {
        return;
    };
    for (key, value) in parse_hstore(&raw) {
        attributes
            .entry(key)
            .or_insert(AttributeValue::Text(value));
    }
}

/// Parses an hstore literal such as `"lanes"=>"2","maxspeed"=>"50"`.
///
/// Backslash escapes inside quoted strings are honored. Malformed trailing
/// input is ignored.
#[must_use]
pub fn parse_hstore(raw: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut chars = raw.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        let Some(key) = read_quoted(&mut chars) else {
            break;
        };
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') || chars.next() != Some('>') {
            break;
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(value) = read_quoted(&mut chars) else {
            break;
        };
        pairs.push((key, value));
    }

    pairs
}

fn read_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<String> {
    if chars.next()? != '"' {
        return None;
    }
    let mut out = String::new();
    loop {
        match chars.next()? {
            '\\' => out.push(chars.next()?),
            '"' => return Some(out),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hstore_pairs_with_escapes() {
        let pairs = parse_hstore(r#""lanes"=>"2","name:en"=>"King \"St\"", "lit"=>"yes""#);
        assert_eq!(
            pairs,
            vec![
                ("lanes".to_string(), "2".to_string()),
                ("name:en".to_string(), "King \"St\"".to_string()),
                ("lit".to_string(), "yes".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_hstore_keeps_complete_pairs() {
        let pairs = parse_hstore(r#""a"=>"1","b"=>"#);
        assert_eq!(pairs, vec![("a".to_string(), "1".to_string())]);
        assert!(parse_hstore("").is_empty());
    }

    #[test]
    fn other_tags_do_not_override_columns() {
        let mut attrs = BTreeMap::new();
        attrs.insert("highway".to_string(), AttributeValue::from("primary"));
        attrs.insert(
            "other_tags".to_string(),
            AttributeValue::from(r#""highway"=>"service","maxspeed"=>"60""#),
        );

        expand_other_tags(&mut attrs);

        assert_eq!(attrs.get("highway"), Some(&AttributeValue::from("primary")));
        assert_eq!(attrs.get("maxspeed"), Some(&AttributeValue::from("60")));
        assert!(!attrs.contains_key("other_tags"));
    }

    #[test]
    fn builds_clipped_ogr_arguments() {
        let area = ExtractArea {
            name: "Yarra".to_string(),
            slug: "yarra".to_string(),
            source: PathBuf::from("/data/yarra.osm.pbf"),
            bounds: Rect::new((144.9, -37.9), (145.1, -37.7)),
        };

        let args = Ogr2OgrExtractor::args(LayerKind::Buildings, &area);

        assert_eq!(args[3], "/data/yarra.osm.pbf");
        assert_eq!(args[4], "multipolygons");
        assert_eq!(&args[5..10], &["-spat", "144.9", "-37.9", "145.1", "-37.7"]);
        assert_eq!(args[11], "building IS NOT NULL");
    }

    #[test]
    fn road_filter_excludes_non_driving_ways() {
        let query = OgrQuery::for_kind(LayerKind::Roads);
        assert_eq!(query.ogr_layer, "lines");
        assert!(query.filter.contains("'footway'"));
        assert!(query.filter.starts_with("highway IS NOT NULL"));
    }
}
