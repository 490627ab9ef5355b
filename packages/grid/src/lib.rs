#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Loading the materialized hex grid.
//!
//! The grid arrives as a `GeoJSON` `FeatureCollection` with one polygon per
//! cell and two properties: the cell id (default `h3_id`) and the owning AOI
//! (default `aoi_name`). This crate reads it into a
//! [`hex_features_grid_models::Grid`] and offers a few H3 helpers in
//! [`h3`].

pub mod h3;

use std::path::Path;

use geo::{Geometry, Polygon};
use geojson::{FeatureCollection, GeoJson, JsonValue};
use hex_features_layer::geojson_io;

pub use hex_features_grid_models::*;

/// Grid loading failures.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The grid file does not exist.
    #[error("Grid file not found: {0}")]
    Missing(String),

    /// The grid has no cells.
    #[error("Grid {0} contains no cells")]
    Empty(String),

    /// Reading the grid file failed.
    #[error("I/O error reading grid {path}: {source}")]
    Io {
        /// Grid path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid `GeoJSON`.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The file is valid `GeoJSON` but not a feature collection, or names
    /// an unsupported CRS.
    #[error(transparent)]
    Layer(#[from] hex_features_layer::LayerError),

    /// A cell lacks a required property.
    #[error("Grid feature #{index} has no '{column}' property")]
    MissingProperty {
        /// Zero-based feature position.
        index: usize,
        /// Property that was expected.
        column: String,
    },

    /// A cell's geometry is not a single polygon.
    #[error("Grid feature #{index} is not a polygon")]
    NotAPolygon {
        /// Zero-based feature position.
        index: usize,
    },

    /// The grid violates a model invariant.
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Names of the grid's id and AOI properties.
#[derive(Debug, Clone, Copy)]
pub struct GridColumns<'a> {
    /// Cell id property.
    pub id: &'a str,
    /// AOI name property.
    pub aoi: &'a str,
}

impl Default for GridColumns<'_> {
    fn default() -> Self {
        Self {
            id: "h3_id",
            aoi: "aoi_name",
        }
    }
}

/// Loads a grid file.
///
/// # Errors
///
/// Returns [`LoadError::Missing`] if the file does not exist,
/// [`LoadError::Empty`] if it holds no cells, and other [`LoadError`]
/// variants for malformed content.
pub fn load_grid(path: &Path, columns: GridColumns<'_>) -> Result<Grid, LoadError> {
    if !path.is_file() {
        return Err(LoadError::Missing(path.display().to_string()));
    }

    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let grid = grid_from_geojson_str(&text, columns)?;
    if grid.is_empty() {
        return Err(LoadError::Empty(path.display().to_string()));
    }

    log::info!(
        "Loaded grid {} ({} cells, {} AOIs, {})",
        path.display(),
        grid.len(),
        grid.aoi_names().len(),
        grid.crs()
    );

    Ok(grid)
}

/// Parses grid `GeoJSON` text. An empty collection yields an empty grid.
///
/// # Errors
///
/// Returns [`LoadError`] if the text is not a polygon feature collection
/// with the expected properties, or if ids repeat.
pub fn grid_from_geojson_str(text: &str, columns: GridColumns<'_>) -> Result<Grid, LoadError> {
    let GeoJson::FeatureCollection(collection) = text.parse::<GeoJson>()? else {
        return Err(hex_features_layer::LayerError::NotACollection.into());
    };
    grid_from_collection(collection, columns)
}

fn grid_from_collection(
    collection: FeatureCollection,
    columns: GridColumns<'_>,
) -> Result<Grid, LoadError> {
    let crs = geojson_io::crs_from_members(collection.foreign_members.as_ref())?;
    let mut cells = Vec::with_capacity(collection.features.len());

    for (index, feature) in collection.features.into_iter().enumerate() {
        let property = |column: &str| {
            feature
                .properties
                .as_ref()
                .and_then(|p| p.get(column))
                .and_then(property_text)
                .ok_or_else(|| LoadError::MissingProperty {
                    index,
                    column: column.to_string(),
                })
        };
        let id = property(columns.id)?;
        let aoi_name = property(columns.aoi)?;

        let geometry = feature
            .geometry
            .ok_or(LoadError::NotAPolygon { index })?;
        let polygon = single_polygon(geometry.try_into()?).ok_or(LoadError::NotAPolygon { index })?;

        cells.push(GridCell::new(id, polygon, aoi_name));
    }

    Ok(Grid::new(crs, columns.id, cells)?)
}

/// Property values used as ids and names: strings as-is, numbers in their
/// exact JSON form (64-bit H3 indices survive).
fn property_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn single_polygon(geometry: Geometry<f64>) -> Option<Polygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(p),
        Geometry::MultiPolygon(mp) if mp.0.len() == 1 => mp.0.into_iter().next(),
        _ => None,
    }
}

/// Serializes a grid back to `GeoJSON` text.
#[must_use]
pub fn grid_to_geojson_string(grid: &Grid, aoi_column: &str) -> String {
    let features = grid
        .cells()
        .iter()
        .map(|cell| {
            let mut props = geojson::JsonObject::new();
            props.insert(grid.id_column().to_string(), JsonValue::from(cell.id.clone()));
            props.insert(aoi_column.to_string(), JsonValue::from(cell.aoi_name.clone()));
            geojson::Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(&cell.polygon))),
                id: None,
                properties: Some(props),
                foreign_members: None,
            }
        })
        .collect();

    GeoJson::from(FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(geojson_io::crs_members(grid.crs())),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_features_layer::Crs;

    const GRID: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]},
                "properties": {"h3_id": "a", "aoi_name": "Yarra"}
            },
            {
                "type": "Feature",
                "geometry": {"type": "MultiPolygon", "coordinates": [[[[1,0],[2,0],[2,1],[1,1],[1,0]]]]},
                "properties": {"h3_id": 617700169958293503, "aoi_name": "Yarra"}
            }
        ]
    }"#;

    #[test]
    fn parses_cells_in_order() {
        let grid = grid_from_geojson_str(GRID, GridColumns::default()).unwrap();
        assert_eq!(grid.crs(), Crs::Wgs84);
        assert_eq!(grid.id_column(), "h3_id");
        let ids: Vec<&str> = grid.cells().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "617700169958293503"]);
        assert_eq!(grid.aoi_names(), vec!["Yarra".to_string()]);
    }

    #[test]
    fn custom_columns_and_missing_property() {
        let err = grid_from_geojson_str(
            GRID,
            GridColumns {
                id: "cell",
                aoi: "aoi_name",
            },
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::MissingProperty { index: 0, .. }));
    }

    #[test]
    fn missing_and_empty_files_are_errors() {
        let dir = std::env::temp_dir().join("hex_features_grid_load");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        let missing = dir.join("nope.geojson");
        assert!(matches!(
            load_grid(&missing, GridColumns::default()),
            Err(LoadError::Missing(_))
        ));

        let empty = dir.join("empty.geojson");
        std::fs::write(&empty, r#"{"type":"FeatureCollection","features":[]}"#).unwrap();
        assert!(matches!(
            load_grid(&empty, GridColumns::default()),
            Err(LoadError::Empty(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn written_grid_loads_back() {
        let grid = grid_from_geojson_str(GRID, GridColumns::default()).unwrap();
        let text = grid_to_geojson_string(&grid, "aoi_name");
        let back = grid_from_geojson_str(&text, GridColumns::default()).unwrap();
        assert_eq!(back, grid);
    }
}
