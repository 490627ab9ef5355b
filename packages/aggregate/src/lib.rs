#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Aggregation of feature layers onto grid cells.
//!
//! [`coverage::aggregate`] turns one feature layer into a per-cell table,
//! [`join_layers`] lines the five layer tables up against an AOI's cells,
//! [`aoi::merge`] stacks AOIs, and [`sanitize::sanitize_table`] prepares
//! the result for storage.

pub mod aoi;
pub mod coverage;
pub mod measure;
pub mod profile;
pub mod sanitize;

use hex_features_grid_models::Grid;

pub use aoi::{AOI_COLUMN, MergeError, PartitionError, merge, partition};
pub use coverage::{AggregatedLayer, aggregate};
pub use hex_features_aggregate_models::*;
pub use sanitize::{sanitize_name, sanitize_table};

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// The cell index was built from a different grid.
    #[error("Cell index holds {index} cells but the grid has {grid}")]
    IndexMismatch { grid: usize, index: usize },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Builds the per-AOI table: one row per cell of `grid` with its polygon,
/// followed by every layer's columns in the order given.
///
/// # Errors
///
/// Returns [`AggregateError::Table`] if two layers emit the same column
/// name.
pub fn join_layers(grid: &Grid, layers: Vec<AggregatedLayer>) -> Result<CellTable, AggregateError> {
    let ids = grid.cells().iter().map(|c| c.id.clone()).collect();
    let polygons = grid.cells().iter().map(|c| c.polygon.clone()).collect();
    let mut table = CellTable::new(grid.id_column(), ids).with_geometry(polygons)?;

    for layer in layers {
        table = table.left_join(layer.table)?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Geometry, Polygon, point, polygon};
    use hex_features_grid_models::{Crs, GridCell, SlugRule};
    use hex_features_layer::{Feature, FeatureLayer, LayerKind};
    use hex_features_spatial::CellIndex;

    fn square(x: f64, y: f64) -> Polygon<f64> {
        polygon![(x: x, y: y), (x: x + 1.0, y: y), (x: x + 1.0, y: y + 1.0), (x: x, y: y + 1.0)]
    }

    fn grid() -> Grid {
        Grid::new(
            Crs::Wgs84,
            "h3_id",
            vec![
                GridCell::new("a1", square(0.0, 0.0), "Alpha"),
                GridCell::new("a2", square(1.0, 0.0), "Alpha"),
                GridCell::new("b1", square(10.0, 0.0), "Beta"),
            ],
        )
        .unwrap()
    }

    fn poi(x: f64, amenity: &str) -> Feature {
        let geometry: Geometry<f64> = point!(x: x, y: 0.5).into();
        Feature::new(geometry).with("amenity", amenity)
    }

    fn layers_for(grid: &Grid, pois: &FeatureLayer) -> Vec<AggregatedLayer> {
        let index = CellIndex::build(grid);
        LayerKind::ALL
            .iter()
            .map(|&kind| {
                if kind == LayerKind::Pois {
                    aggregate(pois, grid, &index).unwrap()
                } else {
                    aggregate(&FeatureLayer::empty(kind, Crs::Wgs84), grid, &index).unwrap()
                }
            })
            .collect()
    }

    fn run(grid: &Grid, pois: &FeatureLayer) -> CellTable {
        let rule = SlugRule::default();
        let parts = grid
            .aoi_names()
            .into_iter()
            .map(|aoi| {
                let sub = partition(grid, &aoi, &rule).unwrap();
                let table = join_layers(&sub, layers_for(&sub, pois)).unwrap();
                (aoi, table)
            })
            .collect();
        sanitize_table(merge(parts).unwrap(), 60).unwrap()
    }

    #[test]
    fn every_cell_appears_once_with_geometry() {
        let pois = FeatureLayer::new(
            LayerKind::Pois,
            Crs::Wgs84,
            vec![poi(0.5, "cafe"), poi(10.5, "Fast Food")],
        );

        let table = run(&grid(), &pois);

        assert_eq!(table.ids(), ["a1", "a2", "b1"]);
        assert_eq!(table.geometry().map(<[_]>::len), Some(3));
        assert_eq!(table.number("a1", "poi_cafe"), Some(1.0));
        assert_eq!(table.number("b1", "poi_cafe"), Some(0.0));
        assert_eq!(table.number("b1", "poi_fast_food"), Some(1.0));
        assert_eq!(table.number("a1", "poi_fast_food"), Some(0.0));
        assert_eq!(table.number("a2", "roads_count"), Some(0.0));
        assert_eq!(table.number("a2", "avg_building_area_m2"), None);

        let schema = table.category_schema();
        assert_eq!(schema.len(), 2);
        assert_eq!(
            schema.column_for(&CategoryKey::new(LayerKind::Pois, "poi_type", "Fast Food")),
            Some("poi_fast_food")
        );
    }

    #[test]
    fn zero_features_give_the_same_table_every_time() {
        let pois = FeatureLayer::empty(LayerKind::Pois, Crs::Wgs84);
        let first = run(&grid(), &pois);
        let second = run(&grid(), &pois);

        assert_eq!(first.column_names(), second.column_names());
        assert_eq!(first.ids(), second.ids());
        assert_eq!(first.column_names().first().copied(), Some("roads_length_m"));
        assert!(first.category_schema().is_empty());
        for name in first.column_names() {
            if name == AOI_COLUMN || name.starts_with("avg_building") {
                continue;
            }
            for id in first.ids() {
                assert_eq!(first.number(id, name), Some(0.0), "{name} {id}");
            }
        }
    }

    #[test]
    fn join_rejects_layers_with_clashing_columns() {
        let grid = grid();
        let index = CellIndex::build(&grid);
        let empty = FeatureLayer::empty(LayerKind::Natural, Crs::Wgs84);
        let once = aggregate(&empty, &grid, &index).unwrap();
        let twice = once.clone();

        assert!(matches!(
            join_layers(&grid, vec![once, twice]),
            Err(AggregateError::Table(TableError::DuplicateColumn(_)))
        ));
    }
}
