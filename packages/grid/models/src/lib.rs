#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Grid types for hex feature aggregation.
//!
//! A [`Grid`] is a fixed, pre-generated set of hexagonal cells, each owned
//! by exactly one area of interest (AOI). Cell ids are opaque tokens; the
//! grid only guarantees they are unique.

pub mod slug;

use std::collections::HashSet;

use geo::{BoundingRect, Polygon, Rect};
pub use hex_features_layer_models::Crs;
pub use slug::{SlugRule, ensure_country};

/// Grid construction failures.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// Two cells share an id.
    #[error("Duplicate cell id '{0}' in grid")]
    DuplicateId(String),
}

/// One hexagonal cell.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    /// Opaque cell id, unique within the grid.
    pub id: String,
    /// Cell boundary in the grid CRS.
    pub polygon: Polygon<f64>,
    /// Name of the AOI that owns this cell.
    pub aoi_name: String,
}

impl GridCell {
    /// Creates a cell.
    #[must_use]
    pub fn new(id: impl Into<String>, polygon: Polygon<f64>, aoi_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            polygon,
            aoi_name: aoi_name.into(),
        }
    }
}

/// An ordered collection of cells sharing a CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    crs: Crs,
    id_column: String,
    cells: Vec<GridCell>,
}

impl Grid {
    /// Builds a grid, keeping the cell order as given.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::DuplicateId`] if two cells share an id.
    pub fn new(
        crs: Crs,
        id_column: impl Into<String>,
        cells: Vec<GridCell>,
    ) -> Result<Self, GridError> {
        let mut seen = HashSet::with_capacity(cells.len());
        for cell in &cells {
            if !seen.insert(cell.id.as_str()) {
                return Err(GridError::DuplicateId(cell.id.clone()));
            }
        }
        Ok(Self {
            crs,
            id_column: id_column.into(),
            cells,
        })
    }

    /// An empty grid with the same CRS and id column as `self`.
    #[must_use]
    pub fn empty_like(&self) -> Self {
        Self {
            crs: self.crs,
            id_column: self.id_column.clone(),
            cells: Vec::new(),
        }
    }

    /// A grid holding the cells of `self` that satisfy `keep`, in order.
    #[must_use]
    pub fn filtered(&self, keep: impl Fn(&GridCell) -> bool) -> Self {
        Self {
            crs: self.crs,
            id_column: self.id_column.clone(),
            cells: self.cells.iter().filter(|c| keep(c)).cloned().collect(),
        }
    }

    #[must_use]
    pub const fn crs(&self) -> Crs {
        self.crs
    }

    /// Name of the cell id column in inputs and outputs.
    #[must_use]
    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    #[must_use]
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Distinct AOI names in order of first appearance.
    #[must_use]
    pub fn aoi_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.cells
            .iter()
            .filter(|c| seen.insert(c.aoi_name.as_str()))
            .map(|c| c.aoi_name.clone())
            .collect()
    }

    /// Bounding box of every cell, `None` for an empty grid.
    #[must_use]
    pub fn bounds(&self) -> Option<Rect<f64>> {
        let mut rects = self.cells.iter().filter_map(|c| c.polygon.bounding_rect());
        let first = rects.next()?;
        Some(rects.fold(first, |acc, r| {
            Rect::new(
                (acc.min().x.min(r.min().x), acc.min().y.min(r.min().y)),
                (acc.max().x.max(r.max().x), acc.max().y.max(r.max().y)),
            )
        }))
    }
}
