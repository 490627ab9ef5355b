#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index over grid cells.
//!
//! Builds an R-tree of cell polygons once per grid and answers
//! "which cells does this geometry intersect" for the aggregation join.
//! Bounding boxes prune candidates; an exact `intersects` test decides.

use geo::{BoundingRect, Geometry, Intersects, Polygon};
use hex_features_grid_models::Grid;
use rstar::{AABB, RTree, RTreeObject};

/// A cell polygon stored in the R-tree with its grid position.
struct CellEntry {
    position: usize,
    envelope: AABB<[f64; 2]>,
    polygon: Polygon<f64>,
}

impl RTreeObject for CellEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over the cells of one grid.
///
/// Query results are grid positions (indices into [`Grid::cells`]), so the
/// caller can accumulate per-cell values in plain vectors.
pub struct CellIndex {
    tree: RTree<CellEntry>,
    len: usize,
}

impl CellIndex {
    /// Indexes every cell of `grid`.
    #[must_use]
    pub fn build(grid: &Grid) -> Self {
        let entries: Vec<CellEntry> = grid
            .cells()
            .iter()
            .enumerate()
            .filter_map(|(position, cell)| {
                let Some(envelope) = compute_envelope(&cell.polygon) else {
                    log::debug!("Skipping degenerate cell {}", cell.id);
                    return None;
                };
                Some(CellEntry {
                    position,
                    envelope,
                    polygon: cell.polygon.clone(),
                })
            })
            .collect();

        log::debug!("Indexed {} grid cells", entries.len());

        Self {
            tree: RTree::bulk_load(entries),
            len: grid.len(),
        }
    }

    /// Number of cells in the indexed grid.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Grid positions of every cell `geometry` intersects, ascending.
    #[must_use]
    pub fn intersecting(&self, geometry: &Geometry<f64>) -> Vec<usize> {
        let Some(rect) = geometry.bounding_rect() else {
            return Vec::new();
        };
        let query_env =
            AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);

        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| geometry.intersects(&entry.polygon))
            .map(|entry| entry.position)
            .collect();
        hits.sort_unstable();
        hits
    }
}

/// Compute the bounding box envelope for a cell polygon.
fn compute_envelope(polygon: &Polygon<f64>) -> Option<AABB<[f64; 2]>> {
    polygon
        .bounding_rect()
        .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
}
