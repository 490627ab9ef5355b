//! Processing of a single area of interest.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use geo::{Coord, Rect};
use hex_features_aggregate::{CellTable, aggregate, join_layers, partition};
use hex_features_cache::{CacheOutcome, CacheStore};
use hex_features_grid::{Crs, Grid, SlugRule};
use hex_features_layer::LayerKind;
use hex_features_layer::extract::{ExtractArea, LayerExtractor};
use hex_features_layer::reproject::transform_coord;
use hex_features_spatial::CellIndex;

use crate::PipelineError;

/// Shared, read-only state for every AOI of a run.
pub struct RunContext {
    pub grid: Grid,
    pub slug: SlugRule,
    pub cache: CacheStore,
    pub extractor: Arc<dyn LayerExtractor>,
    /// Resolved raw source per AOI name; empty when the extractor needs
    /// none.
    pub sources: BTreeMap<String, PathBuf>,
}

/// One AOI's joined table plus cache statistics.
#[derive(Debug)]
pub struct AreaOutput {
    pub table: CellTable,
    pub cache_hits: usize,
    pub extracted: usize,
}

impl RunContext {
    /// Partitions the grid, fetches each layer through the cache, and
    /// aggregates all layers onto the AOI's cells.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if partitioning, extraction, or
    /// aggregation fails.
    pub fn process(&self, aoi: &str) -> Result<AreaOutput, PipelineError> {
        let subgrid = partition(&self.grid, aoi, &self.slug)?;
        let Some(bounds) = wgs84_bounds(&subgrid) else {
            return Ok(AreaOutput {
                table: CellTable::new(subgrid.id_column(), Vec::new()),
                cache_hits: 0,
                extracted: 0,
            });
        };

        let area = ExtractArea {
            name: aoi.to_string(),
            slug: self.slug.slugify(aoi),
            source: self.sources.get(aoi).cloned().unwrap_or_default(),
            bounds,
        };
        log::info!("Processing {aoi} ({} cells)", subgrid.len());

        let index = CellIndex::build(&subgrid);
        let mut cache_hits = 0;
        let mut extracted = 0;
        let mut layers = Vec::with_capacity(LayerKind::ALL.len());

        for &kind in LayerKind::ALL {
            let (layer, outcome) = self
                .cache
                .get_or_extract(kind, &area.slug, || self.extractor.extract(kind, &area))?;
            match outcome {
                CacheOutcome::Hit => cache_hits += 1,
                CacheOutcome::Extracted => extracted += 1,
            }
            let aggregated = aggregate(&layer, &subgrid, &index)?;
            log::debug!(
                "{aoi}: {kind} used {} of {} features",
                aggregated.features_used,
                layer.len()
            );
            layers.push(aggregated);
        }

        Ok(AreaOutput {
            table: join_layers(&subgrid, layers)?,
            cache_hits,
            extracted,
        })
    }
}

/// Bounds of `grid` in WGS84 degrees.
fn wgs84_bounds(grid: &Grid) -> Option<Rect<f64>> {
    let rect = grid.bounds()?;
    if grid.crs() == Crs::Wgs84 {
        return Some(rect);
    }
    let corners = [
        rect.min(),
        rect.max(),
        Coord {
            x: rect.min().x,
            y: rect.max().y,
        },
        Coord {
            x: rect.max().x,
            y: rect.min().y,
        },
    ]
    .map(|c| transform_coord(c, grid.crs(), Crs::Wgs84));

    let (mut min, mut max) = (corners[0], corners[0]);
    for c in &corners[1..] {
        min.x = min.x.min(c.x);
        min.y = min.y.min(c.y);
        max.x = max.x.max(c.x);
        max.y = max.y.max(c.y);
    }
    Some(Rect::new(min, max))
}
