#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! End-to-end hex feature runs.
//!
//! [`run`] loads the grid, resolves every AOI's raw source up front,
//! processes AOIs concurrently (each on a blocking task, results kept in
//! AOI order), merges and sanitizes the per-AOI tables, writes the `DuckDB`
//! output, and drops a JSON metadata sidecar next to it.

pub mod area;
pub mod metadata;
pub mod progress;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::{self, StreamExt as _};
use hex_features_aggregate::{
    AggregateError, MergeError, PartitionError, TableError, merge, partition, sanitize_table,
};
use hex_features_cache::{CacheError, CacheStore};
use hex_features_database::DbError;
use hex_features_grid::{Grid, GridColumns, LoadError, h3, load_grid};
use hex_features_layer::extract::LayerExtractor;
use hex_features_layer::resolve::{PBF_SUFFIX, ResolveError, find_source};
use hex_features_pipeline_models::{ConfigError, PipelineConfig, schema_sidecar};

use crate::area::RunContext;
use crate::metadata::RunMetadata;
use crate::progress::ProgressCallback;

/// Errors that can abort a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Grid(#[from] LoadError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A failure while processing one AOI.
    #[error("AOI '{aoi}' failed: {source}")]
    Aoi {
        aoi: String,
        source: Box<Self>,
    },
}

impl PipelineError {
    /// Whether the error must abort the run even when
    /// `continue_on_error` is set.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Grid(_) | Self::Resolve(_) | Self::Join(_) => true,
            Self::Aoi { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_slug: String,
    pub output: PathBuf,
    pub sidecar: PathBuf,
    pub cells: usize,
    pub columns: usize,
    pub aois_processed: Vec<String>,
    pub aois_skipped: Vec<String>,
    pub cache_hits: usize,
    pub extracted: usize,
}

/// Resolves the raw source for one AOI the way a run would.
///
/// # Errors
///
/// Returns [`ResolveError`] when there is no unique match.
pub fn resolve_source(config: &PipelineConfig, aoi: &str) -> Result<PathBuf, ResolveError> {
    find_source(
        &config.sources_dir(),
        aoi,
        &config.slug.slugify(aoi),
        PBF_SUFFIX,
    )
}

/// Resolves the raw source of every AOI that owns at least one grid cell.
///
/// AOIs with no cells are skipped when processed and need no source;
/// partition errors are left for processing to report.
fn resolve_sources(
    config: &PipelineConfig,
    grid: &Grid,
    aois: &[String],
) -> Result<BTreeMap<String, PathBuf>, ResolveError> {
    let mut sources = BTreeMap::new();
    for aoi in aois {
        match partition(grid, aoi, &config.slug) {
            Ok(subgrid) if !subgrid.is_empty() => {
                sources.insert(aoi.clone(), resolve_source(config, aoi)?);
            }
            Ok(_) | Err(_) => {}
        }
    }
    Ok(sources)
}

/// Runs the whole pipeline for `config`.
///
/// # Errors
///
/// Returns [`PipelineError`] for invalid configuration, a missing or empty
/// grid, unresolvable sources, a failed AOI (unless
/// `execution.continue_on_error` is set), an all-empty result, or output
/// failures.
pub async fn run(
    config: &PipelineConfig,
    extractor: Arc<dyn LayerExtractor>,
    progress: Arc<dyn ProgressCallback>,
) -> Result<RunSummary, PipelineError> {
    config.validate()?;

    let grid_path = config
        .grid_path()
        .ok_or_else(|| ConfigError::Invalid("No grid path".to_string()))?;
    let grid = load_grid(
        &grid_path,
        GridColumns {
            id: &config.grid.cell_id_column,
            aoi: &config.grid.aoi_column,
        },
    )?;
    h3::report_non_h3_ids(&grid, config.grid.resolution);

    let mut aois = config.aoi_names();
    if aois.is_empty() {
        aois = grid.aoi_names();
    }
    let run_slug = config
        .run_slug()
        .unwrap_or_else(|| config.slug.run_slug(&aois));
    log::info!("Run '{run_slug}': {} AOIs, {} cells", aois.len(), grid.len());

    let sources = if extractor.needs_source() {
        resolve_sources(config, &grid, &aois)?
    } else {
        BTreeMap::new()
    };

    let context = Arc::new(RunContext {
        grid,
        slug: config.slug.clone(),
        cache: CacheStore::new(config.cache_dir())
            .with_lock_timing(config.execution.lock_poll(), config.execution.stale_lock()),
        extractor,
        sources,
    });

    progress.set_total(u64::try_from(aois.len()).unwrap_or(u64::MAX));

    let mut results = stream::iter(aois.into_iter().map(|aoi| {
        let context = Arc::clone(&context);
        async move {
            let name = aoi.clone();
            let result = tokio::task::spawn_blocking(move || context.process(&name)).await;
            (aoi, result)
        }
    }))
    .buffered(config.execution.workers);

    let mut parts = Vec::new();
    let mut processed = Vec::new();
    let mut skipped = Vec::new();
    let mut cache_hits = 0;
    let mut extracted = 0;

    while let Some((aoi, result)) = results.next().await {
        progress.set_message(aoi.clone());
        progress.inc(1);

        match result.map_err(PipelineError::from).and_then(|r| r) {
            Ok(output) if output.table.is_empty() => skipped.push(aoi),
            Ok(output) => {
                cache_hits += output.cache_hits;
                extracted += output.extracted;
                processed.push(aoi.clone());
                parts.push((aoi, output.table));
            }
            Err(e) => {
                let e = PipelineError::Aoi {
                    aoi: aoi.clone(),
                    source: Box::new(e),
                };
                if config.execution.continue_on_error && !e.is_fatal() {
                    log::error!("{e}; skipping");
                    skipped.push(aoi);
                } else {
                    return Err(e);
                }
            }
        }
    }

    let table = sanitize_table(merge(parts)?, config.output.max_column_len)?;
    let schema = table.category_schema();
    let output = config.output_path();

    let rows = {
        let output = output.clone();
        let table_name = config.output.table_name.clone();
        let table = table.clone();
        let schema = schema.clone();
        tokio::task::spawn_blocking(move || {
            hex_features_database::write_table(&output, &table_name, &table, &schema)
        })
        .await??
    };
    log::info!("Wrote {rows} cells to {}", output.display());

    let sidecar = schema_sidecar(&output);
    RunMetadata {
        run_slug: run_slug.clone(),
        generated_at: chrono::Utc::now(),
        table: config.output.table_name.clone(),
        id_column: table.id_column().to_string(),
        cells: table.len(),
        aois_processed: processed.clone(),
        aois_skipped: skipped.clone(),
        columns: table.column_info(),
        category_keys: schema,
    }
    .write(&sidecar)?;

    progress.finish(format!("{} AOIs, {} cells", processed.len(), table.len()));

    Ok(RunSummary {
        run_slug,
        output,
        sidecar,
        cells: table.len(),
        columns: table.columns().len(),
        aois_processed: processed,
        aois_skipped: skipped,
        cache_hits,
        extracted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use geo::{Polygon, line_string, point, polygon};
    use hex_features_grid::{Crs, Grid, GridCell, grid_to_geojson_string};
    use hex_features_layer::extract::{ExtractArea, ExtractError};
    use hex_features_layer::{Feature, FeatureLayer, LayerKind};

    use crate::progress::null_progress;

    /// Puts one road, one building and one cafe just inside the south-west
    /// corner of every area; land use and natural layers stay empty.
    struct FixtureExtractor {
        calls: AtomicUsize,
        fail_for: Option<&'static str>,
        needs_source: bool,
    }

    impl FixtureExtractor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_for: None,
                needs_source: false,
            }
        }

        /// Requires a resolved source file for every extraction.
        fn reading_sources() -> Self {
            Self {
                needs_source: true,
                ..Self::new()
            }
        }

        fn failing_for(aoi: &'static str) -> Self {
            Self {
                fail_for: Some(aoi),
                ..Self::new()
            }
        }
    }

    impl LayerExtractor for FixtureExtractor {
        fn needs_source(&self) -> bool {
            self.needs_source
        }

        fn extract(&self, kind: LayerKind, area: &ExtractArea) -> Result<FeatureLayer, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_for == Some(area.name.as_str()) {
                return Err(ExtractError::Other(format!("no data for {}", area.name)));
            }
            if self.needs_source && !area.source.is_file() {
                return Err(ExtractError::Other(format!("no source for {}", area.name)));
            }

            let x = area.bounds.min().x + 0.0005;
            let y = area.bounds.min().y + 0.0005;
            let features = match kind {
                LayerKind::Roads => vec![
                    Feature::new(line_string![(x: x, y: y), (x: x + 0.0002, y: y)].into())
                        .with("highway", "residential")
                        .with("lanes", "2"),
                ],
                LayerKind::Buildings => vec![
                    Feature::new(
                        polygon![
                            (x: x, y: y),
                            (x: x + 0.0001, y: y),
                            (x: x + 0.0001, y: y + 0.0001),
                            (x: x, y: y + 0.0001),
                        ]
                        .into(),
                    )
                    .with("building", "house"),
                ],
                LayerKind::Pois => vec![Feature::new(point!(x: x, y: y).into()).with("amenity", "cafe")],
                LayerKind::Landuse | LayerKind::Natural => Vec::new(),
            };
            Ok(FeatureLayer::new(kind, Crs::Wgs84, features))
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "hex_features_pipeline_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cell(x: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: 0.0),
            (x: x + 0.001, y: 0.0),
            (x: x + 0.001, y: 0.001),
            (x: x, y: 0.001),
        ]
    }

    /// Writes a two-AOI grid and returns a config pointing into `dir`.
    fn setup(dir: &Path) -> PipelineConfig {
        let grid = Grid::new(
            Crs::Wgs84,
            "h3_id",
            vec![
                GridCell::new("a1", cell(0.0), "Alpha"),
                GridCell::new("a2", cell(0.001), "Alpha"),
                GridCell::new("b1", cell(1.0), "Beta"),
            ],
        )
        .unwrap();
        let grid_path = dir.join("grid.geojson");
        std::fs::write(&grid_path, grid_to_geojson_string(&grid, "aoi_name")).unwrap();

        let mut config = PipelineConfig {
            run_slug: Some("test".to_string()),
            ..PipelineConfig::default()
        };
        config.paths.grid = Some(grid_path);
        config.paths.cache = Some(dir.join("cache"));
        config.paths.output = Some(dir.join("out").join("test.duckdb"));
        config.execution.lock_poll_ms = 10;
        config
    }

    #[tokio::test]
    async fn full_run_writes_output_and_reuses_the_cache() {
        let dir = scratch("full");
        let config = setup(&dir);
        let extractor = Arc::new(FixtureExtractor::new());

        let summary = run(&config, extractor.clone(), null_progress()).await.unwrap();

        assert_eq!(summary.cells, 3);
        assert_eq!(summary.aois_processed, vec!["Alpha", "Beta"]);
        assert!(summary.aois_skipped.is_empty());
        assert_eq!(summary.extracted, 10);
        assert_eq!(summary.cache_hits, 0);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 10);

        let conn = hex_features_database::open(&summary.output).unwrap();
        assert_eq!(hex_features_database::row_count(&conn, "hex_features").unwrap(), 3);
        let (cafes, aoi): (i32, String) = conn
            .query_row(
                "SELECT poi_cafe, aoi_name FROM hex_features WHERE h3_id = 'b1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(cafes, 1);
        assert_eq!(aoi, "Beta");
        let empty_cell: i32 = conn
            .query_row(
                "SELECT poi_cafe FROM hex_features WHERE h3_id = 'a2'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(empty_cell, 0);
        drop(conn);

        let metadata = RunMetadata::read(&summary.sidecar).unwrap();
        assert_eq!(metadata.run_slug, "test");
        assert_eq!(metadata.cells, 3);
        let keys: Vec<&str> = metadata
            .category_keys
            .entries()
            .iter()
            .map(|e| e.column.as_str())
            .collect();
        assert_eq!(keys, vec!["highway_residential", "building_house", "poi_cafe"]);

        let again = run(&config, extractor.clone(), null_progress()).await.unwrap();
        assert_eq!(again.extracted, 0);
        assert_eq!(again.cache_hits, 10);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 10);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn worker_count_does_not_change_the_result() {
        let mut sidecars = Vec::new();
        for workers in [1, 2] {
            let dir = scratch(&format!("workers_{workers}"));
            let mut config = setup(&dir);
            config.execution.workers = workers;

            let summary = run(&config, Arc::new(FixtureExtractor::new()), null_progress())
                .await
                .unwrap();
            let metadata = RunMetadata::read(&summary.sidecar).unwrap();
            sidecars.push((metadata.columns, metadata.category_keys, metadata.aois_processed));

            std::fs::remove_dir_all(&dir).unwrap();
        }
        assert_eq!(sidecars[0], sidecars[1]);
    }

    #[tokio::test]
    async fn failed_aoi_aborts_unless_told_to_continue() {
        let dir = scratch("continue");
        let mut config = setup(&dir);
        let extractor = Arc::new(FixtureExtractor::failing_for("Beta"));

        let err = run(&config, extractor.clone(), null_progress())
            .await
            .unwrap_err();
        assert!(matches!(&err, PipelineError::Aoi { aoi, .. } if aoi == "Beta"));
        assert!(!err.is_fatal());

        config.execution.continue_on_error = true;
        let summary = run(&config, extractor, null_progress()).await.unwrap();
        assert_eq!(summary.aois_processed, vec!["Alpha"]);
        assert_eq!(summary.aois_skipped, vec!["Beta"]);
        assert_eq!(summary.cells, 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn nothing_processed_is_an_error() {
        let dir = scratch("all_empty");
        let mut config = setup(&dir);
        config.aois = vec!["Gamma".to_string()];

        let err = run(&config, Arc::new(FixtureExtractor::new()), null_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Merge(MergeError::AllEmpty)));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn aoi_without_cells_needs_no_source() {
        let dir = scratch("stale_grid");
        let mut config = setup(&dir);
        let sources = dir.join("pbf");
        std::fs::create_dir_all(&sources).unwrap();
        std::fs::write(sources.join("alpha.osm.pbf"), b"").unwrap();
        config.paths.sources = Some(sources);
        config.aois = vec!["Alpha".to_string(), "Gamma".to_string()];

        let summary = run(&config, Arc::new(FixtureExtractor::reading_sources()), null_progress())
            .await
            .unwrap();

        assert_eq!(summary.aois_processed, vec!["Alpha"]);
        assert_eq!(summary.aois_skipped, vec!["Gamma"]);
        assert_eq!(summary.cells, 2);
        assert_eq!(summary.extracted, 5);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn missing_inputs_abort_immediately() {
        let dir = scratch("missing");
        let mut config = setup(&dir);
        config.paths.grid = Some(dir.join("nope.geojson"));

        let err = run(&config, Arc::new(FixtureExtractor::new()), null_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Grid(LoadError::Missing(_))));
        assert!(err.is_fatal());

        let mut config = setup(&dir);
        let extractor = Arc::new(hex_features_layer::extract::Ogr2OgrExtractor::default());
        config.paths.sources = Some(dir.join("pbf"));
        let err = run(&config, extractor, null_progress()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Resolve(_)));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
