#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for hex feature runs.
//!
//! `hex_features run` aggregates the configured AOIs onto their grid and
//! writes the `DuckDB` output; `hex_features resolve` shows which raw source
//! file an AOI would be extracted from.
//!
//! Logging goes through [`hex_features_cli_utils::init_logger`], so set
//! `RUST_LOG=info` (or `debug`) to see what the run is doing.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hex_features_cli_utils::IndicatifProgress;
use hex_features_layer::extract::Ogr2OgrExtractor;
use hex_features_pipeline_models::PipelineConfig;

#[derive(Parser)]
#[command(name = "hex_features", about = "Aggregate map feature layers onto a hexagonal grid")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand.
#[derive(clap::Args)]
struct ConfigArgs {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root of the data directory layout
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Country appended to AOI names that do not mention it
    #[arg(long)]
    country: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate feature layers for the configured AOIs
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Grid `GeoJSON` file
        #[arg(long)]
        grid: Option<PathBuf>,

        /// Output `DuckDB` file
        #[arg(long)]
        output: Option<PathBuf>,

        /// AOI to process (repeatable); defaults to every AOI in the grid
        #[arg(long = "aoi")]
        aois: Vec<String>,

        /// AOIs processed concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Grid resolution
        #[arg(long)]
        resolution: Option<u8>,

        /// Name used for the grid and output files
        #[arg(long)]
        run_slug: Option<String>,

        /// Skip AOIs that fail instead of aborting
        #[arg(long)]
        continue_on_error: bool,

        /// `ogr2ogr` executable
        #[arg(long, default_value = "ogr2ogr")]
        ogr2ogr: String,
    },
    /// Show the raw source file an AOI resolves to
    Resolve {
        /// AOI name
        aoi: String,

        #[command(flatten)]
        config: ConfigArgs,

        /// Directory holding `.osm.pbf` sources
        #[arg(long)]
        sources_dir: Option<PathBuf>,
    },
}

fn load_config(args: &ConfigArgs) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => {
            log::debug!("Loading config from {}", path.display());
            PipelineConfig::load(path)?
        }
        None => PipelineConfig::default(),
    };
    if let Some(root) = &args.data_root {
        config.paths.data_root.clone_from(root);
    }
    if args.country.is_some() {
        config.country.clone_from(&args.country);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = hex_features_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config: args,
            grid,
            output,
            aois,
            workers,
            resolution,
            run_slug,
            continue_on_error,
            ogr2ogr,
        } => {
            let mut config = load_config(&args)?;
            if grid.is_some() {
                config.paths.grid = grid;
            }
            if output.is_some() {
                config.paths.output = output;
            }
            if !aois.is_empty() {
                config.aois = aois;
            }
            if let Some(workers) = workers {
                config.execution.workers = workers;
            }
            if let Some(resolution) = resolution {
                config.grid.resolution = resolution;
            }
            if run_slug.is_some() {
                config.run_slug = run_slug;
            }
            if continue_on_error {
                config.execution.continue_on_error = true;
            }

            let extractor = Arc::new(Ogr2OgrExtractor::with_program(ogr2ogr));
            let progress = IndicatifProgress::aois_bar(&multi);
            let summary = hex_features_pipeline::run(&config, extractor, progress).await?;

            println!();
            println!("Output:   {}", summary.output.display());
            println!("Metadata: {}", summary.sidecar.display());
            println!("Cells:    {} ({} columns)", summary.cells, summary.columns);
            println!(
                "AOIs:     {} processed, {} skipped",
                summary.aois_processed.len(),
                summary.aois_skipped.len()
            );
            println!(
                "Cache:    {} hits, {} extracted",
                summary.cache_hits, summary.extracted
            );
            for aoi in &summary.aois_skipped {
                println!("  skipped: {aoi}");
            }
        }
        Commands::Resolve {
            aoi,
            config: args,
            sources_dir,
        } => {
            let mut config = load_config(&args)?;
            if sources_dir.is_some() {
                config.paths.sources = sources_dir;
            }
            let aoi = match &config.country {
                Some(country) => hex_features_grid_models::ensure_country(&aoi, country),
                None => aoi,
            };

            let path = hex_features_pipeline::resolve_source(&config, &aoi)?;
            println!("{aoi} -> {}", path.display());
        }
    }

    Ok(())
}
