#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Configuration for a hex feature run.
//!
//! A [`PipelineConfig`] is read from TOML; every section and field is
//! optional and falls back to the defaults below. Paths that are not set
//! explicitly are derived from the data root through [`DataLayout`].

pub mod layout;

use std::path::{Path, PathBuf};
use std::time::Duration;

use hex_features_grid_models::{SlugRule, ensure_country};
use serde::{Deserialize, Serialize};

pub use layout::{DataLayout, schema_sidecar};

/// Smallest allowed output column name length.
pub const MIN_COLUMN_LEN: usize = 8;

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or the run is underspecified.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the conventional data layout.
    pub data_root: PathBuf,
    pub grid: Option<PathBuf>,
    pub cache: Option<PathBuf>,
    pub sources: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            grid: None,
            cache: None,
            sources: None,
            output: None,
        }
    }
}

/// Grid input columns and resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub cell_id_column: String,
    pub aoi_column: String,
    /// Resolution used in the conventional grid file name and for H3 id
    /// checks.
    pub resolution: u8,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_id_column: "h3_id".to_string(),
            aoi_column: "aoi_name".to_string(),
            resolution: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Longest column name after sanitizing.
    pub max_column_len: usize,
    pub table_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_column_len: 60,
            table_name: "hex_features".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// AOIs processed concurrently; 1 is sequential.
    pub workers: usize,
    /// Log and skip an AOI that fails instead of aborting the run.
    pub continue_on_error: bool,
    /// How often a worker waiting on a cache lock checks again.
    pub lock_poll_ms: u64,
    /// Age after which a cache lock is considered abandoned.
    pub stale_lock_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            continue_on_error: false,
            lock_poll_ms: 200,
            stale_lock_secs: 3600,
        }
    }
}

impl ExecutionConfig {
    #[must_use]
    pub const fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }

    #[must_use]
    pub const fn stale_lock(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }
}

/// Everything a run needs to know.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub grid: GridConfig,
    pub slug: SlugRule,
    pub output: OutputConfig,
    pub execution: ExecutionConfig,
    /// AOIs to process, in order. Empty means every AOI in the grid.
    pub aois: Vec<String>,
    /// Appended to AOI names that do not already mention it.
    pub country: Option<String>,
    /// Names the run's grid and output files. Defaults to the slugs of
    /// `aois` joined together.
    pub run_slug: Option<String>,
}

impl PipelineConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document does not match.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml)?)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    #[must_use]
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.paths.data_root)
    }

    /// Requested AOI names with the country suffix applied.
    #[must_use]
    pub fn aoi_names(&self) -> Vec<String> {
        self.aois
            .iter()
            .map(|aoi| match &self.country {
                Some(country) => ensure_country(aoi, country),
                None => aoi.clone(),
            })
            .collect()
    }

    /// The run slug, if one is configured or can be derived from `aois`.
    #[must_use]
    pub fn run_slug(&self) -> Option<String> {
        if let Some(slug) = &self.run_slug {
            return Some(slug.clone());
        }
        let aois = self.aoi_names();
        (!aois.is_empty()).then(|| self.slug.run_slug(&aois))
    }

    /// Grid file: the explicit path, or the conventional one for the run
    /// slug.
    #[must_use]
    pub fn grid_path(&self) -> Option<PathBuf> {
        self.paths.grid.clone().or_else(|| {
            self.run_slug()
                .map(|slug| self.layout().grid_path(&slug, self.grid.resolution))
        })
    }

    /// Output database: the explicit path, or the conventional one for the
    /// run slug (`hex_features` when there is none).
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.paths.output.clone().unwrap_or_else(|| {
            let slug = self
                .run_slug()
                .unwrap_or_else(|| self.output.table_name.clone());
            self.layout().output_path(&slug)
        })
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.paths
            .cache
            .clone()
            .unwrap_or_else(|| self.layout().cache_dir())
    }

    #[must_use]
    pub fn sources_dir(&self) -> PathBuf {
        self.paths
            .sources
            .clone()
            .unwrap_or_else(|| self.layout().sources_dir())
    }

    /// Checks ranges and that a grid file can be located.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.max_column_len < MIN_COLUMN_LEN {
            return Err(ConfigError::Invalid(format!(
                "output.max_column_len must be at least {MIN_COLUMN_LEN}, got {}",
                self.output.max_column_len
            )));
        }
        if self.execution.workers == 0 {
            return Err(ConfigError::Invalid(
                "execution.workers must be at least 1".to_string(),
            ));
        }
        if self.output.table_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "output.table_name must not be empty".to_string(),
            ));
        }
        if self.grid_path().is_none() {
            return Err(ConfigError::Invalid(
                "No grid path: set paths.grid, run_slug, or at least one AOI".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.output.max_column_len, 60);
        assert_eq!(config.execution.workers, 1);
        assert_eq!(config.grid.cell_id_column, "h3_id");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(msg)) if msg.contains("grid path")
        ));
    }

    #[test]
    fn paths_follow_the_data_layout() {
        let config = PipelineConfig::from_toml_str(
            r#"
            aois = ["Melbourne", "Geelong, Australia"]
            country = "Australia"

            [paths]
            data_root = "/srv/data"

            [grid]
            resolution = 9

            [execution]
            workers = 4
            "#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(
            config.aoi_names(),
            vec!["Melbourne, Australia", "Geelong, Australia"]
        );
        assert_eq!(
            config.run_slug().as_deref(),
            Some("melbourne_australia_geelong_australia")
        );
        assert_eq!(
            config.grid_path().unwrap(),
            PathBuf::from("/srv/data/processed/grid/melbourne_australia_geelong_australia_res9.geojson")
        );
        assert_eq!(
            config.output_path(),
            PathBuf::from(
                "/srv/data/processed/osm/melbourne_australia_geelong_australia_osm_hex_features.duckdb"
            )
        );
        assert_eq!(config.cache_dir(), PathBuf::from("/srv/data/external/cache"));
        assert_eq!(config.sources_dir(), PathBuf::from("/srv/data/external/pbf"));
        assert_eq!(
            schema_sidecar(&config.output_path())
                .file_name()
                .and_then(|n| n.to_str()),
            Some("melbourne_australia_geelong_australia_osm_hex_features.duckdb.schema.json")
        );
    }

    #[test]
    fn explicit_paths_win() {
        let config = PipelineConfig::from_toml_str(
            r#"
            run_slug = "ignored"

            [paths]
            grid = "grid.geojson"
            output = "out.duckdb"
            "#,
        )
        .unwrap();

        assert_eq!(config.grid_path(), Some(PathBuf::from("grid.geojson")));
        assert_eq!(config.output_path(), PathBuf::from("out.duckdb"));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = PipelineConfig {
            run_slug: Some("x".to_string()),
            ..PipelineConfig::default()
        };
        config.output.max_column_len = 4;
        assert!(config.validate().is_err());

        config.output.max_column_len = 8;
        config.execution.workers = 0;
        assert!(config.validate().is_err());

        config.execution.workers = 2;
        config.validate().unwrap();

        assert!(matches!(
            PipelineConfig::from_toml_str("[execution]\nworkers = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
