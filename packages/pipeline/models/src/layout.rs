//! Conventional locations under the data root.

use std::path::{Path, PathBuf};

/// Directory convention for inputs, cache and outputs:
///
/// ```text
/// {root}/external/pbf/                                 extractor sources
/// {root}/external/cache/                               cached layers
/// {root}/processed/grid/{slug}_res{r}.geojson          grid
/// {root}/processed/osm/{slug}_osm_hex_features.duckdb  output
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn sources_dir(&self) -> PathBuf {
        self.root.join("external").join("pbf")
    }

    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("external").join("cache")
    }

    #[must_use]
    pub fn grid_path(&self, run_slug: &str, resolution: u8) -> PathBuf {
        self.root
            .join("processed")
            .join("grid")
            .join(format!("{run_slug}_res{resolution}.geojson"))
    }

    #[must_use]
    pub fn output_path(&self, run_slug: &str) -> PathBuf {
        self.root
            .join("processed")
            .join("osm")
            .join(format!("{run_slug}_osm_hex_features.duckdb"))
    }
}

/// Path of the metadata sidecar written next to `output`.
#[must_use]
pub fn schema_sidecar(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".schema.json");
    PathBuf::from(name)
}
