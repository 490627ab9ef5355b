//! The JSON sidecar written next to the output database.

use std::path::Path;

use chrono::{DateTime, Utc};
use hex_features_aggregate::{CategorySchema, ColumnInfo};
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Describes one completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_slug: String,
    pub generated_at: DateTime<Utc>,
    /// Output table name inside the database.
    pub table: String,
    pub id_column: String,
    pub cells: usize,
    pub aois_processed: Vec<String>,
    pub aois_skipped: Vec<String>,
    /// Output columns other than the id and geometry.
    pub columns: Vec<ColumnInfo>,
    pub category_keys: CategorySchema,
}

impl RunMetadata {
    /// Writes the sidecar as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if encoding or writing fails.
    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| PipelineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        log::info!("Wrote run metadata to {}", path.display());
        Ok(())
    }

    /// Reads a sidecar back.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if reading or decoding fails.
    pub fn read(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}
