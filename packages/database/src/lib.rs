#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` storage for the aggregated hex feature table.
//!
//! The output file holds the cell table (geometry as `GeoJSON` TEXT, no
//! spatial extension required) and a `category_keys` table describing
//! which indicator column counts which category value.

pub mod output;

pub use output::{CATEGORY_KEYS_TABLE, DEFAULT_TABLE, open, row_count, write_table};

/// Errors that can occur while writing output databases.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Geometry encoding error.
    #[error("GeoJSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}
