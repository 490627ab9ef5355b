#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Aggregated cell table types.
//!
//! The aggregation engine produces a [`CellTable`] per layer, joins them
//! per AOI, and stacks AOIs into the final run table. Indicator columns
//! carry their [`CategoryKey`], from which the run's [`CategorySchema`] is
//! read back after sanitizing.

pub mod schema;
pub mod table;

pub use schema::{CategoryColumn, CategoryKey, CategorySchema};
pub use table::{CellTable, Column, ColumnData, ColumnInfo, ColumnType, TableError};
