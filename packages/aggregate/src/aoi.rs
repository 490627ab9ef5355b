//! Splitting a grid by area of interest and stacking the per-area results.

use hex_features_aggregate_models::{CellTable, TableError};
use hex_features_grid_models::{Grid, SlugRule};

/// Name of the column that records each row's area of interest.
pub const AOI_COLUMN: &str = "aoi_name";

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    /// Several distinct AOI names in the grid share the requested slug.
    #[error("AOI '{aoi}' matches several grid AOIs by slug '{slug}': {candidates:?}")]
    AmbiguousAoi {
        aoi: String,
        slug: String,
        candidates: Vec<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// No AOI produced any rows.
    #[error("Every AOI table is empty")]
    AllEmpty,
    #[error(transparent)]
    Table(#[from] TableError),
}

/// The cells of `grid` belonging to `aoi_name`.
///
/// A grid AOI with exactly that name is used as is. Otherwise the grid AOI
/// whose slug equals the slug of `aoi_name` is used. No match yields an
/// empty grid with the same CRS and id column.
///
/// # Errors
///
/// Returns [`PartitionError::AmbiguousAoi`] if more than one distinct grid
/// AOI name shares the slug.
pub fn partition(grid: &Grid, aoi_name: &str, rule: &SlugRule) -> Result<Grid, PartitionError> {
    let names = grid.aoi_names();

    if names.iter().any(|n| n == aoi_name) {
        return Ok(grid.filtered(|c| c.aoi_name == aoi_name));
    }

    let slug = rule.slugify(aoi_name);
    let candidates: Vec<String> = names
        .into_iter()
        .filter(|n| rule.slugify(n) == slug)
        .collect();

    match candidates.as_slice() {
        [] => {
            log::warn!("AOI '{aoi_name}' has no cells in the grid");
            Ok(grid.empty_like())
        }
        [name] => {
            log::debug!("AOI '{aoi_name}' matched grid AOI '{name}' by slug '{slug}'");
            Ok(grid.filtered(|c| &c.aoi_name == name))
        }
        _ => Err(PartitionError::AmbiguousAoi {
            aoi: aoi_name.to_string(),
            slug,
            candidates,
        }),
    }
}

/// Stacks per-AOI tables in the given order.
///
/// Empty tables are skipped. Columns are the union of all tables' columns;
/// rows from a table lacking a column get missing values. Every row's
/// [`AOI_COLUMN`] is set to the name it was passed with, and that column
/// leads the data columns.
///
/// # Errors
///
/// Returns [`MergeError::AllEmpty`] if there are no rows at all, or
/// [`MergeError::Table`] if the tables cannot be combined.
pub fn merge(parts: Vec<(String, CellTable)>) -> Result<CellTable, MergeError> {
    let total = parts.len();
    let tables: Vec<CellTable> = parts
        .into_iter()
        .filter_map(|(aoi_name, mut table)| {
            if table.is_empty() {
                log::debug!("Skipping empty table for AOI '{aoi_name}'");
                return None;
            }
            table.stamp_text(AOI_COLUMN, &aoi_name);
            Some(table)
        })
        .collect();

    log::info!("Merging {} of {total} AOI tables", tables.len());

    CellTable::concat(tables)?.ok_or(MergeError::AllEmpty)
}
