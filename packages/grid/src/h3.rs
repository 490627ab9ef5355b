//! H3 helpers.
//!
//! Grid ids stay opaque to the aggregation core, but grids are normally
//! generated from H3 cells, so these helpers build cells from H3 indices
//! and check an incoming grid against the expected resolution.

use geo::{LineString, Polygon};
use h3o::{CellIndex, LatLng, Resolution};
use hex_features_grid_models::{Grid, GridCell, GridError};
use hex_features_layer::Crs;

/// H3 helper failures.
#[derive(Debug, thiserror::Error)]
pub enum H3Error {
    /// The id is not an H3 cell index.
    #[error("Invalid H3 cell index '{0}'")]
    InvalidIndex(String),

    /// The resolution is outside `0..=15`.
    #[error("Invalid H3 resolution {0}")]
    InvalidResolution(u8),

    /// The coordinate is not a valid latitude/longitude.
    #[error("Invalid coordinate ({lng}, {lat})")]
    InvalidCoordinate {
        /// Longitude in degrees.
        lng: f64,
        /// Latitude in degrees.
        lat: f64,
    },

    /// The resulting grid is invalid.
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Parses an H3 index from its hexadecimal or decimal form.
#[must_use]
pub fn parse_cell(id: &str) -> Option<CellIndex> {
    id.parse::<CellIndex>()
        .ok()
        .or_else(|| id.parse::<u64>().ok().and_then(|n| CellIndex::try_from(n).ok()))
}

/// The boundary of `cell` as a closed WGS84 polygon.
#[must_use]
pub fn cell_polygon(cell: CellIndex) -> Polygon<f64> {
    let ring: Vec<(f64, f64)> = cell
        .boundary()
        .iter()
        .map(|ll| (ll.lng(), ll.lat()))
        .collect();
    Polygon::new(LineString::from(ring), vec![])
}

/// The cell containing a WGS84 coordinate at `resolution`.
///
/// # Errors
///
/// Returns [`H3Error`] if the coordinate or resolution is invalid.
pub fn cell_at(lng: f64, lat: f64, resolution: u8) -> Result<CellIndex, H3Error> {
    let resolution =
        Resolution::try_from(resolution).map_err(|_| H3Error::InvalidResolution(resolution))?;
    let ll = LatLng::new(lat, lng).map_err(|_| H3Error::InvalidCoordinate { lng, lat })?;
    Ok(ll.to_cell(resolution))
}

/// Builds a WGS84 grid from `(h3 id, aoi name)` pairs, in order.
///
/// # Errors
///
/// Returns [`H3Error::InvalidIndex`] for ids that are not H3 indices and
/// [`H3Error::Grid`] for duplicates.
pub fn grid_from_h3_ids<'a>(
    id_column: &str,
    ids: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<Grid, H3Error> {
    let cells = ids
        .into_iter()
        .map(|(id, aoi)| {
            let cell = parse_cell(id).ok_or_else(|| H3Error::InvalidIndex(id.to_string()))?;
            Ok(GridCell::new(id, cell_polygon(cell), aoi))
        })
        .collect::<Result<Vec<_>, H3Error>>()?;
    Ok(Grid::new(Crs::Wgs84, id_column, cells)?)
}

/// Grid ids that are not H3 indices at `resolution`.
///
/// Such ids are still valid grid ids; this is a consistency report.
#[must_use]
pub fn non_h3_ids(grid: &Grid, resolution: u8) -> Vec<&str> {
    let expected = Resolution::try_from(resolution).ok();
    grid.cells()
        .iter()
        .filter(|cell| {
            parse_cell(&cell.id).is_none_or(|c| expected.is_some_and(|r| c.resolution() != r))
        })
        .map(|cell| cell.id.as_str())
        .collect()
}

/// Logs how many grid ids do not match H3 at `resolution`.
pub fn report_non_h3_ids(grid: &Grid, resolution: u8) {
    let odd = non_h3_ids(grid, resolution);
    if odd.is_empty() {
        return;
    }
    log::debug!(
        "{} of {} grid ids are not H3 resolution {resolution} cells (first: {})",
        odd.len(),
        grid.len(),
        odd[0]
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Contains, point};

    #[test]
    fn cell_polygon_contains_its_point() {
        let cell = cell_at(144.9631, -37.8136, 9).unwrap();
        let polygon = cell_polygon(cell);
        assert!(polygon.contains(&point!(x: 144.9631, y: -37.8136)));
        assert!(polygon.exterior().is_closed());
    }

    #[test]
    fn parses_hex_and_decimal_forms() {
        let cell = cell_at(144.9631, -37.8136, 9).unwrap();
        assert_eq!(parse_cell(&cell.to_string()), Some(cell));
        assert_eq!(parse_cell(&u64::from(cell).to_string()), Some(cell));
        assert_eq!(parse_cell("not-a-cell"), None);
    }

    #[test]
    fn builds_grid_and_reports_odd_ids() {
        let a = cell_at(144.9631, -37.8136, 9).unwrap().to_string();
        let b = cell_at(145.0, -37.8, 9).unwrap().to_string();
        let grid = grid_from_h3_ids("h3_id", [(a.as_str(), "Melbourne"), (b.as_str(), "Yarra")])
            .unwrap();
        assert_eq!(grid.len(), 2);
        assert!(non_h3_ids(&grid, 9).is_empty());
        assert_eq!(non_h3_ids(&grid, 8).len(), 2);

        assert!(matches!(
            grid_from_h3_ids("h3_id", [("zzz", "X")]),
            Err(H3Error::InvalidIndex(_))
        ));
    }
}
