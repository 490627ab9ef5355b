//! Output schema sanitizing.
//!
//! Column names are normalized for the output database and values are
//! narrowed to the storage types it expects. Sanitizing an already
//! sanitized table changes nothing.

use std::collections::HashSet;
use std::sync::LazyLock;

use hex_features_aggregate_models::{CellTable, Column, ColumnData, TableError};
use regex::Regex;

/// Reserved name of the geometry column.
pub const GEOMETRY_COLUMN: &str = "geometry";

/// Name used when sanitizing leaves nothing behind.
const FALLBACK_NAME: &str = "column";

static INVALID_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_]").expect("valid regex"));

static REPEATED_UNDERSCORES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_{2,}").expect("valid regex"));

/// Normalizes one column name.
///
/// Lowercases, replaces every character outside `[a-z0-9_]` with `_`,
/// collapses runs of `_`, trims `_` from both ends and truncates to
/// `max_len` characters.
#[must_use]
pub fn sanitize_name(name: &str, max_len: usize) -> String {
    let lower = name.to_lowercase();
    let replaced = INVALID_CHARS_RE.replace_all(&lower, "_");
    let collapsed = REPEATED_UNDERSCORES_RE.replace_all(&replaced, "_");
    let name = truncate(collapsed.trim_matches('_'), max_len);
    if name.is_empty() {
        truncate(FALLBACK_NAME, max_len).to_string()
    } else {
        name.to_string()
    }
}

/// Cuts an ASCII name to at most `max_len` bytes and drops trailing `_`.
fn truncate(name: &str, max_len: usize) -> &str {
    name.get(..max_len).unwrap_or(name).trim_end_matches('_')
}

/// Picks a name not yet in `used`, appending `_2`, `_3`, ... and
/// shortening the base so the result stays within `max_len`.
fn dedupe(used: &mut HashSet<String>, name: String, max_len: usize) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let mut n = 2_usize;
    loop {
        let suffix = format!("_{n}");
        let stem = truncate(&name, max_len.saturating_sub(suffix.len()));
        let candidate = format!("{stem}{suffix}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Narrows a column to its storage type.
fn narrow(name: &str, data: ColumnData) -> ColumnData {
    match data {
        ColumnData::Bool(values) => ColumnData::Int8(
            values
                .into_iter()
                .map(|v| i8::from(v.unwrap_or(false)))
                .collect(),
        ),
        ColumnData::Int64(values) => {
            let mut clamped = 0_usize;
            let narrowed = values
                .into_iter()
                .map(|v| {
                    let v = v.unwrap_or(0);
                    i32::try_from(v).unwrap_or_else(|_| {
                        clamped += 1;
                        if v < 0 { i32::MIN } else { i32::MAX }
                    })
                })
                .collect();
            if clamped > 0 {
                log::warn!("Clamped {clamped} out-of-range values in column '{name}'");
            }
            ColumnData::Int32(narrowed)
        }
        ColumnData::Text(values) => ColumnData::Text(
            values
                .into_iter()
                .map(|v| Some(v.unwrap_or_default()))
                .collect(),
        ),
        data @ (ColumnData::Int8(_) | ColumnData::Int32(_) | ColumnData::Float64(_)) => data,
    }
}

/// Sanitizes every column name (the id column included) and narrows
/// column types. Indicator columns keep their category keys.
///
/// # Errors
///
/// Returns [`TableError`] if the rebuilt table is inconsistent, which
/// cannot happen for a table that was consistent on input.
pub fn sanitize_table(table: CellTable, max_len: usize) -> Result<CellTable, TableError> {
    let (id_column, ids, geometry, columns) = table.into_parts();

    let mut used = HashSet::new();
    if geometry.is_some() {
        used.insert(GEOMETRY_COLUMN.to_string());
    }
    let id_column = dedupe(&mut used, sanitize_name(&id_column, max_len), max_len);

    let mut renamed = 0_usize;
    let columns = columns
        .into_iter()
        .map(|column| {
            let name = dedupe(&mut used, sanitize_name(&column.name, max_len), max_len);
            if name != column.name {
                renamed += 1;
                log::debug!("Renamed column '{}' to '{name}'", column.name);
            }
            Column {
                data: narrow(&name, column.data),
                name,
                category: column.category,
            }
        })
        .collect::<Vec<_>>();

    if renamed > 0 {
        log::info!("Sanitized {renamed} column names");
    }

    CellTable::from_parts(id_column, ids, geometry, columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use hex_features_aggregate_models::CategoryKey;
    use hex_features_layer::LayerKind;

    #[test]
    fn names_are_normalized() {
        assert_eq!(sanitize_name("Building:Levels", 60), "building_levels");
        assert_eq!(sanitize_name("__poi  Café__", 60), "poi_caf");
        assert_eq!(sanitize_name("a--b..c", 60), "a_b_c");
        assert_eq!(sanitize_name("???", 60), "column");
        assert_eq!(sanitize_name("abcdef_ghij", 7), "abcdef");
    }

    #[test]
    fn collisions_get_numbered_suffixes_within_the_bound() {
        let mut table = CellTable::new("h3_id", vec!["h1".to_string()]);
        for name in ["Surface:Asphalt", "surface_asphalt", "surface asphalt"] {
            table
                .push_column(Column::new(name, ColumnData::Float64(vec![1.0])))
                .unwrap();
        }
        let mut long = CellTable::new("h3_id", vec!["h1".to_string()]);
        for name in ["landuse_residential", "landuse-residential"] {
            long.push_column(Column::new(name, ColumnData::Float64(vec![1.0])))
                .unwrap();
        }

        let table = sanitize_table(table, 60).unwrap();
        let long = sanitize_table(long, 12).unwrap();

        assert_eq!(
            table.column_names(),
            vec!["surface_asphalt", "surface_asphalt_2", "surface_asphalt_3"]
        );
        assert_eq!(long.column_names(), vec!["landuse_resi", "landuse_re_2"]);
    }

    #[test]
    fn id_and_geometry_names_take_part_in_deduplication() {
        let polygon = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)];
        let mut table = CellTable::new("H3 ID", vec!["h1".to_string()])
            .with_geometry(vec![polygon])
            .unwrap();
        table
            .push_column(Column::new("h3_id", ColumnData::Int8(vec![1])))
            .unwrap();
        table
            .push_column(Column::new("Geometry", ColumnData::Int8(vec![1])))
            .unwrap();

        let table = sanitize_table(table, 60).unwrap();

        assert_eq!(table.id_column(), "h3_id");
        assert_eq!(table.column_names(), vec!["h3_id_2", "geometry_2"]);
    }

    #[test]
    fn types_are_narrowed_and_nulls_filled() {
        let mut table = CellTable::new("h3_id", vec!["h1".to_string(), "h2".to_string()]);
        table
            .push_column(Column::new("flag", ColumnData::Bool(vec![Some(true), None])))
            .unwrap();
        table
            .push_column(Column::new(
                "count",
                ColumnData::Int64(vec![None, Some(i64::MAX)]),
            ))
            .unwrap();
        table
            .push_column(Column::new(
                "label",
                ColumnData::Text(vec![None, Some("x".to_string())]),
            ))
            .unwrap();
        table
            .push_column(Column::new(
                "avg",
                ColumnData::Float64(vec![f64::NAN, 1.5]),
            ))
            .unwrap();

        let table = sanitize_table(table, 60).unwrap();

        assert_eq!(table.column("flag").unwrap().data, ColumnData::Int8(vec![1, 0]));
        assert_eq!(
            table.column("count").unwrap().data,
            ColumnData::Int32(vec![0, i32::MAX])
        );
        assert_eq!(
            table.column("label").unwrap().data,
            ColumnData::Text(vec![Some(String::new()), Some("x".to_string())])
        );
        assert_eq!(table.number("h1", "avg"), None);
        assert_eq!(table.number("h2", "avg"), Some(1.5));
    }

    #[test]
    fn sanitizing_twice_changes_nothing() {
        let key = CategoryKey::new(LayerKind::Roads, "surface", "Paving Stones");
        let mut table = CellTable::new("Cell-Id", vec!["h1".to_string()]);
        table
            .push_column(Column::indicator("surface_Paving Stones", key.clone(), vec![Some(1)]))
            .unwrap();
        table
            .push_column(Column::new("surface_paving_stones", ColumnData::Bool(vec![None])))
            .unwrap();
        table
            .push_column(Column::new("a_very_long_column_name_indeed", ColumnData::Float64(vec![2.0])))
            .unwrap();
        table
            .push_column(Column::new("a_very_long_column_name_indeed!", ColumnData::Float64(vec![3.0])))
            .unwrap();

        let once = sanitize_table(table, 16).unwrap();
        let twice = sanitize_table(once.clone(), 16).unwrap();

        assert_eq!(once, twice);
        let names = once.column_names();
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(unique.len(), names.len());
        assert!(names.iter().all(|n| n.len() <= 16));
        assert_eq!(
            once.category_schema().column_for(&key),
            Some("surface_paving_s")
        );
    }
}
