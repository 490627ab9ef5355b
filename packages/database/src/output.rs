//! Writing a [`CellTable`] to a fresh `DuckDB` file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use duckdb::{Connection, Statement};
use hex_features_aggregate_models::{CategorySchema, CellTable, ColumnData, ColumnType};

use crate::DbError;

/// Default name of the cell table.
pub const DEFAULT_TABLE: &str = "hex_features";

/// Table mapping indicator columns to their category keys.
pub const CATEGORY_KEYS_TABLE: &str = "category_keys";

/// Upper bound on bound parameters per INSERT statement.
const CHUNK_PARAMS: usize = 20_000;

/// Opens (or creates) a `DuckDB` file.
///
/// # Errors
///
/// Returns [`DbError`] if the connection fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("SET threads = 4; SET memory_limit = '512MB';")?;
    Ok(conn)
}

/// Writes `table` and `schema` to `path`, replacing any existing file.
///
/// Returns the number of cell rows written.
///
/// # Errors
///
/// Returns [`DbError`] if the file cannot be replaced or any statement
/// fails.
pub fn write_table(
    path: &Path,
    table_name: &str,
    table: &CellTable,
    schema: &CategorySchema,
) -> Result<u64, DbError> {
    remove_existing(path)?;
    let conn = open(path)?;

    conn.execute_batch("BEGIN TRANSACTION;")?;
    create_cell_table(&conn, table_name, table)?;
    let rows = insert_cells(&conn, table_name, table)?;
    write_category_keys(&conn, schema)?;
    conn.execute_batch("COMMIT;")?;

    log::info!(
        "Wrote {rows} rows x {} columns to {} ({} category keys)",
        table.columns().len(),
        path.display(),
        schema.len()
    );

    Ok(rows)
}

/// Number of rows in `table_name`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn row_count(conn: &Connection, table_name: &str) -> Result<u64, DbError> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote(table_name)),
        [],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn remove_existing(path: &Path) -> Result<(), DbError> {
    let mut wal = path.as_os_str().to_owned();
    wal.push(".wal");
    for file in [path.to_path_buf(), PathBuf::from(wal)] {
        match std::fs::remove_file(&file) {
            Ok(()) => log::debug!("Removed existing {}", file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

const fn sql_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::Bool => "BOOLEAN",
        ColumnType::Int8 => "TINYINT",
        ColumnType::Int32 => "INTEGER",
        ColumnType::Int64 => "BIGINT",
        ColumnType::Float64 => "DOUBLE",
        ColumnType::Text => "VARCHAR",
    }
}

fn create_cell_table(conn: &Connection, table_name: &str, table: &CellTable) -> Result<(), DbError> {
    let mut sql = format!(
        "CREATE TABLE {} ({} VARCHAR NOT NULL",
        quote(table_name),
        quote(table.id_column())
    );
    if table.geometry().is_some() {
        sql.push_str(", geometry VARCHAR");
    }
    for column in table.columns() {
        let _ = write!(
            sql,
            ", {} {}",
            quote(&column.name),
            sql_type(column.data.column_type())
        );
    }
    sql.push_str(");");
    conn.execute_batch(&sql)?;
    Ok(())
}

fn insert_cells(conn: &Connection, table_name: &str, table: &CellTable) -> Result<u64, DbError> {
    if table.is_empty() {
        return Ok(0);
    }

    let geometry = table
        .geometry()
        .map(|polygons| {
            polygons
                .iter()
                .map(|p| serde_json::to_string(&geojson::Geometry::new(geojson::Value::from(p))))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    let per_row = 1 + usize::from(geometry.is_some()) + table.columns().len();
    let chunk_rows = (CHUNK_PARAMS / per_row).max(1);
    let placeholders = format!("({})", vec!["?"; per_row].join(", "));

    let mut total = 0_u64;
    let mut start = 0;
    while start < table.len() {
        let end = (start + chunk_rows).min(table.len());
        let sql = format!(
            "INSERT INTO {} VALUES {}",
            quote(table_name),
            vec![placeholders.as_str(); end - start].join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut param_idx = 1_usize;

        for row in start..end {
            stmt.raw_bind_parameter(param_idx, &table.ids()[row])?;
            param_idx += 1;
            if let Some(geometry) = &geometry {
                stmt.raw_bind_parameter(param_idx, &geometry[row])?;
                param_idx += 1;
            }
            for column in table.columns() {
                bind_value(&mut stmt, param_idx, &column.data, row)?;
                param_idx += 1;
            }
        }

        let rows = stmt.raw_execute()?;
        total += u64::try_from(rows).unwrap_or(0);
        start = end;
    }

    Ok(total)
}

fn bind_value(
    stmt: &mut Statement<'_>,
    idx: usize,
    data: &ColumnData,
    row: usize,
) -> Result<(), DbError> {
    match data {
        ColumnData::Bool(v) => stmt.raw_bind_parameter(idx, v[row])?,
        ColumnData::Int8(v) => stmt.raw_bind_parameter(idx, v[row])?,
        ColumnData::Int32(v) => stmt.raw_bind_parameter(idx, v[row])?,
        ColumnData::Int64(v) => stmt.raw_bind_parameter(idx, v[row])?,
        ColumnData::Float64(v) => {
            stmt.raw_bind_parameter(idx, Some(v[row]).filter(|n| !n.is_nan()))?;
        }
        ColumnData::Text(v) => stmt.raw_bind_parameter(idx, v[row].as_deref())?,
    }
    Ok(())
}

fn write_category_keys(conn: &Connection, schema: &CategorySchema) -> Result<(), DbError> {
    conn.execute_batch(&format!(
        "CREATE TABLE {} (
            column_name VARCHAR NOT NULL,
            layer VARCHAR NOT NULL,
            attribute VARCHAR NOT NULL,
            value VARCHAR NOT NULL
        );",
        quote(CATEGORY_KEYS_TABLE)
    ))?;

    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} VALUES (?, ?, ?, ?)",
        quote(CATEGORY_KEYS_TABLE)
    ))?;
    for entry in schema.entries() {
        stmt.execute(duckdb::params![
            entry.column,
            entry.key.layer.as_ref(),
            entry.key.attribute,
            entry.key.value,
        ])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use hex_features_aggregate_models::{CategoryKey, Column};
    use hex_features_layer_models::LayerKind;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hex_features_db_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample() -> CellTable {
        let square = |x: f64| polygon![(x: x, y: 0.0), (x: x + 1.0, y: 0.0), (x: x + 1.0, y: 1.0), (x: x, y: 1.0)];
        let mut table = CellTable::new("h3_id", vec!["h1".to_string(), "h2".to_string()])
            .with_geometry(vec![square(0.0), square(1.0)])
            .unwrap();
        table
            .push_column(Column::new("roads_count", ColumnData::Int32(vec![3, 0])))
            .unwrap();
        table
            .push_column(Column::new(
                "avg_building_area_m2",
                ColumnData::Float64(vec![12.5, f64::NAN]),
            ))
            .unwrap();
        table
            .push_column(Column::indicator(
                "poi_cafe",
                CategoryKey::new(LayerKind::Pois, "poi_type", "cafe"),
                vec![Some(1), Some(0)],
            ))
            .unwrap();
        table.stamp_text("aoi_name", "Alpha");
        table
    }

    #[test]
    fn writes_cells_and_category_keys() {
        let dir = scratch("write");
        let path = dir.join("out.duckdb");
        let table = sample();

        let rows = write_table(&path, DEFAULT_TABLE, &table, &table.category_schema()).unwrap();
        assert_eq!(rows, 2);

        let conn = open(&path).unwrap();
        assert_eq!(row_count(&conn, DEFAULT_TABLE).unwrap(), 2);
        assert_eq!(row_count(&conn, CATEGORY_KEYS_TABLE).unwrap(), 1);

        let missing: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM hex_features WHERE avg_building_area_m2 IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(missing, 1);

        let (count, aoi, geometry): (i32, String, String) = conn
            .query_row(
                "SELECT roads_count, aoi_name, geometry FROM hex_features WHERE h3_id = 'h1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(aoi, "Alpha");
        let geometry: serde_json::Value = serde_json::from_str(&geometry).unwrap();
        assert_eq!(geometry["type"], "Polygon");

        let (column, layer): (String, String) = conn
            .query_row(
                "SELECT column_name, layer FROM category_keys",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(column, "poi_cafe");
        assert_eq!(layer, "pois");

        drop(conn);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rewriting_replaces_the_previous_file() {
        let dir = scratch("rewrite");
        let path = dir.join("out.duckdb");
        let table = sample();
        write_table(&path, DEFAULT_TABLE, &table, &table.category_schema()).unwrap();

        let smaller = CellTable::new("h3_id", vec!["h9".to_string()]);
        write_table(&path, DEFAULT_TABLE, &smaller, &CategorySchema::new()).unwrap();

        let conn = open(&path).unwrap();
        assert_eq!(row_count(&conn, DEFAULT_TABLE).unwrap(), 1);
        assert_eq!(row_count(&conn, CATEGORY_KEYS_TABLE).unwrap(), 0);

        drop(conn);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
