//! The per-cell output table.
//!
//! A [`CellTable`] is columnar: one id vector, an optional geometry vector,
//! and any number of typed [`Column`]s of the same length. Missing values
//! are `None`, except in `Float64` columns where `NaN` means missing.

use std::collections::{BTreeMap, HashMap, HashSet};

use geo::Polygon;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::schema::{CategoryKey, CategorySchema};

/// Table construction and combination failures.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// A column's length differs from the table's row count.
    #[error("Column '{name}' has {actual} rows, expected {expected}")]
    LengthMismatch {
        /// Column name.
        name: String,
        /// Table row count.
        expected: usize,
        /// Column row count.
        actual: usize,
    },

    /// Two columns share a name.
    #[error("Duplicate column '{0}'")]
    DuplicateColumn(String),

    /// The same column name has different types in combined tables.
    #[error("Column '{name}' is {left} in one table and {right} in another")]
    TypeMismatch {
        /// Column name.
        name: String,
        /// Type in the first table.
        left: ColumnType,
        /// Type in the other table.
        right: ColumnType,
    },

    /// Combined tables disagree on the id column name.
    #[error("Id column '{left}' does not match '{right}'")]
    IdColumnMismatch {
        /// First id column.
        left: String,
        /// Other id column.
        right: String,
    },

    /// Some combined tables carry geometry and others do not.
    #[error("Cannot combine tables with and without geometry")]
    GeometryMismatch,
}

/// Column storage by type.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Nullable booleans.
    Bool(Vec<Option<bool>>),
    /// Small integers, never null.
    Int8(Vec<i8>),
    /// Plain integers, never null.
    Int32(Vec<i32>),
    /// Nullable wide integers (counts before sanitizing).
    Int64(Vec<Option<i64>>),
    /// Floats; `NaN` is missing.
    Float64(Vec<f64>),
    /// Nullable text.
    Text(Vec<Option<String>>),
}

/// Column value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Int8,
    Int32,
    Int64,
    Float64,
    Text,
}

impl ColumnData {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::Int8(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn column_type(&self) -> ColumnType {
        match self {
            Self::Bool(_) => ColumnType::Bool,
            Self::Int8(_) => ColumnType::Int8,
            Self::Int32(_) => ColumnType::Int32,
            Self::Int64(_) => ColumnType::Int64,
            Self::Float64(_) => ColumnType::Float64,
            Self::Text(_) => ColumnType::Text,
        }
    }

    /// A column of `len` missing values (zero for the non-null integer
    /// types).
    #[must_use]
    pub fn missing(column_type: ColumnType, len: usize) -> Self {
        match column_type {
            ColumnType::Bool => Self::Bool(vec![None; len]),
            ColumnType::Int8 => Self::Int8(vec![0; len]),
            ColumnType::Int32 => Self::Int32(vec![0; len]),
            ColumnType::Int64 => Self::Int64(vec![None; len]),
            ColumnType::Float64 => Self::Float64(vec![f64::NAN; len]),
            ColumnType::Text => Self::Text(vec![None; len]),
        }
    }

    /// Picks rows by position; `None` yields a missing value.
    #[must_use]
    pub fn take(&self, rows: &[Option<usize>]) -> Self {
        fn pick<T: Clone>(v: &[T], rows: &[Option<usize>], fill: &T) -> Vec<T> {
            rows.iter()
                .map(|r| r.map_or_else(|| fill.clone(), |i| v[i].clone()))
                .collect()
        }
        match self {
            Self::Bool(v) => Self::Bool(pick(v, rows, &None)),
            Self::Int8(v) => Self::Int8(pick(v, rows, &0)),
            Self::Int32(v) => Self::Int32(pick(v, rows, &0)),
            Self::Int64(v) => Self::Int64(pick(v, rows, &None)),
            Self::Float64(v) => Self::Float64(pick(v, rows, &f64::NAN)),
            Self::Text(v) => Self::Text(pick(v, rows, &None)),
        }
    }

    /// Appends `other`, which must have the same type.
    fn append(&mut self, other: Self) -> Result<(), (ColumnType, ColumnType)> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.extend(b),
            (Self::Int8(a), Self::Int8(b)) => a.extend(b),
            (Self::Int32(a), Self::Int32(b)) => a.extend(b),
            (Self::Int64(a), Self::Int64(b)) => a.extend(b),
            (Self::Float64(a), Self::Float64(b)) => a.extend(b),
            (Self::Text(a), Self::Text(b)) => a.extend(b),
            (a, b) => return Err((a.column_type(), b.column_type())),
        }
        Ok(())
    }

    /// Numeric value at `row`, `None` when missing or not numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn number_at(&self, row: usize) -> Option<f64> {
        match self {
            Self::Bool(v) => v[row].map(|b| if b { 1.0 } else { 0.0 }),
            Self::Int8(v) => Some(f64::from(v[row])),
            Self::Int32(v) => Some(f64::from(v[row])),
            Self::Int64(v) => v[row].map(|n| n as f64),
            Self::Float64(v) => Some(v[row]).filter(|n| !n.is_nan()),
            Self::Text(_) => None,
        }
    }
}

/// A named column, optionally tagged with the category key it counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
    /// Set on indicator columns.
    pub category: Option<CategoryKey>,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
            category: None,
        }
    }

    /// An indicator column counting `key`.
    #[must_use]
    pub fn indicator(name: impl Into<String>, key: CategoryKey, counts: Vec<Option<i64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Int64(counts),
            category: Some(key),
        }
    }
}

/// Description of one column for metadata sidecars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// One row per grid cell: id, optional polygon, and typed columns.
#[derive(Debug, Clone, PartialEq)]
pub struct CellTable {
    id_column: String,
    ids: Vec<String>,
    geometry: Option<Vec<Polygon<f64>>>,
    columns: Vec<Column>,
}

impl CellTable {
    /// A table with the given ids and no columns.
    #[must_use]
    pub fn new(id_column: impl Into<String>, ids: Vec<String>) -> Self {
        Self {
            id_column: id_column.into(),
            ids,
            geometry: None,
            columns: Vec::new(),
        }
    }

    /// Attaches one polygon per row.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::LengthMismatch`] if the counts differ.
    pub fn with_geometry(mut self, polygons: Vec<Polygon<f64>>) -> Result<Self, TableError> {
        if polygons.len() != self.ids.len() {
            return Err(TableError::LengthMismatch {
                name: "geometry".to_string(),
                expected: self.ids.len(),
                actual: polygons.len(),
            });
        }
        self.geometry = Some(polygons);
        Ok(self)
    }

    /// Adds a column at the end.
    ///
    /// # Errors
    ///
    /// Returns [`TableError`] if the length is wrong or the name is taken.
    pub fn push_column(&mut self, column: Column) -> Result<(), TableError> {
        if column.data.len() != self.ids.len() {
            return Err(TableError::LengthMismatch {
                name: column.name,
                expected: self.ids.len(),
                actual: column.data.len(),
            });
        }
        if column.name == self.id_column || self.column(&column.name).is_some() {
            return Err(TableError::DuplicateColumn(column.name));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Adds or replaces a text column holding `value` on every row.
    ///
    /// The column becomes the first data column, right after the id (and
    /// geometry), so it keeps that place through [`Self::concat`].
    pub fn stamp_text(&mut self, name: &str, value: &str) {
        let data = ColumnData::Text(vec![Some(value.to_string()); self.ids.len()]);
        self.columns.retain(|c| c.name != name);
        self.columns.insert(0, Column::new(name, data));
    }

    #[must_use]
    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    #[must_use]
    pub fn geometry(&self) -> Option<&[Polygon<f64>]> {
        self.geometry.as_deref()
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Numeric value of `column` for the row with id `id`.
    #[must_use]
    pub fn number(&self, id: &str, column: &str) -> Option<f64> {
        let row = self.ids.iter().position(|i| i == id)?;
        self.column(column)?.data.number_at(row)
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[must_use]
    pub fn column_info(&self) -> Vec<ColumnInfo> {
        self.columns
            .iter()
            .map(|c| ColumnInfo {
                name: c.name.clone(),
                column_type: c.data.column_type(),
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The category keys carried by indicator columns, in column order.
    #[must_use]
    pub fn category_schema(&self) -> CategorySchema {
        let mut schema = CategorySchema::new();
        for column in &self.columns {
            if let Some(key) = &column.category {
                schema.push(column.name.clone(), key.clone());
            }
        }
        schema
    }

    /// Splits the table into its parts.
    #[must_use]
    pub fn into_parts(self) -> (String, Vec<String>, Option<Vec<Polygon<f64>>>, Vec<Column>) {
        (self.id_column, self.ids, self.geometry, self.columns)
    }

    /// Reassembles a table from parts produced by [`Self::into_parts`].
    ///
    /// # Errors
    ///
    /// Returns [`TableError`] if lengths disagree or names repeat.
    pub fn from_parts(
        id_column: String,
        ids: Vec<String>,
        geometry: Option<Vec<Polygon<f64>>>,
        columns: Vec<Column>,
    ) -> Result<Self, TableError> {
        let mut table = Self::new(id_column, ids);
        if let Some(geometry) = geometry {
            table = table.with_geometry(geometry)?;
        }
        for column in columns {
            table.push_column(column)?;
        }
        Ok(table)
    }

    /// Appends the columns of `other`, matched by id. Rows of `self` keep
    /// their order; ids absent from `other` get missing values.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::DuplicateColumn`] if a column name exists in
    /// both tables.
    pub fn left_join(mut self, other: Self) -> Result<Self, TableError> {
        let positions: HashMap<&str, usize> = other
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let rows: Vec<Option<usize>> = self
            .ids
            .iter()
            .map(|id| positions.get(id.as_str()).copied())
            .collect();

        for column in &other.columns {
            self.push_column(Column {
                name: column.name.clone(),
                data: column.data.take(&rows),
                category: column.category.clone(),
            })?;
        }
        Ok(self)
    }

    /// Stacks tables row-wise.
    ///
    /// Columns are the union of all tables' columns in first-appearance
    /// order; rows from a table lacking a column get missing values.
    ///
    /// # Errors
    ///
    /// Returns [`TableError`] if id columns, geometry presence, or column
    /// types disagree.
    pub fn concat(tables: Vec<Self>) -> Result<Option<Self>, TableError> {
        let Some(first) = tables.first() else {
            return Ok(None);
        };
        let id_column = first.id_column.clone();
        let with_geometry = first.geometry.is_some();

        let mut order: Vec<(String, ColumnType, Option<CategoryKey>)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for table in &tables {
            if table.id_column != id_column {
                return Err(TableError::IdColumnMismatch {
                    left: id_column,
                    right: table.id_column.clone(),
                });
            }
            if table.geometry.is_some() != with_geometry {
                return Err(TableError::GeometryMismatch);
            }
            for column in &table.columns {
                if seen.insert(column.name.clone()) {
                    order.push((
                        column.name.clone(),
                        column.data.column_type(),
                        column.category.clone(),
                    ));
                }
            }
        }

        let mut ids = Vec::new();
        let mut geometry = with_geometry.then(Vec::new);
        let mut merged: BTreeMap<String, ColumnData> = BTreeMap::new();

        for table in tables {
            let rows = table.ids.len();
            let mut by_name: HashMap<String, ColumnData> = table
                .columns
                .into_iter()
                .map(|c| (c.name, c.data))
                .collect();

            for (name, column_type, _) in &order {
                let data = by_name
                    .remove(name)
                    .unwrap_or_else(|| ColumnData::missing(*column_type, rows));
                match merged.get_mut(name) {
                    Some(existing) => {
                        existing
                            .append(data)
                            .map_err(|(left, right)| TableError::TypeMismatch {
                                name: name.clone(),
                                left,
                                right,
                            })?;
                    }
                    None => {
                        let mut column = ColumnData::missing(*column_type, ids.len());
                        column
                            .append(data)
                            .map_err(|(left, right)| TableError::TypeMismatch {
                                name: name.clone(),
                                left,
                                right,
                            })?;
                        merged.insert(name.clone(), column);
                    }
                }
            }

            ids.extend(table.ids);
            if let (Some(all), Some(polygons)) = (geometry.as_mut(), table.geometry) {
                all.extend(polygons);
            }
        }

        let columns = order
            .into_iter()
            .filter_map(|(name, _, category)| {
                merged.remove(&name).map(|data| Column {
                    name,
                    data,
                    category,
                })
            })
            .collect();

        Self::from_parts(id_column, ids, geometry, columns).map(Some)
    }
}

