//! Category keys discovered during aggregation.

use hex_features_layer_models::LayerKind;
use serde::{Deserialize, Serialize};

/// One distinct `(attribute, value)` pair observed in a layer, which
/// becomes one indicator column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CategoryKey {
    /// Layer the value was observed in.
    pub layer: LayerKind,
    /// Category attribute (e.g. `highway`, or the derived `poi_type`).
    pub attribute: String,
    /// Observed value, or the `unknown` sentinel.
    pub value: String,
}

impl CategoryKey {
    #[must_use]
    pub fn new(layer: LayerKind, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            layer,
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

/// A category key together with the column that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryColumn {
    /// Output column name.
    pub column: String,
    /// The key counted in that column.
    #[serde(flatten)]
    pub key: CategoryKey,
}

/// The ordered set of category keys of a run and their column names.
///
/// Persisted next to the output so consumers can rely on a stable mapping
/// even though the key set is discovered from the data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategorySchema {
    entries: Vec<CategoryColumn>,
}

impl CategorySchema {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends a key, in column order.
    pub fn push(&mut self, column: impl Into<String>, key: CategoryKey) {
        self.entries.push(CategoryColumn {
            column: column.into(),
            key,
        });
    }

    #[must_use]
    pub fn entries(&self) -> &[CategoryColumn] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Column carrying `key`, if any.
    #[must_use]
    pub fn column_for(&self, key: &CategoryKey) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| &e.key == key)
            .map(|e| e.column.as_str())
    }
}
