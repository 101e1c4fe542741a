//! Generic rows and update2 difference arithmetic.

use crate::codec::default_value;
use crate::schema::{ColumnKind, TableSchema, UUID_COLUMN};
use crate::value::Value;
use serde::{Serialize, Serializer};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// A mapping from column name to value.
///
/// Rows are schema-relative: the same row can only be validated, diffed or
/// filtered together with its [`TableSchema`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Sets a column, returning the previous value.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(column.into(), value)
    }

    /// Builder form of [`Row::insert`].
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value.into());
        self
    }

    /// Removes a column.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.remove(column)
    }

    /// Returns true if the column is present.
    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    /// Keeps only the columns for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|name, _| keep(name));
    }

    /// Iterates over columns in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Iterates over column names.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the row's `_uuid`, if present.
    pub fn uuid(&self) -> Option<&str> {
        self.get(UUID_COLUMN).and_then(Value::as_uuid)
    }

    /// Fills every declared column missing from the row with its unset value.
    pub fn fill_defaults(&mut self, table: &TableSchema) {
        for column in table.user_columns() {
            self.0
                .entry(column.name.clone())
                .or_insert_with(|| default_value(&column.column_type));
        }
    }

    /// Computes the update2 modify payload turning `old` into `new`.
    ///
    /// Scalars carry their new value, sets the symmetric difference and maps
    /// the changed entries: added and changed keys with their new value,
    /// removed keys with their old value. Unchanged columns and the internal
    /// columns are omitted.
    pub fn diff(old: &Row, new: &Row, table: &TableSchema) -> Row {
        let mut diff = Row::new();
        for column in table.user_columns() {
            let default = default_value(&column.column_type);
            let before = old.get(&column.name).unwrap_or(&default);
            let after = new.get(&column.name).unwrap_or(&default);
            if before == after {
                continue;
            }
            let delta = match (column.kind(), before, after) {
                (ColumnKind::Set, Value::Set(a), Value::Set(b)) => {
                    Value::Set(a.symmetric_difference(b).cloned().collect())
                }
                (ColumnKind::Map, Value::Map(a), Value::Map(b)) => {
                    let mut entries = BTreeMap::new();
                    for (key, value) in b {
                        if a.get(key) != Some(value) {
                            entries.insert(key.clone(), value.clone());
                        }
                    }
                    for (key, value) in a {
                        if !b.contains_key(key) {
                            entries.insert(key.clone(), value.clone());
                        }
                    }
                    Value::Map(entries)
                }
                _ => after.clone(),
            };
            diff.insert(column.name.clone(), delta);
        }
        diff
    }

    /// Merges an update2 modify payload into this row.
    ///
    /// Returns true if any column changed. Columns the table does not
    /// declare are ignored.
    pub fn apply_diff(&mut self, diff: &Row, table: &TableSchema) -> bool {
        let mut changed = false;
        for (name, delta) in diff.iter() {
            let Some(column) = table.column(name) else {
                continue;
            };
            let current = self
                .0
                .entry(name.clone())
                .or_insert_with(|| default_value(&column.column_type));
            let next = match (column.kind(), &*current, delta) {
                (ColumnKind::Set, Value::Set(old), Value::Set(d)) => {
                    Value::Set(old.symmetric_difference(d).cloned().collect())
                }
                (ColumnKind::Map, Value::Map(old), Value::Map(d)) => {
                    let mut merged = old.clone();
                    for (key, value) in d {
                        match merged.get(key) {
                            Some(existing) if existing == value => {
                                merged.remove(key);
                            }
                            _ => {
                                merged.insert(key.clone(), value.clone());
                            }
                        }
                    }
                    Value::Map(merged)
                }
                _ => delta.clone(),
            };
            if *current != next {
                *current = next;
                changed = true;
            }
        }
        changed
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Row(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}
