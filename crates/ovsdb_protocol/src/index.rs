//! Unique row indexes.

use crate::row::Row;
use crate::schema::TableSchema;
use crate::value::Value;
use std::collections::HashMap;

/// A unique index over one or more columns of a table.
///
/// Maps the tuple of indexed column values to the UUID of the row holding
/// it. Rows missing any indexed column are not indexed.
///
/// ```
/// use ovsdb_protocol::{Row, UniqueIndex, Value};
///
/// let mut index = UniqueIndex::new(vec!["name".to_string()]);
/// let row = Row::new().with("name", "br0");
/// index.insert("u1", &row).unwrap();
///
/// assert_eq!(index.lookup(&[Value::from("br0")]), Some("u1"));
/// assert_eq!(index.insert("u2", &row), Err("u1".to_string()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct UniqueIndex {
    columns: Vec<String>,
    entries: HashMap<Vec<Value>, String>,
}

impl UniqueIndex {
    /// Creates an empty index over `columns`.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            entries: HashMap::new(),
        }
    }

    /// Creates one index per schema-declared index of `table`.
    pub fn for_table(table: &TableSchema) -> Vec<Self> {
        table.indexes.iter().cloned().map(Self::new).collect()
    }

    /// Indexed columns.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns true if the index covers exactly `columns`, in any order.
    pub fn covers(&self, columns: &[&str]) -> bool {
        columns.len() == self.columns.len()
            && self.columns.iter().all(|c| columns.contains(&c.as_str()))
    }

    /// Extracts the key of a row, if it has every indexed column.
    pub fn key(&self, row: &Row) -> Option<Vec<Value>> {
        self.columns
            .iter()
            .map(|column| row.get(column).cloned())
            .collect()
    }

    /// Returns the UUID of another row already holding `row`'s key.
    pub fn conflict(&self, uuid: &str, row: &Row) -> Option<&str> {
        let key = self.key(row)?;
        self.entries
            .get(&key)
            .map(String::as_str)
            .filter(|existing| *existing != uuid)
    }

    /// Indexes a row. Fails with the holder's UUID if the key is taken by
    /// another row.
    pub fn insert(&mut self, uuid: &str, row: &Row) -> Result<(), String> {
        if let Some(existing) = self.conflict(uuid, row) {
            return Err(existing.to_string());
        }
        self.set(uuid, row);
        Ok(())
    }

    /// Points `row`'s key at `uuid`, taking it over from any other holder.
    pub fn set(&mut self, uuid: &str, row: &Row) {
        if let Some(key) = self.key(row) {
            self.entries.insert(key, uuid.to_string());
        }
    }

    /// Removes a row's entry if it still points at `uuid`.
    pub fn remove(&mut self, uuid: &str, row: &Row) {
        if let Some(key) = self.key(row) {
            if self.entries.get(&key).is_some_and(|holder| holder == uuid) {
                self.entries.remove(&key);
            }
        }
    }

    /// Looks up the row holding `key`, in column order.
    pub fn lookup(&self, key: &[Value]) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of indexed rows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no row is indexed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
