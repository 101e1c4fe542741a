//! Rows of one cached table and their unique indexes.

use super::event::CachedRow;
use ovsdb_protocol::{TableSchema, UniqueIndex, Value};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct RowCache {
    rows: HashMap<String, CachedRow>,
    indexes: Vec<UniqueIndex>,
}

impl RowCache {
    pub(crate) fn new(table: &TableSchema) -> Self {
        Self {
            rows: HashMap::new(),
            indexes: UniqueIndex::for_table(table),
        }
    }

    pub(crate) fn get(&self, uuid: &str) -> Option<&CachedRow> {
        self.rows.get(uuid)
    }

    pub(crate) fn contains(&self, uuid: &str) -> bool {
        self.rows.contains_key(uuid)
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    /// Rows ordered by UUID.
    pub(crate) fn sorted(&self) -> Vec<CachedRow> {
        let mut rows: Vec<_> = self.rows.values().cloned().collect();
        rows.sort_by(|a, b| a.uuid().cmp(b.uuid()));
        rows
    }

    /// Installs a row, replacing any row with the same UUID.
    ///
    /// Rows come from the server, which has already enforced uniqueness, so
    /// the new row takes its index keys over from any other holder. Within
    /// one batch the last row installed with a key owns it.
    pub(crate) fn install(&mut self, entry: CachedRow) -> Option<CachedRow> {
        let previous = self.rows.remove(entry.uuid());
        for index in &mut self.indexes {
            if let Some(old) = &previous {
                index.remove(old.uuid(), old.row());
            }
            index.set(entry.uuid(), entry.row());
        }
        self.rows.insert(entry.uuid().to_string(), entry);
        previous
    }

    pub(crate) fn remove(&mut self, uuid: &str) -> Option<CachedRow> {
        let removed = self.rows.remove(uuid)?;
        for index in &mut self.indexes {
            index.remove(uuid, removed.row());
        }
        Some(removed)
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
        for index in &mut self.indexes {
            index.clear();
        }
    }

    /// Finds a row through the index over exactly `columns`.
    ///
    /// `None` if no such index exists, `Some(None)` on a miss.
    pub(crate) fn find(&self, columns: &[&str], values: &[Value]) -> Option<Option<&CachedRow>> {
        let index = self.indexes.iter().find(|index| index.covers(columns))?;
        let key: Option<Vec<Value>> = index
            .columns()
            .iter()
            .map(|column| {
                columns
                    .iter()
                    .position(|c| c == column)
                    .and_then(|i| values.get(i).cloned())
            })
            .collect();
        Some(
            key.and_then(|key| index.lookup(&key))
                .and_then(|uuid| self.rows.get(uuid)),
        )
    }

    pub(crate) fn indexes(&self) -> &[UniqueIndex] {
        &self.indexes
    }
}
