//! In-memory row store and committed change sets.

use ovsdb_protocol::codec::NIL_UUID;
use ovsdb_protocol::{DatabaseSchema, Row, TableSchema, UniqueIndex};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Before and after images of one row in one transaction.
///
/// `old` is `None` for an inserted row, `new` is `None` for a deleted one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    /// Row before the transaction.
    pub old: Option<Row>,
    /// Row after the transaction.
    pub new: Option<Row>,
}

/// Row changes of one or more transactions, per table and row UUID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    tables: BTreeMap<String, BTreeMap<String, RowChange>>,
}

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a change. A later change of the same row keeps the earliest
    /// `old` image; a change that ends where it started disappears.
    pub fn record(&mut self, table: &str, uuid: &str, old: Option<Row>, new: Option<Row>) {
        let rows = self.tables.entry(table.to_string()).or_default();
        let old = match rows.remove(uuid) {
            Some(earlier) => earlier.old,
            None => old,
        };
        if old != new {
            rows.insert(uuid.to_string(), RowChange { old, new });
        }
        if rows.is_empty() {
            self.tables.remove(table);
        }
    }

    /// Folds the changes of a later transaction into this one.
    pub fn merge(&mut self, later: &ChangeSet) {
        for (table, rows) in &later.tables {
            for (uuid, change) in rows {
                self.record(table, uuid, change.old.clone(), change.new.clone());
            }
        }
    }

    /// Looks up the change of a row.
    pub fn get(&self, table: &str, uuid: &str) -> Option<&RowChange> {
        self.tables.get(table).and_then(|rows| rows.get(uuid))
    }

    /// Iterates over tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, RowChange>)> {
        self.tables.iter().map(|(name, rows)| (name.as_str(), rows))
    }

    /// Number of changed rows.
    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Rows of one table with its unique indexes.
#[derive(Debug, Clone)]
pub(crate) struct TableData {
    pub(crate) rows: BTreeMap<String, Row>,
    indexes: Vec<UniqueIndex>,
}

impl TableData {
    fn new(table: &TableSchema) -> Self {
        Self {
            rows: BTreeMap::new(),
            indexes: UniqueIndex::for_table(table),
        }
    }

    /// Stores a row, replacing any row with the same UUID.
    ///
    /// Fails with the UUID of the row already holding one of the new row's
    /// index keys. Nothing is modified on failure.
    pub(crate) fn put(&mut self, uuid: &str, row: Row) -> Result<(), String> {
        if let Some(holder) = self
            .indexes
            .iter()
            .find_map(|index| index.conflict(uuid, &row))
        {
            return Err(holder.to_string());
        }
        if let Some(old) = self.rows.remove(uuid) {
            for index in &mut self.indexes {
                index.remove(uuid, &old);
            }
        }
        for index in &mut self.indexes {
            index.insert(uuid, &row)?;
        }
        self.rows.insert(uuid.to_string(), row);
        Ok(())
    }

    /// Removes a row.
    pub(crate) fn remove(&mut self, uuid: &str) -> Option<Row> {
        let row = self.rows.remove(uuid)?;
        for index in &mut self.indexes {
            index.remove(uuid, &row);
        }
        Some(row)
    }
}

/// The tables staged by a successful transaction, ready to commit.
#[derive(Debug)]
pub(crate) struct Staged {
    pub(crate) tables: BTreeMap<String, TableData>,
    pub(crate) changes: ChangeSet,
}

/// An in-memory database.
///
/// Each commit gets a fresh transaction id. The most recent commits are
/// kept so a monitor can resume from one of their ids.
#[derive(Debug)]
pub struct Database {
    schema: Arc<DatabaseSchema>,
    tables: BTreeMap<String, TableData>,
    last_txn_id: String,
    history: VecDeque<(String, Arc<ChangeSet>)>,
    history_limit: usize,
}

impl Database {
    /// Creates an empty database. Its transaction id starts as the nil UUID.
    pub fn new(schema: Arc<DatabaseSchema>, history_limit: usize) -> Self {
        let tables = schema
            .tables()
            .map(|table| (table.name.clone(), TableData::new(table)))
            .collect();
        Self {
            schema,
            tables,
            last_txn_id: NIL_UUID.to_string(),
            history: VecDeque::new(),
            history_limit,
        }
    }

    /// The database schema.
    pub fn schema(&self) -> &Arc<DatabaseSchema> {
        &self.schema
    }

    /// Looks up a row.
    pub fn get(&self, table: &str, uuid: &str) -> Option<&Row> {
        self.tables.get(table).and_then(|data| data.rows.get(uuid))
    }

    /// Iterates over a table's rows in UUID order.
    pub fn rows(&self, table: &str) -> impl Iterator<Item = (&str, &Row)> {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(|data| data.rows.iter())
            .map(|(uuid, row)| (uuid.as_str(), row))
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |data| data.rows.len())
    }

    /// Id of the latest commit.
    pub fn last_txn_id(&self) -> &str {
        &self.last_txn_id
    }

    pub(crate) fn table_data(&self, table: &str) -> Option<&TableData> {
        self.tables.get(table)
    }

    /// Installs staged tables under a new transaction id.
    pub(crate) fn commit(&mut self, staged: Staged) -> (String, Arc<ChangeSet>) {
        self.tables.extend(staged.tables);
        let txn_id = uuid::Uuid::new_v4().to_string();
        let changes = Arc::new(staged.changes);
        self.last_txn_id = txn_id.clone();
        if self.history_limit > 0 {
            self.history.push_back((txn_id.clone(), Arc::clone(&changes)));
            while self.history.len() > self.history_limit {
                self.history.pop_front();
            }
        }
        (txn_id, changes)
    }

    /// Returns every change committed after `txn_id`.
    ///
    /// `None` when the id is the nil UUID or no longer (or never) known;
    /// the caller must then send the full state.
    pub fn changes_since(&self, txn_id: &str) -> Option<ChangeSet> {
        if txn_id == NIL_UUID {
            return None;
        }
        if txn_id == self.last_txn_id {
            return Some(ChangeSet::new());
        }
        let position = self.history.iter().position(|(id, _)| id == txn_id)?;
        let mut merged = ChangeSet::new();
        for (_, changes) in self.history.iter().skip(position + 1) {
            merged.merge(changes);
        }
        Some(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsdb_protocol::{AtomicType, ColumnSchema, ColumnType, Value};

    fn schema() -> Arc<DatabaseSchema> {
        Arc::new(
            DatabaseSchema::new("db", "1").with_table(
                TableSchema::new("Bridge")
                    .with_column(ColumnSchema::new("name", ColumnType::scalar(AtomicType::String)))
                    .with_index(&["name"]),
            ),
        )
    }

    fn bridge(name: &str) -> Row {
        Row::new().with("name", name)
    }

    fn commit_insert(db: &mut Database, uuid: &str, name: &str) -> String {
        let mut data = db.table_data("Bridge").unwrap().clone();
        data.put(uuid, bridge(name)).unwrap();
        let mut changes = ChangeSet::new();
        changes.record("Bridge", uuid, None, Some(bridge(name)));
        let tables = BTreeMap::from([("Bridge".to_string(), data)]);
        db.commit(Staged { tables, changes }).0
    }

    #[test]
    fn put_enforces_unique_index() {
        let mut data = TableData::new(schema().table("Bridge").unwrap());
        data.put("u1", bridge("br0")).unwrap();
        assert_eq!(data.put("u2", bridge("br0")), Err("u1".to_string()));
        assert!(data.rows.get("u2").is_none());

        // Replacing a row frees its old key.
        data.put("u1", bridge("br1")).unwrap();
        data.put("u2", bridge("br0")).unwrap();
        assert_eq!(data.remove("u1"), Some(bridge("br1")));
        data.put("u3", bridge("br1")).unwrap();
    }

    #[test]
    fn change_set_folds_row_history() {
        let mut changes = ChangeSet::new();
        changes.record("Bridge", "u1", None, Some(bridge("a")));
        changes.record("Bridge", "u1", Some(bridge("a")), Some(bridge("b")));
        assert_eq!(
            changes.get("Bridge", "u1"),
            Some(&RowChange {
                old: None,
                new: Some(bridge("b"))
            })
        );

        changes.record("Bridge", "u1", Some(bridge("b")), None);
        assert!(changes.is_empty());
        assert_eq!(changes.len(), 0);
    }

    #[test]
    fn commit_assigns_txn_ids_and_keeps_history() {
        let mut db = Database::new(schema(), 2);
        assert_eq!(db.last_txn_id(), NIL_UUID);
        assert!(db.changes_since(NIL_UUID).is_none());

        let first = commit_insert(&mut db, "u1", "br0");
        let second = commit_insert(&mut db, "u2", "br1");
        assert_eq!(db.last_txn_id(), second);
        assert_eq!(db.row_count("Bridge"), 2);
        assert_eq!(db.get("Bridge", "u1").and_then(|r| r.get("name")), Some(&Value::from("br0")));

        let since_first = db.changes_since(&first).unwrap();
        assert_eq!(since_first.len(), 1);
        assert!(since_first.get("Bridge", "u2").is_some());
        assert!(db.changes_since(&second).unwrap().is_empty());

        let third = commit_insert(&mut db, "u3", "br2");
        // The history holds two commits; the first one has been evicted.
        assert!(db.changes_since(&first).is_none());
        assert_eq!(db.changes_since(&second).unwrap().len(), 1);
        assert!(db.changes_since(&third).unwrap().is_empty());
        assert!(db.changes_since("unknown").is_none());
    }
}
