//! update2 notification payloads.
//!
//! ```text
//! {"Bridge": {"<uuid>": {"insert": {...}}
//!             "<uuid>": {"modify": {...}}
//!             "<uuid>": {"delete": null}}}
//! ```

use crate::codec::{decode_diff_row, decode_row, encode_diff_row, encode_row};
use crate::error::{CodecError, CodecResult};
use crate::row::Row;
use crate::schema::DatabaseSchema;
use serde_json::{Map, Value as Json};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Difference record for one row.
///
/// `Delete` is `Some(Row::new())` when the wire carries `"delete": null`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowUpdate2 {
    /// Row present when the monitor was created.
    pub initial: Option<Row>,
    /// Newly inserted row.
    pub insert: Option<Row>,
    /// Changed columns of an existing row.
    pub modify: Option<Row>,
    /// Deleted row.
    pub delete: Option<Row>,
}

impl RowUpdate2 {
    /// An `initial` record.
    pub fn initial(row: Row) -> Self {
        Self {
            initial: Some(row),
            ..Self::default()
        }
    }

    /// An `insert` record.
    pub fn insert(row: Row) -> Self {
        Self {
            insert: Some(row),
            ..Self::default()
        }
    }

    /// A `modify` record.
    pub fn modify(diff: Row) -> Self {
        Self {
            modify: Some(diff),
            ..Self::default()
        }
    }

    /// A `delete` record.
    pub fn delete() -> Self {
        Self {
            delete: Some(Row::new()),
            ..Self::default()
        }
    }

    /// Returns the full row of an initial or insert record.
    pub fn new_row(&self) -> Option<&Row> {
        self.initial.as_ref().or(self.insert.as_ref())
    }

    /// Returns true if no payload is present.
    pub fn is_empty(&self) -> bool {
        self.initial.is_none() && self.insert.is_none() && self.modify.is_none() && self.delete.is_none()
    }

    /// Mutable access to every present payload.
    pub fn payloads_mut(&mut self) -> impl Iterator<Item = &mut Row> {
        [
            self.initial.as_mut(),
            self.insert.as_mut(),
            self.modify.as_mut(),
            self.delete.as_mut(),
        ]
        .into_iter()
        .flatten()
    }

    /// Iterates over every present payload.
    pub fn payloads(&self) -> impl Iterator<Item = &Row> {
        [
            self.initial.as_ref(),
            self.insert.as_ref(),
            self.modify.as_ref(),
            self.delete.as_ref(),
        ]
        .into_iter()
        .flatten()
    }
}

/// Row UUID to [`RowUpdate2`] for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableUpdate2 {
    rows: BTreeMap<String, RowUpdate2>,
}

impl TableUpdate2 {
    /// Creates an empty table update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row record.
    pub fn insert(&mut self, uuid: impl Into<String>, update: RowUpdate2) {
        self.rows.insert(uuid.into(), update);
    }

    /// Builder form of [`TableUpdate2::insert`].
    #[must_use]
    pub fn with_row(mut self, uuid: impl Into<String>, update: RowUpdate2) -> Self {
        self.insert(uuid, update);
        self
    }

    /// Looks up a row record.
    pub fn get(&self, uuid: &str) -> Option<&RowUpdate2> {
        self.rows.get(uuid)
    }

    /// Iterates over row records.
    pub fn iter(&self) -> btree_map::Iter<'_, String, RowUpdate2> {
        self.rows.iter()
    }

    /// Iterates mutably over row records.
    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, String, RowUpdate2> {
        self.rows.iter_mut()
    }

    /// Number of row records.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no row records.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl IntoIterator for TableUpdate2 {
    type Item = (String, RowUpdate2);
    type IntoIter = btree_map::IntoIter<String, RowUpdate2>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// A row fragment skipped while decoding an update batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFragment {
    /// Table of the fragment.
    pub table: String,
    /// Row UUID, absent when the whole table was skipped.
    pub uuid: Option<String>,
    /// Why it was skipped.
    pub error: CodecError,
}

/// Table name to [`TableUpdate2`], in the order tables were received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableUpdates2 {
    tables: Vec<(String, TableUpdate2)>,
}

impl TableUpdates2 {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the update for a table, keeping its position.
    pub fn insert(&mut self, table: impl Into<String>, update: TableUpdate2) {
        let table = table.into();
        match self.tables.iter_mut().find(|(name, _)| *name == table) {
            Some((_, existing)) => *existing = update,
            None => self.tables.push((table, update)),
        }
    }

    /// Builder form of [`TableUpdates2::insert`].
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>, update: TableUpdate2) -> Self {
        self.insert(table, update);
        self
    }

    /// Looks up the update for a table.
    pub fn table(&self, name: &str) -> Option<&TableUpdate2> {
        self.tables
            .iter()
            .find(|(table, _)| table == name)
            .map(|(_, update)| update)
    }

    /// Iterates over tables in received order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableUpdate2)> {
        self.tables.iter().map(|(name, update)| (name.as_str(), update))
    }

    /// Iterates mutably over tables in received order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut TableUpdate2)> {
        self.tables
            .iter_mut()
            .map(|(name, update)| (name.as_str(), update))
    }

    /// Keeps only tables for which `keep` returns true.
    pub fn retain_tables(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.tables.retain(|(name, _)| keep(name));
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if the batch holds no table.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Total number of row records across tables.
    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|(_, update)| update.len()).sum()
    }

    /// Decodes a wire batch.
    ///
    /// Only a non-object top level is an error. Unknown tables and rows
    /// whose payload does not decode are skipped and reported so the caller
    /// can log them; the rest of the batch is kept.
    pub fn decode(json: &Json, schema: &DatabaseSchema) -> CodecResult<(Self, Vec<SkippedFragment>)> {
        let object = json
            .as_object()
            .ok_or_else(|| CodecError::invalid_structure("table updates must be an object"))?;
        let mut updates = Self::new();
        let mut skipped = Vec::new();

        for (table_name, rows) in object {
            let Some(table) = schema.table(table_name) else {
                skipped.push(SkippedFragment {
                    table: table_name.clone(),
                    uuid: None,
                    error: CodecError::UnknownTable {
                        table: table_name.clone(),
                    },
                });
                continue;
            };
            let Some(rows) = rows.as_object() else {
                skipped.push(SkippedFragment {
                    table: table_name.clone(),
                    uuid: None,
                    error: CodecError::invalid_structure("table update must be an object"),
                });
                continue;
            };

            let mut table_update = TableUpdate2::new();
            for (uuid, record) in rows {
                match decode_record(record, table) {
                    Ok(update) => table_update.insert(uuid.clone(), update),
                    Err(error) => skipped.push(SkippedFragment {
                        table: table_name.clone(),
                        uuid: Some(uuid.clone()),
                        error,
                    }),
                }
            }
            updates.insert(table_name.clone(), table_update);
        }
        Ok((updates, skipped))
    }

    /// Encodes the batch in wire notation.
    pub fn to_json(&self, schema: &DatabaseSchema) -> CodecResult<Json> {
        let mut tables = Map::new();
        for (name, update) in &self.tables {
            let table = schema.require_table(name)?;
            let mut rows = Map::new();
            for (uuid, record) in update.iter() {
                let mut object = Map::new();
                if let Some(row) = &record.initial {
                    object.insert("initial".into(), Json::Object(encode_row(row, table)?));
                }
                if let Some(row) = &record.insert {
                    object.insert("insert".into(), Json::Object(encode_row(row, table)?));
                }
                if let Some(row) = &record.modify {
                    object.insert("modify".into(), Json::Object(encode_diff_row(row, table)?));
                }
                if record.delete.is_some() {
                    object.insert("delete".into(), Json::Null);
                }
                rows.insert(uuid.clone(), Json::Object(object));
            }
            tables.insert(name.clone(), Json::Object(rows));
        }
        Ok(Json::Object(tables))
    }
}

impl IntoIterator for TableUpdates2 {
    type Item = (String, TableUpdate2);
    type IntoIter = std::vec::IntoIter<(String, TableUpdate2)>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.into_iter()
    }
}

fn decode_record(json: &Json, table: &crate::schema::TableSchema) -> CodecResult<RowUpdate2> {
    let object = json
        .as_object()
        .ok_or_else(|| CodecError::invalid_structure("row update must be an object"))?;
    let mut update = RowUpdate2::default();
    for (kind, payload) in object {
        match kind.as_str() {
            "initial" => update.initial = Some(decode_row(payload, table)?),
            "insert" => update.insert = Some(decode_row(payload, table)?),
            "modify" => update.modify = Some(decode_diff_row(payload, table)?),
            "delete" => {
                update.delete = Some(match payload {
                    Json::Null => Row::new(),
                    other => decode_row(other, table)?,
                })
            }
            other => {
                return Err(CodecError::invalid_structure(format!(
                    "unknown row update kind {other}"
                )))
            }
        }
    }
    if update.is_empty() {
        return Err(CodecError::invalid_structure("empty row update"));
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use serde_json::json;

    const UUID: &str = "2f77b348-9768-4866-b761-89d5177ecda0";

    fn schema() -> DatabaseSchema {
        DatabaseSchema::from_json(
            r#"{"name": "t", "version": "1", "tables": {
                "Bridge": {"columns": {
                    "name": {"type": "string"},
                    "ports": {"type": {"key": "integer", "min": 0, "max": "unlimited"}}
                }}
            }}"#,
        )
        .unwrap()
    }

    #[test]
    fn decode_all_kinds() {
        let wire = json!({"Bridge": {
            "a": {"initial": {"name": "br0"}},
            "b": {"insert": {"name": "br1", "ports": ["set", [1, 2]]}},
            "c": {"modify": {"ports": 3}},
            "d": {"delete": null}
        }});
        let (updates, skipped) = TableUpdates2::decode(&wire, &schema()).unwrap();
        assert!(skipped.is_empty());
        let bridge = updates.table("Bridge").unwrap();
        assert_eq!(bridge.len(), 4);
        assert_eq!(
            bridge.get("a").unwrap().initial.as_ref().unwrap().get("name"),
            Some(&Value::from("br0"))
        );
        assert_eq!(
            bridge.get("c").unwrap().modify.as_ref().unwrap().get("ports"),
            Some(&Value::set([3i64]))
        );
        assert_eq!(bridge.get("d").unwrap().delete, Some(Row::new()));
    }

    #[test]
    fn bad_fragments_are_skipped() {
        let wire = json!({
            "Nope": {UUID: {"insert": {}}},
            "Bridge": {
                "good": {"insert": {"name": "br0"}},
                "bad": {"insert": {"name": 5}}
            }
        });
        let (updates, skipped) = TableUpdates2::decode(&wire, &schema()).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates.row_count(), 1);
        assert_eq!(skipped.len(), 2);
        assert!(skipped.iter().any(|s| s.table == "Nope" && s.uuid.is_none()));
        assert!(skipped
            .iter()
            .any(|s| s.uuid.as_deref() == Some("bad")
                && matches!(s.error, CodecError::TypeMismatch { .. })));
    }

    #[test]
    fn encode_then_decode() {
        let schema = schema();
        let updates = TableUpdates2::new().with_table(
            "Bridge",
            TableUpdate2::new()
                .with_row(UUID, RowUpdate2::insert(Row::new().with("name", "br0")))
                .with_row("x", RowUpdate2::delete()),
        );
        let wire = updates.to_json(&schema).unwrap();
        assert_eq!(wire["Bridge"]["x"], json!({"delete": null}));
        let (decoded, _) = TableUpdates2::decode(&wire, &schema).unwrap();
        assert_eq!(decoded, updates);
    }

    #[test]
    fn insert_keeps_table_position() {
        let mut updates = TableUpdates2::new()
            .with_table("B", TableUpdate2::new())
            .with_table("A", TableUpdate2::new());
        updates.insert("B", TableUpdate2::new().with_row("r", RowUpdate2::delete()));
        let names: Vec<_> = updates.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(updates.table("B").unwrap().len(), 1);
    }
}
