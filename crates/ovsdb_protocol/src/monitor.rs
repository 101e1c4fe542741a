//! Monitor requests and column filtering.

use crate::error::{CodecError, CodecResult};
use crate::schema::{TableSchema, UUID_COLUMN};
use crate::update::TableUpdates2;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;

/// Which kinds of change a monitor wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSelect {
    /// Rows present when the monitor is created.
    #[serde(default = "yes")]
    pub initial: bool,
    /// Inserted rows.
    #[serde(default = "yes")]
    pub insert: bool,
    /// Deleted rows.
    #[serde(default = "yes")]
    pub delete: bool,
    /// Modified rows.
    #[serde(default = "yes")]
    pub modify: bool,
}

fn yes() -> bool {
    true
}

impl Default for MonitorSelect {
    fn default() -> Self {
        Self {
            initial: true,
            insert: true,
            delete: true,
            modify: true,
        }
    }
}

impl MonitorSelect {
    /// Selects nothing; enable kinds with the `with_*` methods.
    pub fn none() -> Self {
        Self {
            initial: false,
            insert: false,
            delete: false,
            modify: false,
        }
    }

    /// Sets the `initial` flag.
    #[must_use]
    pub fn with_initial(mut self, on: bool) -> Self {
        self.initial = on;
        self
    }

    /// Sets the `insert` flag.
    #[must_use]
    pub fn with_insert(mut self, on: bool) -> Self {
        self.insert = on;
        self
    }

    /// Sets the `delete` flag.
    #[must_use]
    pub fn with_delete(mut self, on: bool) -> Self {
        self.delete = on;
        self
    }

    /// Sets the `modify` flag.
    #[must_use]
    pub fn with_modify(mut self, on: bool) -> Self {
        self.modify = on;
        self
    }
}

/// Per-table monitor request: the requested columns and change kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRequest {
    /// Requested columns. `_uuid` is always delivered.
    pub columns: Vec<String>,
    /// Requested change kinds.
    pub select: MonitorSelect,
}

impl MonitorRequest {
    /// Requests the given columns with every change kind.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            select: MonitorSelect::default(),
        }
    }

    /// Requests every user column of a table.
    pub fn all_columns(table: &TableSchema) -> Self {
        Self::new(table.user_column_names())
    }

    /// Sets the change kinds.
    #[must_use]
    pub fn with_select(mut self, select: MonitorSelect) -> Self {
        self.select = select;
        self
    }

    /// Returns true if `column` is delivered to this monitor.
    pub fn wants_column(&self, column: &str) -> bool {
        column == UUID_COLUMN || self.columns.iter().any(|c| c == column)
    }

    /// Checks every requested column against the table.
    pub fn validate(&self, table: &TableSchema) -> CodecResult<()> {
        for column in &self.columns {
            table.require_column(column)?;
        }
        Ok(())
    }

    /// Renders the request in wire notation.
    pub fn to_json(&self) -> Json {
        json!({"columns": self.columns, "select": self.select})
    }

    /// Parses a wire request. Omitted columns mean every user column.
    pub fn from_json(json: &Json, table: &TableSchema) -> CodecResult<Self> {
        #[derive(Deserialize)]
        struct Raw {
            columns: Option<Vec<String>>,
            #[serde(default)]
            select: Option<MonitorSelect>,
            #[serde(default, rename = "where")]
            conditions: Option<Vec<Json>>,
        }

        let raw = Raw::deserialize(json)?;
        if raw.conditions.is_some_and(|c| !c.is_empty()) {
            return Err(CodecError::unsupported("conditional monitor clauses"));
        }
        let request = Self {
            columns: raw.columns.unwrap_or_else(|| table.user_column_names()),
            select: raw.select.unwrap_or_default(),
        };
        request.validate(table)?;
        Ok(request)
    }
}

/// Table name to [`MonitorRequest`].
pub type MonitorRequests = BTreeMap<String, MonitorRequest>;

/// Restricts an update batch to what `requests` asked for.
///
/// Tables absent from `requests` are removed. Every payload of the remaining
/// rows loses the columns not requested, except `_uuid`. Payloads that end up
/// empty are kept, so "no requested column changed" stays distinguishable
/// from "row not in this batch".
pub fn filter2(requests: &MonitorRequests, updates: &mut TableUpdates2) {
    updates.retain_tables(|table| requests.contains_key(table));
    for (table, update) in updates.iter_mut() {
        let Some(request) = requests.get(table) else {
            continue;
        };
        for (_, row_update) in update.iter_mut() {
            for payload in row_update.payloads_mut() {
                payload.retain(|column| request.wants_column(column));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Row;
    use crate::update::{RowUpdate2, TableUpdate2};
    use crate::value::Value;

    fn requests() -> MonitorRequests {
        MonitorRequests::from([("Bridge".to_string(), MonitorRequest::new(["name"]))])
    }

    fn bridge_row() -> Row {
        Row::new()
            .with(UUID_COLUMN, Value::uuid("foo"))
            .with("name", "bar")
            .with("external_ids", Value::map([("foo", "bar")]))
    }

    #[test]
    fn strips_unrequested_columns() {
        let mut updates = TableUpdates2::new().with_table(
            "Bridge",
            TableUpdate2::new().with_row("foo", RowUpdate2::insert(bridge_row())),
        );
        filter2(&requests(), &mut updates);

        let row = updates.table("Bridge").unwrap().get("foo").unwrap();
        let expected = Row::new()
            .with(UUID_COLUMN, Value::uuid("foo"))
            .with("name", "bar");
        assert_eq!(row.insert.as_ref(), Some(&expected));
    }

    #[test]
    fn drops_unrequested_tables() {
        let mut updates = TableUpdates2::new().with_table(
            "Open_vSwitch",
            TableUpdate2::new().with_row("foo", RowUpdate2::insert(bridge_row())),
        );
        filter2(&requests(), &mut updates);
        assert!(updates.is_empty());
        assert!(updates.table("Open_vSwitch").is_none());
    }

    #[test]
    fn keeps_emptied_payloads() {
        let mut updates = TableUpdates2::new().with_table(
            "Bridge",
            TableUpdate2::new().with_row(
                "foo",
                RowUpdate2::modify(Row::new().with("external_ids", Value::map([("a", "b")]))),
            ),
        );
        filter2(&requests(), &mut updates);
        let row = updates.table("Bridge").unwrap().get("foo").unwrap();
        assert_eq!(row.modify.as_ref(), Some(&Row::new()));
    }

    #[test]
    fn request_wire_form() {
        let table = TableSchema::new("Bridge").with_column(crate::schema::ColumnSchema::new(
            "name",
            crate::schema::ColumnType::scalar(crate::schema::AtomicType::String),
        ));
        let request = MonitorRequest::from_json(&json!({}), &table).unwrap();
        assert_eq!(request.columns, vec!["name"]);
        assert_eq!(request.select, MonitorSelect::default());

        let request = MonitorRequest::from_json(
            &json!({"columns": ["name"], "select": {"initial": false}}),
            &table,
        )
        .unwrap();
        assert!(!request.select.initial);
        assert!(request.select.modify);

        assert!(MonitorRequest::from_json(&json!({"columns": ["x"]}), &table).is_err());
        assert_eq!(
            MonitorRequest::new(["name"]).to_json(),
            json!({"columns": ["name"], "select": {"initial": true, "insert": true, "delete": true, "modify": true}})
        );
    }
}
