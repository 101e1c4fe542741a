//! Database schema model.
//!
//! A [`DatabaseSchema`] owns [`TableSchema`]s, which own [`ColumnSchema`]s.
//! Schemas are pure data: everything else in the workspace consumes them to
//! decode wire values, validate rows and build operations.
//!
//! Schemas can be assembled with the builder methods or parsed from the
//! standard `.ovsschema` JSON document:
//!
//! ```
//! use ovsdb_protocol::DatabaseSchema;
//!
//! let schema = DatabaseSchema::from_json(r#"{
//!     "name": "Test",
//!     "version": "1.0.0",
//!     "tables": {
//!         "Bridge": {
//!             "columns": {
//!                 "name": {"type": "string", "mutable": false}
//!             },
//!             "indexes": [["name"]]
//!         }
//!     }
//! }"#).unwrap();
//!
//! let bridge = schema.table("Bridge").unwrap();
//! assert!(!bridge.column("name").unwrap().mutable);
//! assert!(bridge.column("_uuid").is_some());
//! ```

use crate::error::{CodecError, CodecResult};
use serde::Deserialize;
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the implicit row identifier column.
pub const UUID_COLUMN: &str = "_uuid";

/// Name of the implicit row version column.
pub const VERSION_COLUMN: &str = "_version";

/// Marker used for an unbounded maximum cardinality.
pub const UNLIMITED: usize = usize::MAX;

/// Atomic element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    /// 64-bit signed integer.
    Integer,
    /// IEEE-754 double.
    Real,
    /// Boolean.
    Boolean,
    /// UTF-8 string.
    String,
    /// Row identifier.
    Uuid,
}

impl AtomicType {
    /// Returns the protocol name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            AtomicType::Integer => "integer",
            AtomicType::Real => "real",
            AtomicType::Boolean => "boolean",
            AtomicType::String => "string",
            AtomicType::Uuid => "uuid",
        }
    }

    /// Parses a protocol type name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(AtomicType::Integer),
            "real" => Some(AtomicType::Real),
            "boolean" => Some(AtomicType::Boolean),
            "string" => Some(AtomicType::String),
            "uuid" => Some(AtomicType::Uuid),
            _ => None,
        }
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strength of a reference to another table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefType {
    /// The referenced row may not be deleted while referenced.
    #[default]
    Strong,
    /// The reference is dropped when the referenced row goes away.
    Weak,
}

/// Element type of a column key or value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseType {
    /// Atomic kind.
    pub atomic: AtomicType,
    /// Referenced table, for UUID elements.
    pub ref_table: Option<String>,
    /// Reference strength, meaningful only with `ref_table`.
    pub ref_type: RefType,
}

impl BaseType {
    /// Creates a plain atomic base type.
    pub fn atomic(atomic: AtomicType) -> Self {
        Self {
            atomic,
            ref_table: None,
            ref_type: RefType::Strong,
        }
    }

    /// Creates a UUID base type referencing `table`.
    pub fn reference(table: impl Into<String>, ref_type: RefType) -> Self {
        Self {
            atomic: AtomicType::Uuid,
            ref_table: Some(table.into()),
            ref_type,
        }
    }

    fn to_json(&self) -> Json {
        match &self.ref_table {
            None => json!(self.atomic.as_str()),
            Some(table) => {
                let ref_type = match self.ref_type {
                    RefType::Strong => "strong",
                    RefType::Weak => "weak",
                };
                json!({"type": "uuid", "refTable": table, "refType": ref_type})
            }
        }
    }

    fn from_json(value: &Json) -> CodecResult<Self> {
        match value {
            Json::String(name) => AtomicType::parse(name)
                .map(Self::atomic)
                .ok_or_else(|| CodecError::invalid_structure(format!("unknown atomic type {name}"))),
            Json::Object(map) => {
                let name = map
                    .get("type")
                    .and_then(Json::as_str)
                    .ok_or_else(|| CodecError::invalid_structure("base type without \"type\""))?;
                let mut base = Self::atomic(AtomicType::parse(name).ok_or_else(|| {
                    CodecError::invalid_structure(format!("unknown atomic type {name}"))
                })?);
                if let Some(table) = map.get("refTable").and_then(Json::as_str) {
                    base.ref_table = Some(table.to_string());
                    base.ref_type = match map.get("refType").and_then(Json::as_str) {
                        Some("weak") => RefType::Weak,
                        _ => RefType::Strong,
                    };
                }
                Ok(base)
            }
            other => Err(CodecError::invalid_structure(format!(
                "invalid base type {other}"
            ))),
        }
    }
}

/// Container shape of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Exactly one atom.
    Scalar,
    /// A set of atoms (this includes optional scalars, `min 0 max 1`).
    Set,
    /// A map of atoms to atoms.
    Map,
}

/// Full type of a column: key, optional value and cardinality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    /// Key (or element) type.
    pub key: BaseType,
    /// Value type, present for maps only.
    pub value: Option<BaseType>,
    /// Minimum number of elements.
    pub min: usize,
    /// Maximum number of elements ([`UNLIMITED`] when unbounded).
    pub max: usize,
}

impl ColumnType {
    /// A required scalar column.
    pub fn scalar(atomic: AtomicType) -> Self {
        Self {
            key: BaseType::atomic(atomic),
            value: None,
            min: 1,
            max: 1,
        }
    }

    /// An optional scalar column (`min 0 max 1`).
    pub fn optional(atomic: AtomicType) -> Self {
        Self {
            min: 0,
            ..Self::scalar(atomic)
        }
    }

    /// A set column.
    pub fn set(key: BaseType, min: usize, max: usize) -> Self {
        Self {
            key,
            value: None,
            min,
            max,
        }
    }

    /// A map column.
    pub fn map(key: BaseType, value: BaseType, min: usize, max: usize) -> Self {
        Self {
            key,
            value: Some(value),
            min,
            max,
        }
    }

    /// Returns the container shape.
    pub fn kind(&self) -> ColumnKind {
        if self.value.is_some() {
            ColumnKind::Map
        } else if self.min == 1 && self.max == 1 {
            ColumnKind::Scalar
        } else {
            ColumnKind::Set
        }
    }

    /// Returns true for `min 0 max 1` set columns.
    pub fn is_optional(&self) -> bool {
        self.value.is_none() && self.min == 0 && self.max == 1
    }

    /// Checks an element count against the declared bounds.
    pub fn check_cardinality(&self, column: &str, actual: usize) -> CodecResult<()> {
        if actual < self.min || actual > self.max {
            return Err(CodecError::CardinalityViolation {
                column: column.to_string(),
                min: self.min,
                max: self.max,
                actual,
            });
        }
        Ok(())
    }

    fn to_json(&self) -> Json {
        if self.kind() == ColumnKind::Scalar && self.key.ref_table.is_none() {
            return self.key.to_json();
        }
        let mut map = serde_json::Map::new();
        map.insert("key".into(), self.key.to_json());
        if let Some(value) = &self.value {
            map.insert("value".into(), value.to_json());
        }
        map.insert("min".into(), json!(self.min));
        if self.max == UNLIMITED {
            map.insert("max".into(), json!("unlimited"));
        } else {
            map.insert("max".into(), json!(self.max));
        }
        Json::Object(map)
    }

    fn from_json(value: &Json) -> CodecResult<Self> {
        match value {
            Json::String(_) => Ok(Self {
                key: BaseType::from_json(value)?,
                value: None,
                min: 1,
                max: 1,
            }),
            Json::Object(map) => {
                let key = map
                    .get("key")
                    .ok_or_else(|| CodecError::invalid_structure("column type without \"key\""))?;
                let min = match map.get("min") {
                    None => 1,
                    Some(v) => v
                        .as_u64()
                        .ok_or_else(|| CodecError::invalid_structure("invalid \"min\""))?
                        as usize,
                };
                let max = match map.get("max") {
                    None => 1,
                    Some(Json::String(s)) if s == "unlimited" => UNLIMITED,
                    Some(v) => v
                        .as_u64()
                        .ok_or_else(|| CodecError::invalid_structure("invalid \"max\""))?
                        as usize,
                };
                if min > 1 || max == 0 || min > max {
                    return Err(CodecError::invalid_structure(format!(
                        "invalid cardinality {min}..{max}"
                    )));
                }
                Ok(Self {
                    key: BaseType::from_json(key)?,
                    value: map.get("value").map(BaseType::from_json).transpose()?,
                    min,
                    max,
                })
            }
            other => Err(CodecError::invalid_structure(format!(
                "invalid column type {other}"
            ))),
        }
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
    /// Whether the column may be changed after insertion.
    pub mutable: bool,
    /// Whether the column is excluded from durability.
    pub ephemeral: bool,
}

impl ColumnSchema {
    /// Creates a mutable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            mutable: true,
            ephemeral: false,
        }
    }

    /// Marks the column immutable.
    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    /// Returns the container shape.
    pub fn kind(&self) -> ColumnKind {
        self.column_type.kind()
    }

    /// Returns true for the implicit `_uuid` and `_version` columns.
    pub fn is_internal(&self) -> bool {
        self.name == UUID_COLUMN || self.name == VERSION_COLUMN
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    columns: BTreeMap<String, ColumnSchema>,
    /// Unique indexes, each a list of column names.
    pub indexes: Vec<Vec<String>>,
    /// Whether rows are kept even when unreferenced.
    pub is_root: bool,
    /// Maximum number of rows, if bounded.
    pub max_rows: Option<u64>,
}

impl TableSchema {
    /// Creates a table with only the implicit `_uuid` and `_version` columns.
    pub fn new(name: impl Into<String>) -> Self {
        let mut columns = BTreeMap::new();
        for internal in [UUID_COLUMN, VERSION_COLUMN] {
            columns.insert(
                internal.to_string(),
                ColumnSchema::new(internal, ColumnType::scalar(AtomicType::Uuid)).immutable(),
            );
        }
        Self {
            name: name.into(),
            columns,
            indexes: Vec::new(),
            is_root: true,
            max_rows: None,
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn with_column(mut self, column: ColumnSchema) -> Self {
        self.columns.insert(column.name.clone(), column);
        self
    }

    /// Adds a unique index over `columns`.
    #[must_use]
    pub fn with_index(mut self, columns: &[&str]) -> Self {
        self.indexes
            .push(columns.iter().map(|c| (*c).to_string()).collect());
        self
    }

    /// Sets the root flag.
    #[must_use]
    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Looks up a column, including `_uuid` and `_version`.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.get(name)
    }

    /// Looks up a column or fails with `UnknownColumn`.
    pub fn require_column(&self, name: &str) -> CodecResult<&ColumnSchema> {
        self.column(name)
            .ok_or_else(|| CodecError::unknown_column(&self.name, name))
    }

    /// Iterates over all columns, including internal ones.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.values()
    }

    /// Iterates over user-declared columns only.
    pub fn user_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.values().filter(|c| !c.is_internal())
    }

    /// Returns user-declared column names.
    pub fn user_column_names(&self) -> Vec<String> {
        self.user_columns().map(|c| c.name.clone()).collect()
    }

    fn to_json(&self) -> Json {
        let columns: serde_json::Map<String, Json> = self
            .user_columns()
            .map(|c| {
                let mut col = serde_json::Map::new();
                col.insert("type".into(), c.column_type.to_json());
                if !c.mutable {
                    col.insert("mutable".into(), json!(false));
                }
                if c.ephemeral {
                    col.insert("ephemeral".into(), json!(true));
                }
                (c.name.clone(), Json::Object(col))
            })
            .collect();
        let mut table = serde_json::Map::new();
        table.insert("columns".into(), Json::Object(columns));
        if !self.indexes.is_empty() {
            table.insert("indexes".into(), json!(self.indexes));
        }
        table.insert("isRoot".into(), json!(self.is_root));
        if let Some(max_rows) = self.max_rows {
            table.insert("maxRows".into(), json!(max_rows));
        }
        Json::Object(table)
    }
}

/// A database definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSchema {
    /// Database name.
    pub name: String,
    /// Schema version string.
    pub version: String,
    tables: BTreeMap<String, TableSchema>,
}

#[derive(Deserialize)]
struct RawDatabase {
    name: String,
    version: String,
    tables: BTreeMap<String, RawTable>,
}

#[derive(Deserialize)]
struct RawTable {
    columns: BTreeMap<String, RawColumn>,
    #[serde(default)]
    indexes: Vec<Vec<String>>,
    #[serde(default, rename = "isRoot")]
    is_root: bool,
    #[serde(default, rename = "maxRows")]
    max_rows: Option<u64>,
}

#[derive(Deserialize)]
struct RawColumn {
    #[serde(rename = "type")]
    column_type: Json,
    #[serde(default = "default_mutable")]
    mutable: bool,
    #[serde(default)]
    ephemeral: bool,
}

fn default_mutable() -> bool {
    true
}

impl DatabaseSchema {
    /// Creates an empty database schema.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Adds a table.
    #[must_use]
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Looks up a table.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Looks up a table or fails with `UnknownTable`.
    pub fn require_table(&self, name: &str) -> CodecResult<&TableSchema> {
        self.table(name).ok_or_else(|| CodecError::UnknownTable {
            table: name.to_string(),
        })
    }

    /// Iterates over all tables.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Returns the table names.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Parses a `.ovsschema` JSON document.
    pub fn from_json(text: &str) -> CodecResult<Self> {
        let value: Json = serde_json::from_str(text)?;
        Self::from_json_value(&value)
    }

    /// Parses an already decoded `.ovsschema` document.
    pub fn from_json_value(value: &Json) -> CodecResult<Self> {
        let raw = RawDatabase::deserialize(value)?;
        let mut schema = Self::new(raw.name, raw.version);

        for (table_name, raw_table) in raw.tables {
            let mut table = TableSchema::new(&table_name).with_root(raw_table.is_root);
            table.max_rows = raw_table.max_rows;
            for (column_name, raw_column) in raw_table.columns {
                if column_name.starts_with('_') {
                    return Err(CodecError::invalid_structure(format!(
                        "reserved column name {column_name} in table {table_name}"
                    )));
                }
                let mut column =
                    ColumnSchema::new(&column_name, ColumnType::from_json(&raw_column.column_type)?);
                column.mutable = raw_column.mutable;
                column.ephemeral = raw_column.ephemeral;
                table = table.with_column(column);
            }
            for index in &raw_table.indexes {
                for column in index {
                    table.require_column(column)?;
                }
            }
            table.indexes = raw_table.indexes;
            schema = schema.with_table(table);
        }

        schema.check_references()?;
        Ok(schema)
    }

    /// Renders the schema back to `.ovsschema` JSON.
    pub fn to_json(&self) -> Json {
        let tables: serde_json::Map<String, Json> = self
            .tables
            .values()
            .map(|t| (t.name.clone(), t.to_json()))
            .collect();
        json!({"name": self.name, "version": self.version, "tables": tables})
    }

    fn check_references(&self) -> CodecResult<()> {
        for table in self.tables.values() {
            for column in table.columns() {
                let ty = &column.column_type;
                for base in std::iter::once(&ty.key).chain(ty.value.iter()) {
                    if let Some(target) = &base.ref_table {
                        if !self.tables.contains_key(target) {
                            return Err(CodecError::invalid_structure(format!(
                                "column {}.{} references unknown table {target}",
                                table.name, column.name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "name": "Open_vSwitch",
        "version": "0.0.1",
        "tables": {
            "Open_vSwitch": {
                "columns": {
                    "bridges": {"type": {"key": {"type": "uuid", "refTable": "Bridge"}, "min": 0, "max": "unlimited"}}
                },
                "isRoot": true,
                "maxRows": 1
            },
            "Bridge": {
                "columns": {
                    "name": {"type": "string", "mutable": false},
                    "datapath_id": {"type": {"key": "string", "min": 0, "max": 1}},
                    "external_ids": {"type": {"key": "string", "value": "string", "min": 0, "max": "unlimited"}}
                },
                "indexes": [["name"]]
            }
        }
    }"#;

    #[test]
    fn parse_schema() {
        let schema = DatabaseSchema::from_json(SCHEMA).unwrap();
        assert_eq!(schema.name, "Open_vSwitch");
        assert_eq!(schema.table_names(), vec!["Bridge", "Open_vSwitch"]);

        let bridge = schema.table("Bridge").unwrap();
        assert_eq!(bridge.indexes, vec![vec!["name".to_string()]]);
        assert!(!bridge.is_root);

        let name = bridge.column("name").unwrap();
        assert_eq!(name.kind(), ColumnKind::Scalar);
        assert!(!name.mutable);

        let dpid = bridge.column("datapath_id").unwrap();
        assert_eq!(dpid.kind(), ColumnKind::Set);
        assert!(dpid.column_type.is_optional());

        let ids = bridge.column("external_ids").unwrap();
        assert_eq!(ids.kind(), ColumnKind::Map);
        assert_eq!(ids.column_type.max, UNLIMITED);

        let ovs = schema.table("Open_vSwitch").unwrap();
        let bridges = ovs.column("bridges").unwrap();
        assert_eq!(bridges.column_type.key.ref_table.as_deref(), Some("Bridge"));
        assert_eq!(bridges.column_type.key.ref_type, RefType::Strong);
        assert_eq!(ovs.max_rows, Some(1));
    }

    #[test]
    fn implicit_columns() {
        let table = TableSchema::new("T");
        assert!(table.column(UUID_COLUMN).unwrap().is_internal());
        assert!(table.column(VERSION_COLUMN).is_some());
        assert_eq!(table.user_columns().count(), 0);
    }

    #[test]
    fn rejects_dangling_reference() {
        let text = r#"{"name": "x", "version": "1", "tables": {
            "A": {"columns": {"b": {"type": {"key": {"type": "uuid", "refTable": "B"}}}}}
        }}"#;
        assert!(matches!(
            DatabaseSchema::from_json(text),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn rejects_index_on_unknown_column() {
        let text = r#"{"name": "x", "version": "1", "tables": {
            "A": {"columns": {"a": {"type": "string"}}, "indexes": [["nope"]]}
        }}"#;
        assert!(matches!(
            DatabaseSchema::from_json(text),
            Err(CodecError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn json_roundtrip_preserves_schema() {
        let schema = DatabaseSchema::from_json(SCHEMA).unwrap();
        let again = DatabaseSchema::from_json_value(&schema.to_json()).unwrap();
        assert_eq!(schema, again);
    }

    #[test]
    fn cardinality_check() {
        let ty = ColumnType::set(BaseType::atomic(AtomicType::Integer), 1, 2);
        assert!(ty.check_cardinality("c", 1).is_ok());
        assert!(ty.check_cardinality("c", 2).is_ok());
        assert!(ty.check_cardinality("c", 0).is_err());
        assert!(ty.check_cardinality("c", 3).is_err());
    }
}
