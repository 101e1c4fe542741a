//! Database operations and their results.

use crate::codec::{decode_atom, decode_loose, decode_row, encode_atom, encode_loose, encode_row, normalize};
use crate::error::{CodecError, CodecResult};
use crate::row::Row;
use crate::schema::{AtomicType, BaseType, DatabaseSchema, TableSchema};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use std::fmt;

/// Kind of a database operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Insert a row.
    Insert,
    /// Read rows.
    Select,
    /// Replace columns of matching rows.
    Update,
    /// Apply mutators to columns of matching rows.
    Mutate,
    /// Delete matching rows.
    Delete,
    /// Check a precondition on matching rows.
    Wait,
    /// Request a durable commit.
    Commit,
    /// Abort the transaction.
    Abort,
    /// Attach a comment to the transaction.
    Comment,
}

impl OperationKind {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Select => "select",
            OperationKind::Update => "update",
            OperationKind::Mutate => "mutate",
            OperationKind::Delete => "delete",
            OperationKind::Wait => "wait",
            OperationKind::Commit => "commit",
            OperationKind::Abort => "abort",
            OperationKind::Comment => "comment",
        }
    }

    /// Parses a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "insert" => OperationKind::Insert,
            "select" => OperationKind::Select,
            "update" => OperationKind::Update,
            "mutate" => OperationKind::Mutate,
            "delete" => OperationKind::Delete,
            "wait" => OperationKind::Wait,
            "commit" => OperationKind::Commit,
            "abort" => OperationKind::Abort,
            "comment" => OperationKind::Comment,
            _ => return None,
        })
    }

    /// Returns true for operations that name a table.
    pub fn has_table(&self) -> bool {
        !matches!(
            self,
            OperationKind::Commit | OperationKind::Abort | OperationKind::Comment
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison function of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionFunction {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `includes`
    Includes,
    /// `excludes`
    Excludes,
}

impl ConditionFunction {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionFunction::Equal => "==",
            ConditionFunction::NotEqual => "!=",
            ConditionFunction::LessThan => "<",
            ConditionFunction::LessThanOrEqual => "<=",
            ConditionFunction::GreaterThan => ">",
            ConditionFunction::GreaterThanOrEqual => ">=",
            ConditionFunction::Includes => "includes",
            ConditionFunction::Excludes => "excludes",
        }
    }

    /// Parses a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "==" => ConditionFunction::Equal,
            "!=" => ConditionFunction::NotEqual,
            "<" => ConditionFunction::LessThan,
            "<=" => ConditionFunction::LessThanOrEqual,
            ">" => ConditionFunction::GreaterThan,
            ">=" => ConditionFunction::GreaterThanOrEqual,
            "includes" => ConditionFunction::Includes,
            "excludes" => ConditionFunction::Excludes,
            _ => return None,
        })
    }
}

/// A `[column, function, value]` condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Condition {
    /// Column name.
    pub column: String,
    /// Comparison.
    pub function: ConditionFunction,
    /// Operand.
    pub value: Value,
}

impl Condition {
    /// Creates a condition.
    pub fn new(column: impl Into<String>, function: ConditionFunction, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            function,
            value: value.into(),
        }
    }

    /// Shorthand for an `==` condition.
    pub fn equal(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, ConditionFunction::Equal, value)
    }

    fn to_json(&self, table: &TableSchema) -> CodecResult<Json> {
        let column = table.require_column(&self.column)?;
        Ok(json!([
            self.column,
            self.function.as_str(),
            encode_loose(&self.value, column)?
        ]))
    }

    fn from_json(json: &Json, table: &TableSchema) -> CodecResult<Self> {
        let (name, function, operand) = triple(json, "condition")?;
        let column = table.require_column(name)?;
        let function = ConditionFunction::parse(function)
            .ok_or_else(|| CodecError::unsupported(format!("condition function {function}")))?;
        let value = normalize(decode_loose(operand, column)?, column);
        Ok(Self {
            column: name.to_string(),
            function,
            value,
        })
    }
}

/// Mutator of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutator {
    /// `+=`
    Add,
    /// `-=`
    Subtract,
    /// `*=`
    Multiply,
    /// `/=`
    Divide,
    /// `%=`
    Modulo,
    /// `insert`
    Insert,
    /// `delete`
    Delete,
}

impl Mutator {
    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mutator::Add => "+=",
            Mutator::Subtract => "-=",
            Mutator::Multiply => "*=",
            Mutator::Divide => "/=",
            Mutator::Modulo => "%=",
            Mutator::Insert => "insert",
            Mutator::Delete => "delete",
        }
    }

    /// Parses a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "+=" => Mutator::Add,
            "-=" => Mutator::Subtract,
            "*=" => Mutator::Multiply,
            "/=" => Mutator::Divide,
            "%=" => Mutator::Modulo,
            "insert" => Mutator::Insert,
            "delete" => Mutator::Delete,
            _ => return None,
        })
    }

    /// Returns true for the arithmetic mutators.
    pub fn is_arithmetic(&self) -> bool {
        !matches!(self, Mutator::Insert | Mutator::Delete)
    }
}

/// A `[column, mutator, value]` mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mutation {
    /// Column name.
    pub column: String,
    /// Mutator.
    pub mutator: Mutator,
    /// Operand.
    pub value: Value,
}

impl Mutation {
    /// Creates a mutation.
    pub fn new(column: impl Into<String>, mutator: Mutator, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            mutator,
            value: value.into(),
        }
    }

    fn to_json(&self, table: &TableSchema) -> CodecResult<Json> {
        let column = table.require_column(&self.column)?;
        let operand = if self.mutator.is_arithmetic() {
            encode_atom(&self.value, &column.column_type.key)?
        } else {
            encode_loose(&self.value, column)?
        };
        Ok(json!([self.column, self.mutator.as_str(), operand]))
    }

    fn from_json(json: &Json, table: &TableSchema) -> CodecResult<Self> {
        let (name, mutator, operand) = triple(json, "mutation")?;
        let column = table.require_column(name)?;
        let mutator = Mutator::parse(mutator)
            .ok_or_else(|| CodecError::unsupported(format!("mutator {mutator}")))?;
        let value = if mutator.is_arithmetic() {
            decode_atom(operand, &column.column_type.key)?
        } else {
            decode_loose(operand, column)?
        };
        Ok(Self {
            column: name.to_string(),
            mutator,
            value,
        })
    }
}

fn triple<'a>(json: &'a Json, what: &str) -> CodecResult<(&'a str, &'a str, &'a Json)> {
    match json.as_array().map(Vec::as_slice) {
        Some([Json::String(column), Json::String(function), operand]) => {
            Ok((column, function, operand))
        }
        _ => Err(CodecError::invalid_structure(format!(
            "{what} must be [column, function, value]"
        ))),
    }
}

/// Expected outcome of a `wait` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    /// The selected rows must equal the given rows.
    Equal,
    /// The selected rows must differ from the given rows.
    NotEqual,
}

impl WaitUntil {
    fn as_str(&self) -> &'static str {
        match self {
            WaitUntil::Equal => "==",
            WaitUntil::NotEqual => "!=",
        }
    }
}

/// A database operation, one element of a `transact` request.
///
/// Which fields are meaningful depends on [`Operation::kind`]; the
/// constructors set the right ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Operation kind.
    pub kind: OperationKind,
    /// Target table.
    pub table: Option<String>,
    /// Row for insert and update.
    pub row: Option<Row>,
    /// Expected rows for wait.
    pub rows: Option<Vec<Row>>,
    /// Column list for select and wait.
    pub columns: Option<Vec<String>>,
    /// Mutations for mutate.
    pub mutations: Vec<Mutation>,
    /// The `where` clause.
    pub conditions: Vec<Condition>,
    /// Caller-chosen UUID for insert.
    pub uuid: Option<String>,
    /// Named-UUID for insert.
    pub uuid_name: Option<String>,
    /// Wait outcome.
    pub until: Option<WaitUntil>,
    /// Wait timeout in milliseconds.
    pub timeout: Option<u64>,
    /// Durability flag for commit.
    pub durable: Option<bool>,
    /// Comment text.
    pub comment: Option<String>,
    /// Whether a zero row count is a failure. Not sent on the wire.
    pub require_match: bool,
}

impl Operation {
    fn with_kind(kind: OperationKind, table: Option<String>) -> Self {
        Self {
            kind,
            table,
            row: None,
            rows: None,
            columns: None,
            mutations: Vec::new(),
            conditions: Vec::new(),
            uuid: None,
            uuid_name: None,
            until: None,
            timeout: None,
            durable: None,
            comment: None,
            require_match: false,
        }
    }

    /// Creates an insert.
    pub fn insert(table: impl Into<String>, row: Row) -> Self {
        Self {
            row: Some(row),
            ..Self::with_kind(OperationKind::Insert, Some(table.into()))
        }
    }

    /// Creates a select.
    pub fn select(table: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            ..Self::with_kind(OperationKind::Select, Some(table.into()))
        }
    }

    /// Creates an update.
    pub fn update(table: impl Into<String>, row: Row, conditions: Vec<Condition>) -> Self {
        Self {
            row: Some(row),
            conditions,
            ..Self::with_kind(OperationKind::Update, Some(table.into()))
        }
    }

    /// Creates a mutate.
    pub fn mutate(table: impl Into<String>, mutations: Vec<Mutation>, conditions: Vec<Condition>) -> Self {
        Self {
            mutations,
            conditions,
            ..Self::with_kind(OperationKind::Mutate, Some(table.into()))
        }
    }

    /// Creates a delete.
    pub fn delete(table: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            ..Self::with_kind(OperationKind::Delete, Some(table.into()))
        }
    }

    /// Creates a wait.
    pub fn wait(
        table: impl Into<String>,
        conditions: Vec<Condition>,
        columns: Vec<String>,
        until: WaitUntil,
        rows: Vec<Row>,
    ) -> Self {
        Self {
            conditions,
            columns: Some(columns),
            until: Some(until),
            rows: Some(rows),
            ..Self::with_kind(OperationKind::Wait, Some(table.into()))
        }
    }

    /// Creates a commit.
    pub fn commit(durable: bool) -> Self {
        Self {
            durable: Some(durable),
            ..Self::with_kind(OperationKind::Commit, None)
        }
    }

    /// Creates an abort.
    pub fn abort() -> Self {
        Self::with_kind(OperationKind::Abort, None)
    }

    /// Creates a comment.
    pub fn comment(text: impl Into<String>) -> Self {
        Self {
            comment: Some(text.into()),
            ..Self::with_kind(OperationKind::Comment, None)
        }
    }

    /// Sets the named-UUID of an insert.
    #[must_use]
    pub fn with_uuid_name(mut self, name: impl Into<String>) -> Self {
        self.uuid_name = Some(name.into());
        self
    }

    /// Sets the caller-chosen UUID of an insert.
    #[must_use]
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Sets the column list.
    #[must_use]
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Sets the wait timeout.
    #[must_use]
    pub fn with_timeout(mut self, millis: u64) -> Self {
        self.timeout = Some(millis);
        self
    }

    /// Makes a zero row count fail the operation.
    #[must_use]
    pub fn requiring_match(mut self, require: bool) -> Self {
        self.require_match = require;
        self
    }

    fn table_schema<'a>(&self, schema: &'a DatabaseSchema) -> CodecResult<&'a TableSchema> {
        let name = self
            .table
            .as_deref()
            .ok_or_else(|| CodecError::invalid_structure(format!("{} without table", self.kind)))?;
        schema.require_table(name)
    }

    /// Renders the operation in wire notation, checking it against the schema.
    pub fn to_json(&self, schema: &DatabaseSchema) -> CodecResult<Json> {
        let mut object = Map::new();
        object.insert("op".into(), json!(self.kind.as_str()));

        if self.kind.has_table() {
            let table = self.table_schema(schema)?;
            object.insert("table".into(), json!(table.name));

            if let Some(row) = &self.row {
                object.insert("row".into(), Json::Object(encode_row(row, table)?));
            }
            if self.kind != OperationKind::Insert {
                let conditions = self
                    .conditions
                    .iter()
                    .map(|c| c.to_json(table))
                    .collect::<CodecResult<Vec<_>>>()?;
                object.insert("where".into(), Json::Array(conditions));
            }
            if self.kind == OperationKind::Mutate {
                let mutations = self
                    .mutations
                    .iter()
                    .map(|m| m.to_json(table))
                    .collect::<CodecResult<Vec<_>>>()?;
                object.insert("mutations".into(), Json::Array(mutations));
            }
            if let Some(columns) = &self.columns {
                for column in columns {
                    table.require_column(column)?;
                }
                object.insert("columns".into(), json!(columns));
            }
            if let Some(rows) = &self.rows {
                let rows = rows
                    .iter()
                    .map(|r| encode_row(r, table).map(Json::Object))
                    .collect::<CodecResult<Vec<_>>>()?;
                object.insert("rows".into(), Json::Array(rows));
            }
            if let Some(until) = self.until {
                object.insert("until".into(), json!(until.as_str()));
            }
            if let Some(timeout) = self.timeout {
                object.insert("timeout".into(), json!(timeout));
            }
            if let Some(name) = &self.uuid_name {
                object.insert("uuid-name".into(), json!(name));
            }
            if let Some(uuid) = &self.uuid {
                object.insert("uuid".into(), json!(["uuid", uuid]));
            }
        }
        if let Some(durable) = self.durable {
            object.insert("durable".into(), json!(durable));
        }
        if let Some(comment) = &self.comment {
            object.insert("comment".into(), json!(comment));
        }
        Ok(Json::Object(object))
    }

    /// Parses a wire operation, rejecting columns the schema does not declare.
    pub fn from_json(json: &Json, schema: &DatabaseSchema) -> CodecResult<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| CodecError::invalid_structure("operation must be an object"))?;
        let name = object
            .get("op")
            .and_then(Json::as_str)
            .ok_or_else(|| CodecError::invalid_structure("operation without \"op\""))?;
        let kind = OperationKind::parse(name)
            .ok_or_else(|| CodecError::unsupported(format!("operation {name}")))?;

        let mut op = Self::with_kind(kind, None);
        if kind.has_table() {
            let table_name = object
                .get("table")
                .and_then(Json::as_str)
                .ok_or_else(|| CodecError::invalid_structure(format!("{kind} without table")))?;
            let table = schema.require_table(table_name)?;
            op.table = Some(table_name.to_string());

            if let Some(row) = object.get("row") {
                op.row = Some(strict_row(row, table)?);
            }
            if let Some(Json::Array(conditions)) = object.get("where") {
                op.conditions = conditions
                    .iter()
                    .map(|c| Condition::from_json(c, table))
                    .collect::<CodecResult<_>>()?;
            }
            if let Some(Json::Array(mutations)) = object.get("mutations") {
                op.mutations = mutations
                    .iter()
                    .map(|m| Mutation::from_json(m, table))
                    .collect::<CodecResult<_>>()?;
            }
            if let Some(columns) = object.get("columns") {
                let columns = Vec::<String>::deserialize(columns)?;
                for column in &columns {
                    table.require_column(column)?;
                }
                op.columns = Some(columns);
            }
            if let Some(Json::Array(rows)) = object.get("rows") {
                op.rows = Some(
                    rows.iter()
                        .map(|r| strict_row(r, table))
                        .collect::<CodecResult<_>>()?,
                );
            }
            op.until = match object.get("until").and_then(Json::as_str) {
                None => None,
                Some("==") => Some(WaitUntil::Equal),
                Some("!=") => Some(WaitUntil::NotEqual),
                Some(other) => {
                    return Err(CodecError::invalid_structure(format!("invalid until {other}")))
                }
            };
            op.timeout = object.get("timeout").and_then(Json::as_u64);
            op.uuid_name = object
                .get("uuid-name")
                .and_then(Json::as_str)
                .map(str::to_string);
            if let Some(uuid) = object.get("uuid") {
                let value = decode_atom(uuid, &BaseType::atomic(AtomicType::Uuid))?;
                op.uuid = value.as_uuid().map(str::to_string);
            }
        }
        op.durable = object.get("durable").and_then(Json::as_bool);
        op.comment = object
            .get("comment")
            .and_then(Json::as_str)
            .map(str::to_string);
        Ok(op)
    }
}

fn strict_row(json: &Json, table: &TableSchema) -> CodecResult<Row> {
    if let Some(object) = json.as_object() {
        for name in object.keys() {
            let column = table.require_column(name)?;
            if column.is_internal() {
                return Err(CodecError::invalid_structure(format!(
                    "column {name} cannot be written"
                )));
            }
        }
    }
    decode_row(json, table)
}

mod uuid_pair {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(uuid: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
        match uuid {
            Some(uuid) => ("uuid", uuid).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        match Option::<(String, String)>::deserialize(deserializer)? {
            Some((tag, uuid)) if tag == "uuid" => Ok(Some(uuid)),
            Some((tag, _)) => Err(D::Error::custom(format!("expected uuid, found {tag}"))),
            None => Ok(None),
        }
    }
}

/// Result of one operation in a `transact` reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Number of rows matched by update, mutate or delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Error category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// UUID assigned by an insert.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "uuid_pair")]
    pub uuid: Option<String>,
    /// Rows returned by select.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Map<String, Json>>>,
}

impl OperationResult {
    /// A result with no payload.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result carrying a row count.
    pub fn count(count: u64) -> Self {
        Self {
            count: Some(count),
            ..Self::default()
        }
    }

    /// A successful insert result.
    pub fn inserted(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            ..Self::default()
        }
    }

    /// A select result.
    pub fn rows(rows: Vec<Map<String, Json>>) -> Self {
        Self {
            rows: Some(rows),
            ..Self::default()
        }
    }

    /// A failed result.
    pub fn error(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            details: Some(details.into()),
            ..Self::default()
        }
    }

    /// Returns true if the result carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Decodes select rows against a table.
    pub fn decode_rows(&self, table: &TableSchema) -> CodecResult<Vec<Row>> {
        self.rows
            .iter()
            .flatten()
            .map(|row| decode_row(&Json::Object(row.clone()), table))
            .collect()
    }
}
