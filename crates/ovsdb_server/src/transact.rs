//! Transaction execution.
//!
//! Operations run in order against a copy-on-write view of the database:
//! a table is cloned the first time an operation writes to it. The first
//! failing operation stops the transaction and the view is discarded.
//! Once every operation has succeeded, referential integrity and row
//! limits are checked; a failure there is reported as one extra result
//! after the last operation.

use crate::database::{ChangeSet, Database, Staged, TableData};
use ovsdb_protocol::codec::{default_value, encode_row, normalize};
use ovsdb_protocol::{
    AtomicType, BaseType, CodecError, CodecResult, ColumnKind, ColumnSchema, Condition, ConditionFunction,
    DatabaseSchema, Mutator, Operation, OperationKind, OperationResult, RefType, Row,
    TableSchema, Value, WaitUntil, UUID_COLUMN, VERSION_COLUMN,
};
use serde_json::{json, Value as Json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// Why an operation failed, as sent in its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Failure {
    error: &'static str,
    details: String,
}

impl Failure {
    fn new(error: &'static str, details: impl Into<String>) -> Self {
        Self {
            error,
            details: details.into(),
        }
    }

    fn constraint(details: impl Into<String>) -> Self {
        Self::new("constraint violation", details)
    }

    fn referential(details: impl Into<String>) -> Self {
        Self::new("referential integrity violation", details)
    }

    fn syntax(details: impl Into<String>) -> Self {
        Self::new("syntax error", details)
    }

    fn domain(details: impl Into<String>) -> Self {
        Self::new("domain error", details)
    }

    fn range(details: impl Into<String>) -> Self {
        Self::new("range error", details)
    }

    fn into_result(self) -> OperationResult {
        OperationResult::error(self.error, self.details)
    }
}

impl From<CodecError> for Failure {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Unsupported { message } => Self::new("not supported", message),
            err @ CodecError::CardinalityViolation { .. } => Self::constraint(err.to_string()),
            err => Self::syntax(err.to_string()),
        }
    }
}

type OpResult<T> = Result<T, Failure>;

/// Result of running a transaction.
#[derive(Debug)]
pub(crate) struct Outcome {
    /// One entry per operation, `null` for those not attempted, plus one
    /// trailing error entry if the commit checks failed.
    pub(crate) results: Vec<Json>,
    /// Tables to install, when the transaction succeeded and changed rows.
    pub(crate) staged: Option<Staged>,
}

/// Runs wire operations against `db` without modifying it.
pub(crate) fn execute(db: &Database, operations: &[Json]) -> Outcome {
    let schema = db.schema();
    let parsed: Vec<CodecResult<Operation>> = operations
        .iter()
        .map(|op| Operation::from_json(op, schema))
        .collect();

    let mut txn = Transaction::new(db);
    let naming_failure = txn.allocate_names(&parsed);

    let mut results = Vec::with_capacity(operations.len() + 1);
    let mut failed = false;
    for (i, op) in parsed.iter().enumerate() {
        let outcome = match (&naming_failure, op) {
            (Some((index, failure)), _) if *index == i => Err(failure.clone()),
            (_, Err(err)) => Err(Failure::from(err.clone())),
            (_, Ok(op)) => txn.run(op),
        };
        match outcome {
            Ok(result) => results.push(result_json(&result)),
            Err(failure) => {
                debug!(index = i, error = failure.error, details = %failure.details, "operation failed");
                results.push(result_json(&failure.into_result()));
                failed = true;
                break;
            }
        }
    }

    if failed {
        results.resize(operations.len(), Json::Null);
        return Outcome {
            results,
            staged: None,
        };
    }

    match txn.finish() {
        Ok(staged) => Outcome { results, staged },
        Err(failure) => {
            debug!(error = failure.error, details = %failure.details, "commit rejected");
            results.push(result_json(&failure.into_result()));
            Outcome {
                results,
                staged: None,
            }
        }
    }
}

fn result_json(result: &OperationResult) -> Json {
    serde_json::to_value(result)
        .unwrap_or_else(|err| json!({"error": "internal error", "details": err.to_string()}))
}

fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

struct Transaction<'a> {
    db: &'a Database,
    schema: &'a DatabaseSchema,
    touched: BTreeMap<String, TableData>,
    named: HashMap<String, String>,
}

impl<'a> Transaction<'a> {
    fn new(db: &'a Database) -> Self {
        Self {
            db,
            schema: db.schema(),
            touched: BTreeMap::new(),
            named: HashMap::new(),
        }
    }

    /// Assigns a UUID to every `uuid-name` before execution starts, so any
    /// operation may reference any insert of the transaction.
    ///
    /// Stops at the first operation that failed to parse. Returns the index
    /// of a repeated name.
    fn allocate_names(&mut self, parsed: &[CodecResult<Operation>]) -> Option<(usize, Failure)> {
        for (i, op) in parsed.iter().enumerate() {
            let Ok(op) = op else {
                return None;
            };
            let (OperationKind::Insert, Some(name)) = (op.kind, &op.uuid_name) else {
                continue;
            };
            if self.named.contains_key(name) {
                return Some((
                    i,
                    Failure::new("duplicate uuid-name", format!("uuid-name {name} is used twice")),
                ));
            }
            let uuid = op.uuid.clone().unwrap_or_else(new_uuid);
            self.named.insert(name.clone(), uuid);
        }
        None
    }

    fn run(&mut self, op: &Operation) -> OpResult<OperationResult> {
        match op.kind {
            OperationKind::Insert => self.insert(op),
            OperationKind::Select => self.select(op),
            OperationKind::Update => self.update(op),
            OperationKind::Mutate => self.mutate(op),
            OperationKind::Delete => self.delete(op),
            OperationKind::Wait => self.wait(op),
            OperationKind::Commit => Ok(OperationResult::empty()),
            OperationKind::Abort => Err(Failure::new("aborted", "aborted by request")),
            OperationKind::Comment => {
                info!(comment = op.comment.as_deref().unwrap_or_default(), "transaction comment");
                Ok(OperationResult::empty())
            }
        }
    }

    fn table_schema(&self, op: &Operation) -> OpResult<&'a TableSchema> {
        let name = op
            .table
            .as_deref()
            .ok_or_else(|| Failure::syntax(format!("{} without table", op.kind.as_str())))?;
        Ok(self.schema.require_table(name)?)
    }

    fn table(&self, name: &str) -> OpResult<&TableData> {
        self.touched
            .get(name)
            .or_else(|| self.db.table_data(name))
            .ok_or_else(|| Failure::syntax(format!("unknown table {name}")))
    }

    fn table_mut(&mut self, name: &str) -> OpResult<&mut TableData> {
        if !self.touched.contains_key(name) {
            let base = self
                .db
                .table_data(name)
                .cloned()
                .ok_or_else(|| Failure::syntax(format!("unknown table {name}")))?;
            self.touched.insert(name.to_string(), base);
        }
        self.touched
            .get_mut(name)
            .ok_or_else(|| Failure::syntax(format!("unknown table {name}")))
    }

    /// Replaces named-UUIDs with the UUIDs allocated for them.
    fn resolve(&self, value: &Value) -> OpResult<Value> {
        match value {
            Value::NamedUuid(name) => self
                .named
                .get(name)
                .map(|uuid| Value::Uuid(uuid.clone()))
                .ok_or_else(|| Failure::syntax(format!("unknown uuid-name {name}"))),
            Value::Set(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<OpResult<BTreeSet<_>>>()
                .map(Value::Set),
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| Ok((self.resolve(k)?, self.resolve(v)?)))
                .collect::<OpResult<BTreeMap<_, _>>>()
                .map(Value::Map),
            atom => Ok(atom.clone()),
        }
    }

    fn resolve_row(&self, row: Option<&Row>) -> OpResult<Row> {
        row.into_iter()
            .flatten()
            .map(|(column, value)| Ok((column.clone(), self.resolve(value)?)))
            .collect()
    }

    /// UUIDs of the rows matching every condition.
    fn matching(&self, table: &TableSchema, conditions: &[Condition]) -> OpResult<Vec<String>> {
        let conditions = conditions
            .iter()
            .map(|c| {
                Ok(Condition {
                    value: self.resolve(&c.value)?,
                    ..c.clone()
                })
            })
            .collect::<OpResult<Vec<_>>>()?;
        let data = self.table(&table.name)?;

        // `_uuid == x` narrows the scan to one row.
        let pinned = conditions.iter().find_map(|c| match (&c.function, &c.value) {
            (ConditionFunction::Equal, Value::Uuid(uuid)) if c.column == UUID_COLUMN => Some(uuid),
            _ => None,
        });
        let candidates: Box<dyn Iterator<Item = (&String, &Row)>> = match pinned {
            Some(uuid) => Box::new(data.rows.get_key_value(uuid.as_str()).into_iter()),
            None => Box::new(data.rows.iter()),
        };

        let mut matched = Vec::new();
        'rows: for (uuid, row) in candidates {
            for condition in &conditions {
                if !evaluate(table, row, condition)? {
                    continue 'rows;
                }
            }
            matched.push(uuid.clone());
        }
        Ok(matched)
    }

    fn insert(&mut self, op: &Operation) -> OpResult<OperationResult> {
        let table = self.table_schema(op)?;
        let uuid = match &op.uuid_name {
            Some(name) => self
                .named
                .get(name)
                .cloned()
                .ok_or_else(|| Failure::syntax(format!("unknown uuid-name {name}")))?,
            None => op.uuid.clone().unwrap_or_else(new_uuid),
        };
        if self.table(&table.name)?.rows.contains_key(&uuid) {
            return Err(Failure::new(
                "duplicate uuid",
                format!("row {uuid} already exists in table {}", table.name),
            ));
        }

        let mut row = self.resolve_row(op.row.as_ref())?;
        row.fill_defaults(table);
        check_cardinality(table, &row)?;
        row.insert(UUID_COLUMN, Value::uuid(uuid.clone()));
        row.insert(VERSION_COLUMN, Value::uuid(new_uuid()));
        self.table_mut(&table.name)?
            .put(&uuid, row)
            .map_err(|holder| index_conflict(table, &uuid, &holder))?;
        Ok(OperationResult::inserted(uuid))
    }

    fn select(&mut self, op: &Operation) -> OpResult<OperationResult> {
        let table = self.table_schema(op)?;
        let uuids = self.matching(table, &op.conditions)?;
        let data = self.table(&table.name)?;
        let rows = uuids
            .iter()
            .filter_map(|uuid| data.rows.get(uuid))
            .map(|row| encode_row(&project(row, op.columns.as_deref()), table))
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(OperationResult::rows(rows))
    }

    fn update(&mut self, op: &Operation) -> OpResult<OperationResult> {
        let table = self.table_schema(op)?;
        let changes = self.resolve_row(op.row.as_ref())?;
        for name in changes.columns() {
            let column = table.require_column(name)?;
            if !column.mutable {
                return Err(Failure::constraint(format!(
                    "column {name} of table {} is immutable",
                    table.name
                )));
            }
        }
        check_cardinality(table, &changes)?;

        let uuids = self.matching(table, &op.conditions)?;
        let data = self.table_mut(&table.name)?;
        for uuid in &uuids {
            let Some(current) = data.rows.get(uuid).cloned() else {
                continue;
            };
            let mut next = current.clone();
            for (column, value) in &changes {
                next.insert(column.clone(), value.clone());
            }
            store_if_changed(data, table, uuid, &current, next)?;
        }
        Ok(OperationResult::count(uuids.len() as u64))
    }

    fn mutate(&mut self, op: &Operation) -> OpResult<OperationResult> {
        let table = self.table_schema(op)?;
        let mutations = op
            .mutations
            .iter()
            .map(|m| {
                let column = table.require_column(&m.column)?;
                if column.is_internal() || !column.mutable {
                    return Err(Failure::constraint(format!(
                        "column {} of table {} is immutable",
                        m.column, table.name
                    )));
                }
                Ok((column, m.mutator, self.resolve(&m.value)?))
            })
            .collect::<OpResult<Vec<_>>>()?;

        let uuids = self.matching(table, &op.conditions)?;
        let data = self.table_mut(&table.name)?;
        for uuid in &uuids {
            let Some(current) = data.rows.get(uuid).cloned() else {
                continue;
            };
            let mut next = current.clone();
            for (column, mutator, operand) in &mutations {
                let value = next
                    .get(&column.name)
                    .cloned()
                    .unwrap_or_else(|| default_value(&column.column_type));
                let mutated = mutate_value(column, value, *mutator, operand)?;
                if column.kind() != ColumnKind::Scalar {
                    column
                        .column_type
                        .check_cardinality(&column.name, mutated.len())?;
                }
                next.insert(column.name.clone(), mutated);
            }
            store_if_changed(data, table, uuid, &current, next)?;
        }
        Ok(OperationResult::count(uuids.len() as u64))
    }

    fn delete(&mut self, op: &Operation) -> OpResult<OperationResult> {
        let table = self.table_schema(op)?;
        let uuids = self.matching(table, &op.conditions)?;
        let data = self.table_mut(&table.name)?;
        for uuid in &uuids {
            data.remove(uuid);
        }
        Ok(OperationResult::count(uuids.len() as u64))
    }

    /// Compares the selected rows with the expected ones immediately; the
    /// timeout is not honoured.
    fn wait(&mut self, op: &Operation) -> OpResult<OperationResult> {
        let table = self.table_schema(op)?;
        let columns = op
            .columns
            .clone()
            .unwrap_or_else(|| table.user_column_names());
        let mut expected = op
            .rows
            .iter()
            .flatten()
            .map(|row| Ok(project(&self.resolve_row(Some(row))?, Some(columns.as_slice()))))
            .collect::<OpResult<Vec<_>>>()?;

        let uuids = self.matching(table, &op.conditions)?;
        let data = self.table(&table.name)?;
        let mut same = true;
        for row in uuids.iter().filter_map(|uuid| data.rows.get(uuid)) {
            let row = project(row, Some(columns.as_slice()));
            match expected.iter().position(|e| *e == row) {
                Some(i) => {
                    expected.swap_remove(i);
                }
                None => {
                    same = false;
                    break;
                }
            }
        }
        let same = same && expected.is_empty();

        match (op.until.unwrap_or(WaitUntil::Equal), same) {
            (WaitUntil::Equal, true) | (WaitUntil::NotEqual, false) => Ok(OperationResult::empty()),
            _ => Err(Failure::new(
                "timed out",
                format!("wait condition on table {} not met", table.name),
            )),
        }
    }

    /// Computes the change set and runs the commit-time checks.
    fn finish(self) -> OpResult<Option<Staged>> {
        let mut changes = ChangeSet::new();
        for (name, data) in &self.touched {
            let base = self.db.table_data(name);
            for (uuid, row) in &data.rows {
                let old = base.and_then(|b| b.rows.get(uuid));
                if old != Some(row) {
                    changes.record(name, uuid, old.cloned(), Some(row.clone()));
                }
            }
            for (uuid, row) in base.iter().flat_map(|b| b.rows.iter()) {
                if !data.rows.contains_key(uuid) {
                    changes.record(name, uuid, Some(row.clone()), None);
                }
            }
        }
        if changes.is_empty() {
            return Ok(None);
        }

        self.check_references(&changes)?;
        self.check_max_rows()?;
        Ok(Some(Staged {
            tables: self.touched,
            changes,
        }))
    }

    /// Strong references must point at existing rows, and a deleted row
    /// must not be strongly referenced by any remaining row.
    fn check_references(&self, changes: &ChangeSet) -> OpResult<()> {
        let mut deleted: HashMap<&str, HashSet<&str>> = HashMap::new();
        for (table_name, rows) in changes.tables() {
            let table = self.schema.require_table(table_name)?;
            for (uuid, change) in rows {
                let Some(row) = &change.new else {
                    deleted.entry(table_name).or_default().insert(uuid.as_str());
                    continue;
                };
                for (column, value) in row.iter() {
                    let Some(column) = table.column(column) else {
                        continue;
                    };
                    for (target, referenced) in strong_references(column, value) {
                        if self.table(target)?.rows.contains_key(referenced) {
                            continue;
                        }
                        return Err(Failure::referential(format!(
                            "{table_name} row {uuid} column {} references missing {target} row {referenced}",
                            column.name
                        )));
                    }
                }
            }
        }
        if deleted.is_empty() {
            return Ok(());
        }

        for table in self.schema.tables() {
            let columns: Vec<&ColumnSchema> = table
                .columns()
                .filter(|c| {
                    strong_target(&c.column_type.key)
                        .into_iter()
                        .chain(c.column_type.value.as_ref().and_then(strong_target))
                        .any(|target| deleted.contains_key(target))
                })
                .collect();
            if columns.is_empty() {
                continue;
            }
            for (uuid, row) in &self.table(&table.name)?.rows {
                for column in &columns {
                    let Some(value) = row.get(&column.name) else {
                        continue;
                    };
                    for (target, referenced) in strong_references(column, value) {
                        if deleted.get(target).is_some_and(|gone| gone.contains(referenced)) {
                            return Err(Failure::referential(format!(
                                "cannot delete {target} row {referenced}: referenced by {} row {uuid} column {}",
                                table.name, column.name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn check_max_rows(&self) -> OpResult<()> {
        for (name, data) in &self.touched {
            let table = self.schema.require_table(name)?;
            if let Some(max) = table.max_rows {
                if data.rows.len() as u64 > max {
                    return Err(Failure::constraint(format!(
                        "table {name} holds {} rows, at most {max} allowed",
                        data.rows.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn index_conflict(table: &TableSchema, uuid: &str, holder: &str) -> Failure {
    Failure::constraint(format!(
        "{} row {uuid} duplicates an index key of row {holder}",
        table.name
    ))
}

/// Stores `next` with a fresh `_version` if it differs from `current`.
fn store_if_changed(
    data: &mut TableData,
    table: &TableSchema,
    uuid: &str,
    current: &Row,
    mut next: Row,
) -> OpResult<()> {
    if next == *current {
        return Ok(());
    }
    next.insert(VERSION_COLUMN, Value::uuid(new_uuid()));
    data.put(uuid, next)
        .map_err(|holder| index_conflict(table, uuid, &holder))
}

fn check_cardinality(table: &TableSchema, row: &Row) -> OpResult<()> {
    for (name, value) in row.iter() {
        let column = table.require_column(name)?;
        if column.kind() != ColumnKind::Scalar {
            column.column_type.check_cardinality(name, value.len())?;
        }
    }
    Ok(())
}

fn project(row: &Row, columns: Option<&[String]>) -> Row {
    match columns {
        None => row.clone(),
        Some(columns) => columns
            .iter()
            .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
            .collect(),
    }
}

fn strong_target(base: &BaseType) -> Option<&str> {
    match (&base.ref_table, base.ref_type) {
        (Some(table), RefType::Strong) => Some(table.as_str()),
        _ => None,
    }
}

/// `(target table, uuid)` for every strong reference held by `value`.
fn strong_references<'c, 'v>(column: &'c ColumnSchema, value: &'v Value) -> Vec<(&'c str, &'v str)> {
    let key = strong_target(&column.column_type.key);
    let val = column.column_type.value.as_ref().and_then(strong_target);
    let mut refs = Vec::new();
    let mut push = |target: Option<&'c str>, atom: &'v Value| {
        if let (Some(target), Value::Uuid(uuid)) = (target, atom) {
            refs.push((target, uuid.as_str()));
        }
    };
    match value {
        Value::Map(entries) => {
            for (k, v) in entries {
                push(key, k);
                push(val, v);
            }
        }
        Value::Set(items) => {
            for item in items {
                push(key, item);
            }
        }
        atom => push(key, atom),
    }
    refs
}

fn evaluate(table: &TableSchema, row: &Row, condition: &Condition) -> OpResult<bool> {
    let column = table.require_column(&condition.column)?;
    let default = default_value(&column.column_type);
    let actual = row.get(&condition.column).unwrap_or(&default);
    let expected = normalize(condition.value.clone(), column);
    Ok(match condition.function {
        ConditionFunction::Equal => *actual == expected,
        ConditionFunction::NotEqual => *actual != expected,
        ConditionFunction::LessThan => compare(column, actual, &expected)?.is_some_and(Ordering::is_lt),
        ConditionFunction::LessThanOrEqual => {
            compare(column, actual, &expected)?.is_some_and(Ordering::is_le)
        }
        ConditionFunction::GreaterThan => compare(column, actual, &expected)?.is_some_and(Ordering::is_gt),
        ConditionFunction::GreaterThanOrEqual => {
            compare(column, actual, &expected)?.is_some_and(Ordering::is_ge)
        }
        ConditionFunction::Includes => includes(actual, &expected),
        ConditionFunction::Excludes => excludes(actual, &expected),
    })
}

fn single_atom(value: &Value) -> Option<&Value> {
    match value {
        Value::Set(items) if items.len() == 1 => items.iter().next(),
        Value::Set(_) | Value::Map(_) => None,
        atom => Some(atom),
    }
}

/// Orders two integer or real values. `None` when either side is an
/// empty optional.
fn compare(column: &ColumnSchema, actual: &Value, expected: &Value) -> OpResult<Option<Ordering>> {
    let numeric = matches!(
        column.column_type.key.atomic,
        AtomicType::Integer | AtomicType::Real
    );
    if !numeric || column.column_type.max > 1 || column.kind() == ColumnKind::Map {
        return Err(Failure::syntax(format!(
            "ordering comparison on non-numeric column {}",
            column.name
        )));
    }
    Ok(match (single_atom(actual), single_atom(expected)) {
        (Some(a), Some(b)) => Some(a.cmp(b)),
        _ => None,
    })
}

fn includes(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Set(have), Value::Set(want)) => want.is_subset(have),
        (Value::Map(have), Value::Map(want)) => want.iter().all(|(k, v)| have.get(k) == Some(v)),
        (have, want) => have == want,
    }
}

fn excludes(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Set(have), Value::Set(unwanted)) => have.is_disjoint(unwanted),
        (Value::Map(have), Value::Map(unwanted)) => {
            unwanted.iter().all(|(k, v)| have.get(k) != Some(v))
        }
        (have, unwanted) => have != unwanted,
    }
}

fn mutate_value(column: &ColumnSchema, value: Value, mutator: Mutator, operand: &Value) -> OpResult<Value> {
    if mutator.is_arithmetic() {
        return match value {
            Value::Set(items) => items
                .into_iter()
                .map(|atom| arithmetic(column, mutator, atom, operand))
                .collect::<OpResult<BTreeSet<_>>>()
                .map(Value::Set),
            Value::Map(_) => Err(Failure::syntax(format!(
                "{} is not applicable to map column {}",
                mutator.as_str(),
                column.name
            ))),
            atom => arithmetic(column, mutator, atom, operand),
        };
    }

    let not_applicable = || {
        Failure::syntax(format!(
            "{} is not applicable to column {}",
            mutator.as_str(),
            column.name
        ))
    };
    match (mutator, value, normalize(operand.clone(), column)) {
        (Mutator::Insert, Value::Set(mut items), Value::Set(extra)) => {
            items.extend(extra);
            Ok(Value::Set(items))
        }
        (Mutator::Insert, Value::Map(mut entries), Value::Map(extra)) => {
            // Existing keys keep their value.
            for (k, v) in extra {
                entries.entry(k).or_insert(v);
            }
            Ok(Value::Map(entries))
        }
        (Mutator::Delete, Value::Set(mut items), Value::Set(gone)) => {
            items.retain(|item| !gone.contains(item));
            Ok(Value::Set(items))
        }
        (Mutator::Delete, Value::Map(mut entries), Value::Map(gone)) => {
            entries.retain(|k, v| gone.get(k) != Some(v));
            Ok(Value::Map(entries))
        }
        (Mutator::Delete, Value::Map(mut entries), Value::Set(keys)) => {
            entries.retain(|k, _| !keys.contains(k));
            Ok(Value::Map(entries))
        }
        (Mutator::Delete, Value::Map(mut entries), key) if key.is_atom() => {
            entries.remove(&key);
            Ok(Value::Map(entries))
        }
        _ => Err(not_applicable()),
    }
}

fn arithmetic(column: &ColumnSchema, mutator: Mutator, atom: Value, operand: &Value) -> OpResult<Value> {
    let overflow = || Failure::range(format!("{} overflows column {}", mutator.as_str(), column.name));
    let by_zero = || Failure::domain(format!("division by zero on column {}", column.name));
    match (atom, operand) {
        (Value::Integer(a), Value::Integer(b)) => {
            let b = *b;
            let result = match mutator {
                Mutator::Add => a.checked_add(b),
                Mutator::Subtract => a.checked_sub(b),
                Mutator::Multiply => a.checked_mul(b),
                Mutator::Divide | Mutator::Modulo if b == 0 => return Err(by_zero()),
                Mutator::Divide => a.checked_div(b),
                Mutator::Modulo => a.checked_rem(b),
                Mutator::Insert | Mutator::Delete => return Err(Failure::syntax("not arithmetic")),
            };
            result.map(Value::Integer).ok_or_else(overflow)
        }
        (Value::Real(a), Value::Real(b)) => {
            let b = *b;
            let result = match mutator {
                Mutator::Add => a + b,
                Mutator::Subtract => a - b,
                Mutator::Multiply => a * b,
                Mutator::Divide if b == 0.0 => return Err(by_zero()),
                Mutator::Divide => a / b,
                _ => {
                    return Err(Failure::syntax(format!(
                        "{} is not applicable to real column {}",
                        mutator.as_str(),
                        column.name
                    )))
                }
            };
            if result.is_finite() {
                Ok(Value::Real(result))
            } else {
                Err(overflow())
            }
        }
        (atom, _) => Err(Failure::syntax(format!(
            "{} is not applicable to {} values of column {}",
            mutator.as_str(),
            atom.kind_name(),
            column.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsdb_protocol::parse_transact_reply;
    use std::sync::Arc;

    const SCHEMA: &str = r#"{
        "name": "Open_vSwitch",
        "version": "1",
        "tables": {
            "Open_vSwitch": {
                "columns": {
                    "bridges": {"type": {"key": {"type": "uuid", "refTable": "Bridge"}, "min": 0, "max": "unlimited"}},
                    "next_cfg": {"type": "integer"},
                    "load": {"type": "real"}
                },
                "isRoot": true,
                "maxRows": 1
            },
            "Bridge": {
                "columns": {
                    "name": {"type": "string", "mutable": false},
                    "datapath_id": {"type": {"key": "string", "min": 0, "max": 1}},
                    "flood_vlans": {"type": {"key": "integer", "min": 0, "max": 4}},
                    "external_ids": {"type": {"key": "string", "value": "string", "min": 0, "max": "unlimited"}}
                },
                "indexes": [["name"]]
            }
        }
    }"#;

    fn database() -> Database {
        Database::new(Arc::new(DatabaseSchema::from_json(SCHEMA).unwrap()), 16)
    }

    fn run(db: &mut Database, ops: Json) -> Vec<Json> {
        let ops = ops.as_array().unwrap().clone();
        let outcome = execute(db, &ops);
        if let Some(staged) = outcome.staged {
            db.commit(staged);
        }
        outcome.results
    }

    fn insert_bridge(db: &mut Database, name: &str) -> String {
        let results = run(
            db,
            json!([{"op": "insert", "table": "Bridge", "row": {"name": name}}]),
        );
        results[0]["uuid"][1].as_str().unwrap().to_string()
    }

    fn error_of(result: &Json) -> &str {
        result["error"].as_str().unwrap_or_default()
    }

    #[test]
    fn insert_and_select() {
        let mut db = database();
        let uuid = insert_bridge(&mut db, "br0");
        let row = db.get("Bridge", &uuid).unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("br0")));
        assert_eq!(row.uuid(), Some(uuid.as_str()));
        assert!(row.contains(VERSION_COLUMN));
        // Unset columns hold their defaults.
        assert_eq!(row.get("datapath_id"), Some(&Value::empty_set()));

        let results = run(
            &mut db,
            json!([{"op": "select", "table": "Bridge", "where": [["name", "==", "br0"]], "columns": ["name"]}]),
        );
        assert_eq!(results[0], json!({"rows": [{"name": "br0"}]}));
    }

    #[test]
    fn caller_chosen_uuid() {
        let mut db = database();
        let uuid = "7f8a2c5e-1b2d-4c3e-9f4a-5b6c7d8e9f00";
        let results = run(
            &mut db,
            json!([{"op": "insert", "table": "Bridge", "row": {"name": "br0"}, "uuid": ["uuid", uuid]}]),
        );
        assert_eq!(results[0]["uuid"], json!(["uuid", uuid]));

        let results = run(
            &mut db,
            json!([{"op": "insert", "table": "Bridge", "row": {"name": "br1"}, "uuid": ["uuid", uuid]}]),
        );
        assert_eq!(error_of(&results[0]), "duplicate uuid");
    }

    #[test]
    fn duplicate_index_key_is_a_constraint_violation() {
        let mut db = database();
        insert_bridge(&mut db, "br0");
        let results = run(
            &mut db,
            json!([{"op": "insert", "table": "Bridge", "row": {"name": "br0"}}]),
        );
        assert_eq!(error_of(&results[0]), "constraint violation");
        assert_eq!(db.row_count("Bridge"), 1);
    }

    #[test]
    fn failure_rolls_back_and_nulls_the_rest() {
        let mut db = database();
        insert_bridge(&mut db, "br0");
        let before = db.last_txn_id().to_string();

        let results = run(
            &mut db,
            json!([
                {"op": "insert", "table": "Bridge", "row": {"name": "br1"}},
                {"op": "insert", "table": "Bridge", "row": {"name": "br0"}},
                {"op": "insert", "table": "Bridge", "row": {"name": "br2"}}
            ]),
        );
        assert!(results[0]["uuid"].is_array());
        assert_eq!(error_of(&results[1]), "constraint violation");
        assert_eq!(results[2], Json::Null);
        assert_eq!(db.row_count("Bridge"), 1);
        assert_eq!(db.last_txn_id(), before);

        let parsed = parse_transact_reply(&Json::Array(results)).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(!parsed[2].is_error());
    }

    #[test]
    fn named_uuids_resolve_across_operations() {
        let mut db = database();
        let results = run(
            &mut db,
            json!([
                {"op": "insert", "table": "Open_vSwitch", "row": {"bridges": ["named-uuid", "br"]}},
                {"op": "insert", "table": "Bridge", "row": {"name": "br0"}, "uuid-name": "br"}
            ]),
        );
        let ovs = results[0]["uuid"][1].as_str().unwrap();
        let bridge = results[1]["uuid"][1].as_str().unwrap();
        assert_eq!(
            db.get("Open_vSwitch", ovs).and_then(|r| r.get("bridges")),
            Some(&Value::set([Value::uuid(bridge)]))
        );
    }

    #[test]
    fn duplicate_and_unknown_uuid_names() {
        let mut db = database();
        let results = run(
            &mut db,
            json!([
                {"op": "insert", "table": "Bridge", "row": {"name": "a"}, "uuid-name": "x"},
                {"op": "insert", "table": "Bridge", "row": {"name": "b"}, "uuid-name": "x"}
            ]),
        );
        assert!(results[0]["uuid"].is_array());
        assert_eq!(error_of(&results[1]), "duplicate uuid-name");

        let results = run(
            &mut db,
            json!([{"op": "insert", "table": "Open_vSwitch", "row": {"bridges": ["named-uuid", "nope"]}}]),
        );
        assert_eq!(error_of(&results[0]), "syntax error");
        assert_eq!(db.row_count("Bridge"), 0);
    }

    #[test]
    fn update_counts_and_rejects_immutable_columns() {
        let mut db = database();
        let uuid = insert_bridge(&mut db, "br0");
        insert_bridge(&mut db, "br1");

        let results = run(
            &mut db,
            json!([{"op": "update", "table": "Bridge", "where": [],
                    "row": {"external_ids": ["map", [["k", "v"]]]}}]),
        );
        assert_eq!(results[0], json!({"count": 2}));

        let results = run(
            &mut db,
            json!([{"op": "update", "table": "Bridge", "where": [["_uuid", "==", ["uuid", uuid]]],
                    "row": {"name": "renamed"}}]),
        );
        assert_eq!(error_of(&results[0]), "constraint violation");
    }

    #[test]
    fn update_unsets_optional_column() {
        let mut db = database();
        let results = run(
            &mut db,
            json!([{"op": "insert", "table": "Bridge", "row": {"name": "br0", "datapath_id": "dp"}}]),
        );
        let uuid = results[0]["uuid"][1].as_str().unwrap().to_string();
        let version = db.get("Bridge", &uuid).unwrap().get(VERSION_COLUMN).cloned();

        run(
            &mut db,
            json!([{"op": "update", "table": "Bridge", "where": [["_uuid", "==", ["uuid", uuid]]],
                    "row": {"datapath_id": ["set", []]}}]),
        );
        let row = db.get("Bridge", &uuid).unwrap();
        assert_eq!(row.get("datapath_id"), Some(&Value::empty_set()));
        assert_ne!(row.get(VERSION_COLUMN).cloned(), version);
    }

    #[test]
    fn mutate_sets_maps_and_integers() {
        let mut db = database();
        let uuid = insert_bridge(&mut db, "br0");
        let by_uuid = json!([["_uuid", "==", ["uuid", uuid]]]);

        let results = run(
            &mut db,
            json!([{"op": "mutate", "table": "Bridge", "where": by_uuid, "mutations": [
                ["flood_vlans", "insert", ["set", [1, 2, 3]]],
                ["flood_vlans", "delete", 2],
                ["flood_vlans", "+=", 10],
                ["external_ids", "insert", ["map", [["a", "1"], ["b", "2"]]]],
                ["external_ids", "insert", ["map", [["a", "changed"]]]],
                ["external_ids", "delete", ["set", ["b"]]]
            ]}]),
        );
        assert_eq!(results[0], json!({"count": 1}));
        let row = db.get("Bridge", &uuid).unwrap();
        assert_eq!(row.get("flood_vlans"), Some(&Value::set([11i64, 13])));
        assert_eq!(row.get("external_ids"), Some(&Value::map([("a", "1")])));
    }

    #[test]
    fn mutate_errors() {
        let mut db = database();
        let uuid = insert_bridge(&mut db, "br0");
        let by_uuid = json!([["_uuid", "==", ["uuid", uuid]]]);

        let results = run(
            &mut db,
            json!([{"op": "mutate", "table": "Bridge", "where": by_uuid,
                    "mutations": [["flood_vlans", "insert", ["set", [1, 2, 3, 4, 5]]]]}]),
        );
        assert_eq!(error_of(&results[0]), "constraint violation");

        let results = run(
            &mut db,
            json!([{"op": "mutate", "table": "Bridge", "where": by_uuid,
                    "mutations": [["name", "insert", "x"]]}]),
        );
        assert_eq!(error_of(&results[0]), "constraint violation");

        run(&mut db, json!([{"op": "insert", "table": "Open_vSwitch", "row": {"next_cfg": 7}}]));
        let results = run(
            &mut db,
            json!([{"op": "mutate", "table": "Open_vSwitch", "where": [],
                    "mutations": [["next_cfg", "/=", 0]]}]),
        );
        assert_eq!(error_of(&results[0]), "domain error");

        let results = run(
            &mut db,
            json!([{"op": "mutate", "table": "Open_vSwitch", "where": [],
                    "mutations": [["next_cfg", "+=", i64::MAX]]}]),
        );
        assert_eq!(error_of(&results[0]), "range error");
    }

    #[test]
    fn conditions() {
        let mut db = database();
        run(&mut db, json!([{"op": "insert", "table": "Open_vSwitch", "row": {"next_cfg": 5, "load": 0.5}}]));
        let count = |db: &mut Database, cond: Json| {
            let results = run(
                db,
                json!([{"op": "select", "table": "Open_vSwitch", "where": [cond], "columns": ["next_cfg"]}]),
            );
            results[0]["rows"].as_array().map_or(0, Vec::len)
        };
        assert_eq!(count(&mut db, json!(["next_cfg", "<", 6])), 1);
        assert_eq!(count(&mut db, json!(["next_cfg", "<=", 4])), 0);
        assert_eq!(count(&mut db, json!(["next_cfg", ">=", 5])), 1);
        assert_eq!(count(&mut db, json!(["next_cfg", "!=", 5])), 0);
        assert_eq!(count(&mut db, json!(["load", ">", 0.25])), 1);

        let uuid = insert_bridge(&mut db, "br0");
        run(
            &mut db,
            json!([{"op": "update", "table": "Bridge", "where": [],
                    "row": {"external_ids": ["map", [["a", "1"], ["b", "2"]]], "flood_vlans": ["set", [1, 2]]}}]),
        );
        let bridges = |db: &mut Database, cond: Json| {
            let results = run(db, json!([{"op": "select", "table": "Bridge", "where": [cond]}]));
            results[0]["rows"].as_array().map_or(0, Vec::len)
        };
        assert_eq!(bridges(&mut db, json!(["external_ids", "includes", ["map", [["a", "1"]]]])), 1);
        assert_eq!(bridges(&mut db, json!(["external_ids", "includes", ["map", [["a", "2"]]]])), 0);
        assert_eq!(bridges(&mut db, json!(["external_ids", "excludes", ["map", [["a", "2"]]]])), 1);
        assert_eq!(bridges(&mut db, json!(["flood_vlans", "includes", 2])), 1);
        assert_eq!(bridges(&mut db, json!(["flood_vlans", "excludes", ["set", [2, 3]]])), 0);
        assert_eq!(bridges(&mut db, json!(["_uuid", "==", ["uuid", uuid]])), 1);

        let results = run(
            &mut db,
            json!([{"op": "select", "table": "Bridge", "where": [["name", "<", "z"]]}]),
        );
        assert_eq!(error_of(&results[0]), "syntax error");
    }

    #[test]
    fn delete_checks_strong_references() {
        let mut db = database();
        let results = run(
            &mut db,
            json!([
                {"op": "insert", "table": "Bridge", "row": {"name": "br0"}, "uuid-name": "br"},
                {"op": "insert", "table": "Open_vSwitch", "row": {"bridges": ["named-uuid", "br"]}}
            ]),
        );
        let bridge = results[0]["uuid"][1].as_str().unwrap().to_string();

        let results = run(
            &mut db,
            json!([{"op": "delete", "table": "Bridge", "where": [["name", "==", "br0"]]}]),
        );
        // The delete itself succeeds; the commit check fails after it.
        assert_eq!(results[0], json!({"count": 1}));
        assert_eq!(error_of(&results[1]), "referential integrity violation");
        assert!(db.get("Bridge", &bridge).is_some());

        let results = run(
            &mut db,
            json!([
                {"op": "mutate", "table": "Open_vSwitch", "where": [],
                 "mutations": [["bridges", "delete", ["uuid", bridge]]]},
                {"op": "delete", "table": "Bridge", "where": [["name", "==", "br0"]]}
            ]),
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results[1], json!({"count": 1}));
        assert_eq!(db.row_count("Bridge"), 0);
    }

    #[test]
    fn dangling_strong_reference_is_rejected() {
        let mut db = database();
        let results = run(
            &mut db,
            json!([{"op": "insert", "table": "Open_vSwitch",
                    "row": {"bridges": ["uuid", "2f0e1c3a-5b6d-4e7f-8a9b-0c1d2e3f4a5b"]}}]),
        );
        assert_eq!(error_of(&results[1]), "referential integrity violation");
        assert_eq!(db.row_count("Open_vSwitch"), 0);
    }

    #[test]
    fn max_rows_is_enforced() {
        let mut db = database();
        let results = run(
            &mut db,
            json!([
                {"op": "insert", "table": "Open_vSwitch", "row": {}},
                {"op": "insert", "table": "Open_vSwitch", "row": {}}
            ]),
        );
        assert_eq!(error_of(&results[2]), "constraint violation");
        assert_eq!(db.row_count("Open_vSwitch"), 0);
    }

    #[test]
    fn wait_compares_immediately() {
        let mut db = database();
        insert_bridge(&mut db, "br0");
        let wait = |until: &str, name: &str| {
            json!([{"op": "wait", "table": "Bridge", "where": [], "columns": ["name"],
                    "until": until, "rows": [{"name": name}], "timeout": 0}])
        };
        assert_eq!(run(&mut db, wait("==", "br0"))[0], json!({}));
        assert_eq!(error_of(&run(&mut db, wait("==", "br1"))[0]), "timed out");
        assert_eq!(run(&mut db, wait("!=", "br1"))[0], json!({}));
    }

    #[test]
    fn abort_comment_and_unsupported_operations() {
        let mut db = database();
        let results = run(
            &mut db,
            json!([
                {"op": "comment", "comment": "adding br0"},
                {"op": "insert", "table": "Bridge", "row": {"name": "br0"}},
                {"op": "abort"}
            ]),
        );
        assert_eq!(results[0], json!({}));
        assert_eq!(error_of(&results[2]), "aborted");
        assert_eq!(db.row_count("Bridge"), 0);

        let results = run(&mut db, json!([{"op": "assert", "lock": "l"}]));
        assert_eq!(error_of(&results[0]), "not supported");

        let results = run(
            &mut db,
            json!([{"op": "insert", "table": "Bridge", "row": {"nope": 1}}]),
        );
        assert_eq!(error_of(&results[0]), "syntax error");
    }

    #[test]
    fn read_only_transactions_do_not_commit() {
        let mut db = database();
        let ops = vec![json!({"op": "select", "table": "Bridge", "where": []}), json!({"op": "commit", "durable": false})];
        let outcome = execute(&db, &ops);
        assert!(outcome.staged.is_none());
        assert_eq!(outcome.results, vec![json!({"rows": []}), json!({})]);
        insert_bridge(&mut db, "br0");
        assert_eq!(db.row_count("Bridge"), 1);
    }
}
