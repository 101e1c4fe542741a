//! Typed transaction builder.
//!
//! Turns model inserts, updates, mutations and deletes into protocol
//! operations. Rows inserted without a UUID get a named-UUID written back
//! into the model, so later operations of the same transaction can refer to
//! them before the server assigns real UUIDs.

use crate::error::{ClientError, ClientResult};
use crate::model::{DatabaseModel, Mapper, Model};
use ovsdb_protocol::{
    check_operation_results, Condition, Mutation, Operation, OperationResult, Row,
    TransactionError, Value, WaitUntil, UUID_COLUMN,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Prefix of generated named-UUIDs.
const NAMED_UUID_PREFIX: &str = "row_";

enum Clause<M> {
    Model(M),
    Conditions(Vec<Condition>),
}

/// Row selection of an update, mutate, delete, select or wait.
pub struct Where<M> {
    clause: Clause<M>,
    allow_empty: bool,
}

impl<M: Model> Where<M> {
    /// Matches the row of `model`: by `_uuid` when set, otherwise by
    /// equality on every set field.
    pub fn model(model: &M) -> Self {
        Self {
            clause: Clause::Model(model.clone()),
            allow_empty: false,
        }
    }

    /// Matches rows satisfying every condition.
    pub fn conditions(conditions: Vec<Condition>) -> Self {
        Self {
            clause: Clause::Conditions(conditions),
            allow_empty: false,
        }
    }

    /// Lets the operation match no row without failing.
    #[must_use]
    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    fn into_conditions(self, mapper: &Mapper<M>) -> ClientResult<Vec<Condition>> {
        let model = match self.clause {
            Clause::Conditions(conditions) => return Ok(conditions),
            Clause::Model(model) => model,
        };
        if !mapper.uuid(&model).is_empty() {
            let uuid = mapper.field_value(&model, UUID_COLUMN)?;
            return Ok(vec![Condition::equal(UUID_COLUMN, uuid)]);
        }
        let mut conditions = Vec::new();
        for column in mapper.columns() {
            if column == UUID_COLUMN || mapper.is_unset(&model, column)? {
                continue;
            }
            conditions.push(Condition::equal(column, mapper.field_value(&model, column)?));
        }
        if conditions.is_empty() {
            return Err(ClientError::Unsupported(format!(
                "where clause on {} has no field set",
                M::table_name()
            )));
        }
        Ok(conditions)
    }
}

impl<M> std::fmt::Debug for Where<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let clause = match &self.clause {
            Clause::Model(_) => "model".to_string(),
            Clause::Conditions(c) => format!("{} conditions", c.len()),
        };
        f.debug_struct("Where")
            .field("clause", &clause)
            .field("allow_empty", &self.allow_empty)
            .finish()
    }
}

/// Builds the operation list of one transaction.
#[derive(Debug)]
pub struct TransactionBuilder {
    model: Arc<DatabaseModel>,
    operations: Vec<Operation>,
    /// Named-UUID to the index of the insert declaring it.
    named: BTreeMap<String, usize>,
    /// Real UUIDs inserted by this transaction.
    inserted: BTreeSet<String>,
}

impl TransactionBuilder {
    /// Starts an empty transaction.
    pub fn new(model: Arc<DatabaseModel>) -> Self {
        Self {
            model,
            operations: Vec::new(),
            named: BTreeMap::new(),
            inserted: BTreeSet::new(),
        }
    }

    /// Operations built so far.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Consumes the builder.
    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    /// Returns true if no operation was added.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Inserts a model.
    ///
    /// An empty `_uuid` field receives a fresh named-UUID; a named-UUID set
    /// by the caller is kept; a real UUID asks the server to use it. The
    /// identity used is returned. Inserting the same identity twice fails
    /// with [`ClientError::IdentityConflict`].
    pub fn insert<M: Model>(&mut self, model: &mut M) -> ClientResult<String> {
        let mapper = self.model.mapper::<M>()?;
        let mut identity = mapper.uuid(model);
        if identity.is_empty() {
            identity = format!("{NAMED_UUID_PREFIX}{}", uuid::Uuid::new_v4().simple());
            mapper.set_uuid(model, &identity)?;
        }
        let real = uuid::Uuid::parse_str(&identity).is_ok();
        if self.named.contains_key(&identity) || self.inserted.contains(&identity) {
            return Err(ClientError::IdentityConflict { uuid: identity });
        }

        let row = mapper.model_to_row(model, None)?;
        let operation = Operation::insert(M::table_name(), row);
        let operation = if real {
            operation.with_uuid(identity.clone())
        } else {
            operation.with_uuid_name(identity.clone())
        };
        self.push(operation)?;
        if real {
            self.inserted.insert(identity.clone());
        } else {
            self.named.insert(identity.clone(), self.operations.len() - 1);
        }
        debug!(table = M::table_name(), identity = %identity, "insert built");
        Ok(identity)
    }

    /// Returns the value other rows use to refer to `model`: its real UUID,
    /// or the named-UUID of its insert in this transaction.
    pub fn reference<M: Model>(&self, model: &M) -> ClientResult<Value> {
        let mapper = self.model.mapper::<M>()?;
        if mapper.uuid(model).is_empty() {
            return Err(ClientError::Unsupported(format!(
                "{} model has no identity to refer to",
                M::table_name()
            )));
        }
        mapper.field_value(model, UUID_COLUMN)
    }

    /// Updates the rows selected by `where_` from the fields of `model`.
    ///
    /// With an empty `columns` list every set field is written, except
    /// immutable and internal columns. With a list exactly those columns are
    /// written, so an unset optional field clears the column; listing an
    /// immutable column fails with [`ClientError::ImmutableColumn`].
    pub fn update<M: Model>(
        &mut self,
        model: &M,
        where_: Where<M>,
        columns: &[&str],
    ) -> ClientResult<&mut Self> {
        let mapper = self.model.mapper::<M>()?;
        let table = mapper.table();
        let row = if columns.is_empty() {
            let mut row = mapper.model_to_row(model, None)?;
            row.retain(|name| {
                table
                    .column(name)
                    .is_some_and(|column| column.mutable && !column.is_internal())
            });
            row
        } else {
            for name in columns {
                let column = table.column(name).ok_or_else(|| {
                    ClientError::Unsupported(format!("column {name} is not in table {}", table.name))
                })?;
                if !column.mutable || column.is_internal() {
                    return Err(ClientError::ImmutableColumn {
                        table: table.name.clone(),
                        column: column.name.clone(),
                    });
                }
            }
            mapper.model_to_row(model, Some(columns))?
        };
        let require = !where_.allow_empty;
        let conditions = where_.into_conditions(mapper)?;
        self.push(Operation::update(M::table_name(), row, conditions).requiring_match(require))?;
        Ok(self)
    }

    /// Mutates the rows selected by `where_`.
    pub fn mutate<M: Model>(
        &mut self,
        where_: Where<M>,
        mutations: Vec<Mutation>,
    ) -> ClientResult<&mut Self> {
        let mapper = self.model.mapper::<M>()?;
        let table = mapper.table();
        for mutation in &mutations {
            let column = table.column(&mutation.column).ok_or_else(|| {
                ClientError::Unsupported(format!(
                    "column {} is not in table {}",
                    mutation.column, table.name
                ))
            })?;
            if !column.mutable || column.is_internal() {
                return Err(ClientError::ImmutableColumn {
                    table: table.name.clone(),
                    column: column.name.clone(),
                });
            }
        }
        let require = !where_.allow_empty;
        let conditions = where_.into_conditions(mapper)?;
        self.push(Operation::mutate(M::table_name(), mutations, conditions).requiring_match(require))?;
        Ok(self)
    }

    /// Deletes the rows selected by `where_`.
    pub fn delete<M: Model>(&mut self, where_: Where<M>) -> ClientResult<&mut Self> {
        let mapper = self.model.mapper::<M>()?;
        let require = !where_.allow_empty;
        let conditions = where_.into_conditions(mapper)?;
        self.push(Operation::delete(M::table_name(), conditions).requiring_match(require))?;
        Ok(self)
    }

    /// Selects the rows matched by `where_`. An empty `columns` list selects
    /// every column.
    pub fn select<M: Model>(&mut self, where_: Where<M>, columns: &[&str]) -> ClientResult<&mut Self> {
        let mapper = self.model.mapper::<M>()?;
        let conditions = where_.into_conditions(mapper)?;
        let mut operation = Operation::select(M::table_name(), conditions);
        if !columns.is_empty() {
            operation = operation.with_columns(columns.iter().map(|c| c.to_string()).collect());
        }
        self.push(operation)?;
        Ok(self)
    }

    /// Waits until the `columns` of the rows matched by `where_` equal (or
    /// differ from) those of `expected`.
    pub fn wait<M: Model>(
        &mut self,
        where_: Where<M>,
        columns: &[&str],
        until: WaitUntil,
        expected: &[M],
        timeout: Option<u64>,
    ) -> ClientResult<&mut Self> {
        let mapper = self.model.mapper::<M>()?;
        let rows = expected
            .iter()
            .map(|model| mapper.model_to_row(model, Some(columns)))
            .collect::<ClientResult<Vec<Row>>>()?;
        let conditions = where_.into_conditions(mapper)?;
        let mut operation = Operation::wait(
            M::table_name(),
            conditions,
            columns.iter().map(|c| c.to_string()).collect(),
            until,
            rows,
        );
        if let Some(timeout) = timeout {
            operation = operation.with_timeout(timeout);
        }
        self.push(operation)?;
        Ok(self)
    }

    /// Adds a comment to the transaction.
    pub fn comment(&mut self, text: impl Into<String>) -> &mut Self {
        self.operations.push(Operation::comment(text));
        self
    }

    /// Adds a commit request.
    pub fn commit(&mut self, durable: bool) -> &mut Self {
        self.operations.push(Operation::commit(durable));
        self
    }

    /// Adds an abort, failing the transaction at this point.
    pub fn abort(&mut self) -> &mut Self {
        self.operations.push(Operation::abort());
        self
    }

    /// Classifies a reply against the operations built.
    pub fn check(&self, results: &[OperationResult]) -> Result<(), TransactionError> {
        check_operation_results(results, &self.operations)
    }

    /// Maps every named-UUID of this transaction to the real UUID the
    /// server assigned, as reported in `results`.
    pub fn resolve(&self, results: &[OperationResult]) -> BTreeMap<String, String> {
        self.named
            .iter()
            .filter_map(|(name, index)| {
                results
                    .get(*index)
                    .and_then(|result| result.uuid.clone())
                    .map(|uuid| (name.clone(), uuid))
            })
            .collect()
    }

    /// Checks the operation against the schema and the named-UUIDs
    /// declared so far, then appends it.
    fn push(&mut self, operation: Operation) -> ClientResult<()> {
        operation.to_json(self.model.schema())?;
        let mut values: Vec<&Value> = Vec::new();
        if let Some(row) = &operation.row {
            values.extend(row.iter().map(|(_, value)| value));
        }
        values.extend(operation.mutations.iter().map(|m| &m.value));
        values.extend(operation.conditions.iter().map(|c| &c.value));
        for value in values {
            if let Some(name) = unknown_named_uuid(value, &self.named, operation.uuid_name.as_deref()) {
                return Err(ClientError::Unsupported(format!(
                    "named-uuid {name} is not inserted earlier in this transaction"
                )));
            }
        }
        self.operations.push(operation);
        Ok(())
    }
}

fn unknown_named_uuid<'a>(
    value: &'a Value,
    named: &BTreeMap<String, usize>,
    own: Option<&str>,
) -> Option<&'a str> {
    match value {
        Value::NamedUuid(name) if !named.contains_key(name) && own != Some(name.as_str()) => {
            Some(name)
        }
        Value::Set(set) => set.iter().find_map(|v| unknown_named_uuid(v, named, own)),
        Value::Map(map) => map.iter().find_map(|(k, v)| {
            unknown_named_uuid(k, named, own).or_else(|| unknown_named_uuid(v, named, own))
        }),
        _ => None,
    }
}
