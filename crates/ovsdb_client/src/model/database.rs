//! Registry of models for one database schema.

use crate::error::{ClientError, ClientResult};
use crate::model::{FieldBinding, Model};
use ovsdb_protocol::codec::default_value;
use ovsdb_protocol::{ColumnKind, DatabaseSchema, Row, TableSchema, Value, UUID_COLUMN};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Converts between rows of one table and one model type.
pub struct Mapper<M: Model> {
    table: TableSchema,
    bindings: Vec<FieldBinding<M>>,
    uuid_binding: usize,
}

impl<M: Model> Mapper<M> {
    fn new(schema: &DatabaseSchema) -> ClientResult<Self> {
        let table_name = M::table_name();
        let table = schema.table(table_name).ok_or_else(|| {
            ClientError::Unsupported(format!("table {table_name} is not in the schema"))
        })?;

        let bindings = M::bindings();
        let mut uuid_binding = None;
        for (i, binding) in bindings.iter().enumerate() {
            let column = table.column(binding.column()).ok_or_else(|| {
                ClientError::field_mismatch(table_name, binding.column(), "column not in schema")
            })?;
            binding
                .check(column)
                .map_err(|message| ClientError::field_mismatch(table_name, binding.column(), message))?;
            if bindings[..i].iter().any(|b| b.column() == binding.column()) {
                return Err(ClientError::field_mismatch(
                    table_name,
                    binding.column(),
                    "column bound twice",
                ));
            }
            if binding.column() == UUID_COLUMN {
                uuid_binding = Some(i);
            }
        }
        let uuid_binding = uuid_binding.ok_or_else(|| {
            ClientError::field_mismatch(table_name, UUID_COLUMN, "no field bound to _uuid")
        })?;

        Ok(Self {
            table: table.clone(),
            bindings,
            uuid_binding,
        })
    }

    /// Table schema of the model.
    pub fn table(&self) -> &TableSchema {
        &self.table
    }

    /// Bound columns, including `_uuid`.
    pub fn columns(&self) -> Vec<&'static str> {
        self.bindings.iter().map(FieldBinding::column).collect()
    }

    /// Looks up the binding of a column.
    pub fn binding(&self, column: &str) -> Option<&FieldBinding<M>> {
        self.bindings.iter().find(|b| b.column() == column)
    }

    fn require_binding(&self, column: &str) -> ClientResult<&FieldBinding<M>> {
        if self.table.column(column).is_none() {
            return Err(ClientError::Unsupported(format!(
                "column {column} is not in table {}",
                self.table.name
            )));
        }
        self.binding(column).ok_or_else(|| {
            ClientError::field_mismatch(&self.table.name, column, "no field bound to column")
        })
    }

    /// Returns the model's `_uuid` field; empty when unset.
    pub fn uuid(&self, model: &M) -> String {
        let binding = &self.bindings[self.uuid_binding];
        match self.table.column(UUID_COLUMN) {
            Some(column) => binding
                .encode(model, column)
                .ok()
                .and_then(|v| v.as_uuid().map(str::to_string))
                .filter(|uuid| uuid != ovsdb_protocol::codec::NIL_UUID)
                .unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Writes the model's `_uuid` field.
    pub fn set_uuid(&self, model: &mut M, uuid: &str) -> ClientResult<()> {
        let column = self.table.require_column(UUID_COLUMN)?;
        self.bindings[self.uuid_binding].decode(model, &Value::uuid(uuid), column)?;
        Ok(())
    }

    /// Reads one column of the model as a value.
    pub fn field_value(&self, model: &M, column: &str) -> ClientResult<Value> {
        let binding = self.require_binding(column)?;
        let schema = self.table.require_column(column)?;
        Ok(binding.encode(model, schema)?)
    }

    /// Returns true if the field bound to `column` holds its unset value.
    pub fn is_unset(&self, model: &M, column: &str) -> ClientResult<bool> {
        Ok(self.require_binding(column)?.is_unset(model))
    }

    /// Builds a model from a row. Columns absent from the row take their
    /// unset value.
    pub fn row_to_model(&self, row: &Row) -> ClientResult<M> {
        let mut model = M::default();
        for binding in &self.bindings {
            let column = self.table.require_column(binding.column())?;
            let default;
            let value = match row.get(binding.column()) {
                Some(value) => value,
                None => {
                    default = default_value(&column.column_type);
                    &default
                }
            };
            binding.decode(&mut model, value, column).map_err(|err| {
                ClientError::field_mismatch(&self.table.name, binding.column(), err.to_string())
            })?;
        }
        Ok(model)
    }

    /// Builds a row from a model.
    ///
    /// With `columns`, exactly those columns are emitted. Without, every
    /// user column whose field is set is emitted. Set and map cardinality
    /// is checked either way.
    pub fn model_to_row(&self, model: &M, columns: Option<&[&str]>) -> ClientResult<Row> {
        let mut row = Row::new();
        match columns {
            Some(columns) => {
                for name in columns {
                    let binding = self.require_binding(name)?;
                    row.insert(*name, self.encode_checked(binding, model)?);
                }
            }
            None => {
                for binding in &self.bindings {
                    let column = self.table.require_column(binding.column())?;
                    if column.is_internal() || binding.is_unset(model) {
                        continue;
                    }
                    row.insert(binding.column(), self.encode_checked(binding, model)?);
                }
            }
        }
        Ok(row)
    }

    fn encode_checked(&self, binding: &FieldBinding<M>, model: &M) -> ClientResult<Value> {
        let column = self.table.require_column(binding.column())?;
        let value = binding.encode(model, column)?;
        if column.kind() != ColumnKind::Scalar {
            column.column_type.check_cardinality(&column.name, value.len())?;
        }
        Ok(value)
    }
}

/// Type-erased row decoding, used by the cache.
pub(crate) trait RowDecoder: Send + Sync {
    fn decode(&self, row: &Row) -> ClientResult<Arc<dyn Any + Send + Sync>>;
}

impl<M: Model> RowDecoder for Mapper<M> {
    fn decode(&self, row: &Row) -> ClientResult<Arc<dyn Any + Send + Sync>> {
        Ok(Arc::new(self.row_to_model(row)?))
    }
}

/// A database schema together with the models registered against it.
pub struct DatabaseModel {
    schema: Arc<DatabaseSchema>,
    typed: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    decoders: HashMap<String, Arc<dyn RowDecoder>>,
}

impl DatabaseModel {
    /// Creates a registry with no models.
    pub fn new(schema: impl Into<Arc<DatabaseSchema>>) -> Self {
        Self {
            schema: schema.into(),
            typed: HashMap::new(),
            decoders: HashMap::new(),
        }
    }

    /// Registers a model type, validating its bindings against the schema.
    pub fn register<M: Model>(mut self) -> ClientResult<Self> {
        if self.decoders.contains_key(M::table_name()) {
            return Err(ClientError::Unsupported(format!(
                "table {} already has a model",
                M::table_name()
            )));
        }
        let mapper = Arc::new(Mapper::<M>::new(&self.schema)?);
        self.typed.insert(TypeId::of::<M>(), mapper.clone());
        self.decoders.insert(M::table_name().to_string(), mapper);
        Ok(self)
    }

    /// The database schema.
    pub fn schema(&self) -> &Arc<DatabaseSchema> {
        &self.schema
    }

    /// Returns the mapper of a registered model.
    pub fn mapper<M: Model>(&self) -> ClientResult<&Mapper<M>> {
        self.typed
            .get(&TypeId::of::<M>())
            .and_then(|m| m.as_ref().downcast_ref::<Mapper<M>>())
            .ok_or_else(|| {
                ClientError::Unsupported(format!(
                    "no model registered for table {}",
                    M::table_name()
                ))
            })
    }

    /// Returns true if a model is registered for `table`.
    pub fn has_model(&self, table: &str) -> bool {
        self.decoders.contains_key(table)
    }

    /// Decodes a row of `table` into its registered model, if any.
    pub(crate) fn decode_row(
        &self,
        table: &str,
        row: &Row,
    ) -> Option<ClientResult<Arc<dyn Any + Send + Sync>>> {
        self.decoders.get(table).map(|decoder| decoder.decode(row))
    }
}

impl std::fmt::Debug for DatabaseModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseModel")
            .field("database", &self.schema.name)
            .field("models", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}
