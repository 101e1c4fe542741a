//! Field bindings between model fields and column values.

use ovsdb_protocol::codec::NIL_UUID;
use ovsdb_protocol::{AtomicType, CodecError, CodecResult, ColumnKind, ColumnSchema, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

/// A Rust type usable as a single atom.
pub trait Atom: Clone + Send + Sync + 'static {
    /// Returns true if the type can hold atoms of `atomic` type.
    fn accepts(atomic: AtomicType) -> bool;

    /// Converts to an atom of the column's `atomic` type.
    fn to_atom(&self, atomic: AtomicType) -> CodecResult<Value>;

    /// Converts from an atom.
    fn from_atom(value: &Value) -> CodecResult<Self>;

    /// Returns true for the type's zero value.
    fn is_zero(&self) -> bool;
}

impl Atom for bool {
    fn accepts(atomic: AtomicType) -> bool {
        atomic == AtomicType::Boolean
    }

    fn to_atom(&self, _atomic: AtomicType) -> CodecResult<Value> {
        Ok(Value::Boolean(*self))
    }

    fn from_atom(value: &Value) -> CodecResult<Self> {
        value
            .as_bool()
            .ok_or_else(|| CodecError::type_mismatch("boolean", value.kind_name()))
    }

    fn is_zero(&self) -> bool {
        !*self
    }
}

impl Atom for i64 {
    fn accepts(atomic: AtomicType) -> bool {
        atomic == AtomicType::Integer
    }

    fn to_atom(&self, _atomic: AtomicType) -> CodecResult<Value> {
        Ok(Value::Integer(*self))
    }

    fn from_atom(value: &Value) -> CodecResult<Self> {
        value
            .as_integer()
            .ok_or_else(|| CodecError::type_mismatch("integer", value.kind_name()))
    }

    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl Atom for f64 {
    fn accepts(atomic: AtomicType) -> bool {
        atomic == AtomicType::Real
    }

    fn to_atom(&self, _atomic: AtomicType) -> CodecResult<Value> {
        Ok(Value::Real(*self))
    }

    fn from_atom(value: &Value) -> CodecResult<Self> {
        value
            .as_real()
            .ok_or_else(|| CodecError::type_mismatch("real", value.kind_name()))
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

/// Strings bind to string columns and to UUID columns.
///
/// In a UUID column a well-formed UUID becomes a UUID atom, any other
/// string a named-UUID, and the empty string the nil UUID.
impl Atom for String {
    fn accepts(atomic: AtomicType) -> bool {
        matches!(atomic, AtomicType::String | AtomicType::Uuid)
    }

    fn to_atom(&self, atomic: AtomicType) -> CodecResult<Value> {
        match atomic {
            AtomicType::String => Ok(Value::String(self.clone())),
            AtomicType::Uuid if self.is_empty() => Ok(Value::uuid(NIL_UUID)),
            AtomicType::Uuid if uuid::Uuid::parse_str(self).is_ok() => Ok(Value::uuid(self.clone())),
            AtomicType::Uuid => Ok(Value::named_uuid(self.clone())),
            other => Err(CodecError::type_mismatch(other.as_str(), "string")),
        }
    }

    fn from_atom(value: &Value) -> CodecResult<Self> {
        match value {
            Value::String(s) | Value::NamedUuid(s) => Ok(s.clone()),
            Value::Uuid(s) if s == NIL_UUID => Ok(String::new()),
            Value::Uuid(s) => Ok(s.clone()),
            other => Err(CodecError::type_mismatch("string", other.kind_name())),
        }
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

/// Container shape a field type expects of its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// A required scalar.
    Scalar,
    /// An optional scalar (`min 0 max 1`).
    Optional,
    /// A set.
    Set,
    /// A map.
    Map,
}

/// A Rust type usable as a whole column value.
pub trait ColumnValue: Clone + Send + Sync + 'static {
    /// Container shape of the type.
    fn shape() -> FieldShape;

    /// Returns true if key (and value) atoms of `column` fit the type.
    fn accepts(column: &ColumnSchema) -> bool;

    /// Converts to the column's canonical value.
    fn to_value(&self, column: &ColumnSchema) -> CodecResult<Value>;

    /// Converts from the column's canonical value.
    fn from_value(value: &Value, column: &ColumnSchema) -> CodecResult<Self>;

    /// Returns true for the "unset" convention of the type.
    fn is_unset(&self) -> bool;
}

fn atom_of<'a>(value: &'a Value) -> CodecResult<&'a Value> {
    match value {
        Value::Set(set) if set.len() == 1 => set
            .iter()
            .next()
            .ok_or_else(|| CodecError::invalid_structure("empty scalar")),
        atom if atom.is_atom() => Ok(atom),
        other => Err(CodecError::type_mismatch("atom", other.kind_name())),
    }
}

fn set_elements(value: &Value) -> Vec<&Value> {
    match value {
        Value::Set(set) => set.iter().collect(),
        atom => vec![atom],
    }
}

macro_rules! scalar_column_value {
    ($($ty:ty),*) => {$(
        impl ColumnValue for $ty {
            fn shape() -> FieldShape {
                FieldShape::Scalar
            }

            fn accepts(column: &ColumnSchema) -> bool {
                <$ty as Atom>::accepts(column.column_type.key.atomic)
            }

            fn to_value(&self, column: &ColumnSchema) -> CodecResult<Value> {
                self.to_atom(column.column_type.key.atomic)
            }

            fn from_value(value: &Value, _column: &ColumnSchema) -> CodecResult<Self> {
                <$ty as Atom>::from_atom(atom_of(value)?)
            }

            fn is_unset(&self) -> bool {
                self.is_zero()
            }
        }
    )*};
}

scalar_column_value!(bool, i64, f64, String);

impl<T: Atom> ColumnValue for Option<T> {
    fn shape() -> FieldShape {
        FieldShape::Optional
    }

    fn accepts(column: &ColumnSchema) -> bool {
        T::accepts(column.column_type.key.atomic)
    }

    fn to_value(&self, column: &ColumnSchema) -> CodecResult<Value> {
        Ok(Value::Set(
            self.iter()
                .map(|v| v.to_atom(column.column_type.key.atomic))
                .collect::<CodecResult<BTreeSet<_>>>()?,
        ))
    }

    fn from_value(value: &Value, _column: &ColumnSchema) -> CodecResult<Self> {
        match set_elements(value).as_slice() {
            [] => Ok(None),
            [atom] => T::from_atom(atom).map(Some),
            more => Err(CodecError::type_mismatch(
                "optional value",
                format!("set of {}", more.len()),
            )),
        }
    }

    fn is_unset(&self) -> bool {
        self.is_none()
    }
}

impl<T: Atom> ColumnValue for Vec<T> {
    fn shape() -> FieldShape {
        FieldShape::Set
    }

    fn accepts(column: &ColumnSchema) -> bool {
        T::accepts(column.column_type.key.atomic)
    }

    fn to_value(&self, column: &ColumnSchema) -> CodecResult<Value> {
        Ok(Value::Set(
            self.iter()
                .map(|v| v.to_atom(column.column_type.key.atomic))
                .collect::<CodecResult<_>>()?,
        ))
    }

    fn from_value(value: &Value, _column: &ColumnSchema) -> CodecResult<Self> {
        set_elements(value).into_iter().map(T::from_atom).collect()
    }

    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

impl<T: Atom + Ord> ColumnValue for BTreeSet<T> {
    fn shape() -> FieldShape {
        FieldShape::Set
    }

    fn accepts(column: &ColumnSchema) -> bool {
        T::accepts(column.column_type.key.atomic)
    }

    fn to_value(&self, column: &ColumnSchema) -> CodecResult<Value> {
        Ok(Value::Set(
            self.iter()
                .map(|v| v.to_atom(column.column_type.key.atomic))
                .collect::<CodecResult<_>>()?,
        ))
    }

    fn from_value(value: &Value, _column: &ColumnSchema) -> CodecResult<Self> {
        set_elements(value).into_iter().map(T::from_atom).collect()
    }

    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

fn map_accepts<K: Atom, V: Atom>(column: &ColumnSchema) -> bool {
    let ty = &column.column_type;
    K::accepts(ty.key.atomic) && ty.value.as_ref().is_some_and(|v| V::accepts(v.atomic))
}

fn map_to_value<'a, K: Atom + 'a, V: Atom + 'a>(
    entries: impl Iterator<Item = (&'a K, &'a V)>,
    column: &ColumnSchema,
) -> CodecResult<Value> {
    let ty = &column.column_type;
    let value_type = ty
        .value
        .as_ref()
        .ok_or_else(|| CodecError::type_mismatch("map", "set"))?;
    entries
        .map(|(k, v)| Ok((k.to_atom(ty.key.atomic)?, v.to_atom(value_type.atomic)?)))
        .collect::<CodecResult<BTreeMap<_, _>>>()
        .map(Value::Map)
}

fn map_entries(value: &Value) -> CodecResult<&BTreeMap<Value, Value>> {
    value
        .as_map()
        .ok_or_else(|| CodecError::type_mismatch("map", value.kind_name()))
}

impl<K: Atom + Ord, V: Atom> ColumnValue for BTreeMap<K, V> {
    fn shape() -> FieldShape {
        FieldShape::Map
    }

    fn accepts(column: &ColumnSchema) -> bool {
        map_accepts::<K, V>(column)
    }

    fn to_value(&self, column: &ColumnSchema) -> CodecResult<Value> {
        map_to_value(self.iter(), column)
    }

    fn from_value(value: &Value, _column: &ColumnSchema) -> CodecResult<Self> {
        map_entries(value)?
            .iter()
            .map(|(k, v)| Ok((K::from_atom(k)?, V::from_atom(v)?)))
            .collect()
    }

    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

impl<K: Atom + Eq + Hash, V: Atom> ColumnValue for HashMap<K, V> {
    fn shape() -> FieldShape {
        FieldShape::Map
    }

    fn accepts(column: &ColumnSchema) -> bool {
        map_accepts::<K, V>(column)
    }

    fn to_value(&self, column: &ColumnSchema) -> CodecResult<Value> {
        map_to_value(self.iter(), column)
    }

    fn from_value(value: &Value, _column: &ColumnSchema) -> CodecResult<Self> {
        map_entries(value)?
            .iter()
            .map(|(k, v)| Ok((K::from_atom(k)?, V::from_atom(v)?)))
            .collect()
    }

    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

type EncodeFn<M> = Box<dyn Fn(&M, &ColumnSchema) -> CodecResult<Value> + Send + Sync>;
type DecodeFn<M> = Box<dyn Fn(&mut M, &Value, &ColumnSchema) -> CodecResult<()> + Send + Sync>;
type UnsetFn<M> = Box<dyn Fn(&M) -> bool + Send + Sync>;
type ClearFn<M> = Box<dyn Fn(&mut M) + Send + Sync>;

/// Binds one model field to one column.
///
/// Built from a pair of accessors; the field's type decides the codec:
///
/// ```
/// use ovsdb_client::FieldBinding;
///
/// #[derive(Default)]
/// struct Bridge {
///     uuid: String,
///     name: String,
/// }
///
/// let bindings: Vec<FieldBinding<Bridge>> = vec![
///     FieldBinding::new("_uuid", |b| &b.uuid, |b| &mut b.uuid),
///     FieldBinding::new("name", |b| &b.name, |b| &mut b.name),
/// ];
/// assert_eq!(bindings[1].column(), "name");
/// ```
pub struct FieldBinding<M> {
    column: &'static str,
    shape: FieldShape,
    accepts: fn(&ColumnSchema) -> bool,
    encode: EncodeFn<M>,
    decode: DecodeFn<M>,
    is_unset: UnsetFn<M>,
    clear: ClearFn<M>,
}

impl<M: 'static> FieldBinding<M> {
    /// Binds the field reached through `get`/`get_mut` to `column`.
    pub fn new<T: ColumnValue + Default>(
        column: &'static str,
        get: fn(&M) -> &T,
        get_mut: fn(&mut M) -> &mut T,
    ) -> Self {
        Self {
            column,
            shape: T::shape(),
            accepts: T::accepts,
            encode: Box::new(move |model, schema| get(model).to_value(schema)),
            decode: Box::new(move |model, value, schema| {
                *get_mut(model) = T::from_value(value, schema)?;
                Ok(())
            }),
            is_unset: Box::new(move |model| get(model).is_unset()),
            clear: Box::new(move |model| *get_mut(model) = T::default()),
        }
    }

    /// Bound column name.
    pub fn column(&self) -> &'static str {
        self.column
    }

    /// Container shape of the field.
    pub fn shape(&self) -> FieldShape {
        self.shape
    }

    /// Checks the field type against the column's schema.
    pub fn check(&self, column: &ColumnSchema) -> Result<(), String> {
        let kind_ok = match self.shape {
            FieldShape::Scalar => column.kind() == ColumnKind::Scalar,
            FieldShape::Optional => column.column_type.is_optional(),
            FieldShape::Set => column.kind() == ColumnKind::Set,
            FieldShape::Map => column.kind() == ColumnKind::Map,
        };
        if !kind_ok {
            return Err(format!(
                "field shape {:?} does not fit a {:?} column",
                self.shape,
                column.kind()
            ));
        }
        if !(self.accepts)(column) {
            return Err(format!(
                "field type does not hold {} atoms",
                column.column_type.key.atomic
            ));
        }
        Ok(())
    }

    /// Reads the field as a column value.
    pub fn encode(&self, model: &M, column: &ColumnSchema) -> CodecResult<Value> {
        (self.encode)(model, column)
    }

    /// Writes a column value into the field.
    pub fn decode(&self, model: &mut M, value: &Value, column: &ColumnSchema) -> CodecResult<()> {
        (self.decode)(model, value, column)
    }

    /// Returns true if the field holds its unset value.
    pub fn is_unset(&self, model: &M) -> bool {
        (self.is_unset)(model)
    }

    /// Resets the field to its unset value.
    pub fn clear(&self, model: &mut M) {
        (self.clear)(model)
    }
}

impl<M> std::fmt::Debug for FieldBinding<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldBinding")
            .field("column", &self.column)
            .field("shape", &self.shape)
            .finish()
    }
}
