//! Tagged database value.

use crate::schema::AtomicType;
use serde::{Serialize, Serializer};
use serde_json::{json, Value as Json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A database value.
///
/// Atoms are the first six variants. Sets and maps are unordered on the
/// wire; here they are kept sorted so that equality is element equality.
///
/// Reals are ordered with [`f64::total_cmp`], which makes `Value` usable as
/// a set element or map key.
#[derive(Debug, Clone)]
pub enum Value {
    /// Boolean atom.
    Boolean(bool),
    /// Integer atom.
    Integer(i64),
    /// Real atom.
    Real(f64),
    /// String atom.
    String(String),
    /// Committed row identifier.
    Uuid(String),
    /// Transaction-local placeholder for a row being inserted.
    NamedUuid(String),
    /// Set of atoms.
    Set(BTreeSet<Value>),
    /// Map of atoms to atoms.
    Map(BTreeMap<Value, Value>),
}

impl Value {
    /// Creates a UUID atom.
    pub fn uuid(uuid: impl Into<String>) -> Self {
        Value::Uuid(uuid.into())
    }

    /// Creates a named-UUID atom.
    pub fn named_uuid(name: impl Into<String>) -> Self {
        Value::NamedUuid(name.into())
    }

    /// Creates an empty set, the protocol's "no value".
    pub fn empty_set() -> Self {
        Value::Set(BTreeSet::new())
    }

    /// Creates a set from atoms.
    pub fn set<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Set(items.into_iter().map(Into::into).collect())
    }

    /// Creates a map from key/value pairs.
    pub fn map<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Returns the protocol name of the value's kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::String(_) => "string",
            Value::Uuid(_) => "uuid",
            Value::NamedUuid(_) => "named-uuid",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    /// Returns true for atoms.
    pub fn is_atom(&self) -> bool {
        !matches!(self, Value::Set(_) | Value::Map(_))
    }

    /// Returns the atomic type of an atom. Named UUIDs are UUIDs.
    pub fn atomic_type(&self) -> Option<AtomicType> {
        match self {
            Value::Boolean(_) => Some(AtomicType::Boolean),
            Value::Integer(_) => Some(AtomicType::Integer),
            Value::Real(_) => Some(AtomicType::Real),
            Value::String(_) => Some(AtomicType::String),
            Value::Uuid(_) | Value::NamedUuid(_) => Some(AtomicType::Uuid),
            Value::Set(_) | Value::Map(_) => None,
        }
    }

    /// Returns the number of elements; atoms count as one.
    pub fn len(&self) -> usize {
        match self {
            Value::Set(s) => s.len(),
            Value::Map(m) => m.len(),
            _ => 1,
        }
    }

    /// Returns true for an empty set or map.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a real, if it is one.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the identifier of a UUID or named-UUID atom.
    pub fn as_uuid(&self) -> Option<&str> {
        match self {
            Value::Uuid(s) | Value::NamedUuid(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a set, if it is one.
    pub fn as_set(&self) -> Option<&BTreeSet<Value>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<Value, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Iterates over atoms: the value itself, set elements, or map keys and values.
    pub fn atoms(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Value::Set(s) => Box::new(s.iter()),
            Value::Map(m) => Box::new(m.iter().flat_map(|(k, v)| [k, v])),
            atom => Box::new(std::iter::once(atom)),
        }
    }

    /// Renders the value in wire notation.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Boolean(b) => json!(b),
            Value::Integer(n) => json!(n),
            Value::Real(n) => json!(n),
            Value::String(s) => json!(s),
            Value::Uuid(s) => json!(["uuid", s]),
            Value::NamedUuid(s) => json!(["named-uuid", s]),
            Value::Set(s) => json!(["set", s.iter().map(Value::to_json).collect::<Vec<_>>()]),
            Value::Map(m) => json!([
                "map",
                m.iter()
                    .map(|(k, v)| json!([k.to_json(), v.to_json()]))
                    .collect::<Vec<_>>()
            ]),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Boolean(_) => 0,
            Value::Integer(_) => 1,
            Value::Real(_) => 2,
            Value::String(_) => 3,
            Value::Uuid(_) => 4,
            Value::NamedUuid(_) => 5,
            Value::Set(_) => 6,
            Value::Map(_) => 7,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b))
            | (Value::Uuid(a), Value::Uuid(b))
            | (Value::NamedUuid(a), Value::NamedUuid(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Boolean(b) => b.hash(state),
            Value::Integer(n) => n.hash(state),
            Value::Real(n) => n.to_bits().hash(state),
            Value::String(s) | Value::Uuid(s) | Value::NamedUuid(s) => s.hash(state),
            Value::Set(s) => s.hash(state),
            Value::Map(m) => m.hash(state),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Real(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
