//! Schema-checked conversion between wire JSON and [`Value`]s.
//!
//! Two flavours exist for each direction:
//!
//! - [`encode_value`] / [`decode_value`] handle complete column values and
//!   enforce the declared cardinality. Decoded values are canonical: a
//!   scalar column yields a bare atom, every other set column yields a
//!   [`Value::Set`] and map columns yield a [`Value::Map`].
//! - [`encode_loose`] / [`decode_loose`] handle operands of conditions,
//!   mutations and update2 modify payloads. Element types are still
//!   checked, but cardinality is not and a bare atom stays an atom.

use crate::error::{CodecError, CodecResult};
use crate::row::Row;
use crate::schema::{AtomicType, BaseType, ColumnKind, ColumnSchema, ColumnType, TableSchema};
use crate::value::Value;
use serde_json::{json, Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};

/// The all-zero UUID, used as the "unset" value of UUID scalars.
pub const NIL_UUID: &str = "00000000-0000-0000-0000-000000000000";

fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(n) if n.is_f64() => "real",
        Json::Number(_) => "integer",
        Json::String(_) => "string",
        Json::Array(items) => match items.first().and_then(Json::as_str) {
            Some("uuid") => "uuid",
            Some("named-uuid") => "named-uuid",
            Some("set") => "set",
            Some("map") => "map",
            _ => "array",
        },
        Json::Object(_) => "object",
    }
}

/// Splits a `["tag", payload]` pair.
fn tagged<'a>(json: &'a Json, tag: &str) -> Option<&'a Json> {
    match json.as_array().map(Vec::as_slice) {
        Some([Json::String(t), payload]) if t == tag => Some(payload),
        _ => None,
    }
}

fn is_uuid(text: &str) -> bool {
    uuid::Uuid::parse_str(text).is_ok()
}

/// Decodes one atom of type `base`.
pub fn decode_atom(json: &Json, base: &BaseType) -> CodecResult<Value> {
    let mismatch = || CodecError::type_mismatch(base.atomic.as_str(), json_kind(json));
    match base.atomic {
        AtomicType::Boolean => json.as_bool().map(Value::Boolean).ok_or_else(mismatch),
        AtomicType::Integer => match json {
            Json::Number(n) => n.as_i64().map(Value::Integer).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        AtomicType::Real => match json {
            Json::Number(n) => n.as_f64().map(Value::Real).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        AtomicType::String => json
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(mismatch),
        AtomicType::Uuid => {
            if let Some(payload) = tagged(json, "uuid") {
                let text = payload
                    .as_str()
                    .ok_or_else(|| CodecError::invalid_structure("uuid payload must be a string"))?;
                if !is_uuid(text) {
                    return Err(CodecError::invalid_structure(format!("malformed uuid {text}")));
                }
                Ok(Value::Uuid(text.to_string()))
            } else if let Some(payload) = tagged(json, "named-uuid") {
                payload
                    .as_str()
                    .map(|s| Value::NamedUuid(s.to_string()))
                    .ok_or_else(|| CodecError::invalid_structure("named-uuid payload must be a string"))
            } else {
                Err(mismatch())
            }
        }
    }
}

/// Encodes one atom, checking it against `base`.
pub fn encode_atom(value: &Value, base: &BaseType) -> CodecResult<Json> {
    check_atom(value, base)?;
    Ok(value.to_json())
}

/// Checks that `value` is an atom of type `base`.
pub fn check_atom(value: &Value, base: &BaseType) -> CodecResult<()> {
    match value.atomic_type() {
        Some(atomic) if atomic == base.atomic => Ok(()),
        _ => Err(CodecError::type_mismatch(
            base.atomic.as_str(),
            value.kind_name(),
        )),
    }
}

fn decode_elements(json: &Json, base: &BaseType) -> CodecResult<BTreeSet<Value>> {
    if let Some(payload) = tagged(json, "set") {
        let items = payload
            .as_array()
            .ok_or_else(|| CodecError::invalid_structure("set payload must be an array"))?;
        items.iter().map(|item| decode_atom(item, base)).collect()
    } else {
        Ok(BTreeSet::from([decode_atom(json, base)?]))
    }
}

fn decode_pairs(json: &Json, ty: &ColumnType, value: &BaseType) -> CodecResult<BTreeMap<Value, Value>> {
    let payload = tagged(json, "map").ok_or_else(|| CodecError::type_mismatch("map", json_kind(json)))?;
    let pairs = payload
        .as_array()
        .ok_or_else(|| CodecError::invalid_structure("map payload must be an array"))?;
    pairs
        .iter()
        .map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([k, v]) => Ok((decode_atom(k, &ty.key)?, decode_atom(v, value)?)),
            _ => Err(CodecError::invalid_structure("map entry must be a [key, value] pair")),
        })
        .collect()
}

/// Decodes a complete column value, enforcing cardinality.
pub fn decode_value(json: &Json, column: &ColumnSchema) -> CodecResult<Value> {
    let ty = &column.column_type;
    match (&ty.value, ty.kind()) {
        (Some(value_type), _) => {
            let map = decode_pairs(json, ty, value_type)?;
            ty.check_cardinality(&column.name, map.len())?;
            Ok(Value::Map(map))
        }
        (None, ColumnKind::Scalar) => {
            let mut elements = decode_elements(json, &ty.key)?;
            ty.check_cardinality(&column.name, elements.len())?;
            elements
                .pop_first()
                .ok_or_else(|| CodecError::invalid_structure("empty scalar"))
        }
        (None, _) => {
            let elements = decode_elements(json, &ty.key)?;
            ty.check_cardinality(&column.name, elements.len())?;
            Ok(Value::Set(elements))
        }
    }
}

/// Decodes an operand or diff value without enforcing cardinality.
///
/// On a map column a `["set", ..]` operand decodes to a set of keys, as
/// used by the map `delete` mutator.
pub fn decode_loose(json: &Json, column: &ColumnSchema) -> CodecResult<Value> {
    let ty = &column.column_type;
    if let Some(value_type) = &ty.value {
        if tagged(json, "map").is_some() {
            return Ok(Value::Map(decode_pairs(json, ty, value_type)?));
        }
    }
    if tagged(json, "set").is_some() {
        return Ok(Value::Set(decode_elements(json, &ty.key)?));
    }
    decode_atom(json, &ty.key)
}

fn encode_set(set: &BTreeSet<Value>, base: &BaseType) -> CodecResult<Json> {
    let items = set
        .iter()
        .map(|v| encode_atom(v, base))
        .collect::<CodecResult<Vec<_>>>()?;
    Ok(json!(["set", items]))
}

fn encode_map(map: &BTreeMap<Value, Value>, ty: &ColumnType, value: &BaseType) -> CodecResult<Json> {
    let pairs = map
        .iter()
        .map(|(k, v)| Ok(json!([encode_atom(k, &ty.key)?, encode_atom(v, value)?])))
        .collect::<CodecResult<Vec<_>>>()?;
    Ok(json!(["map", pairs]))
}

/// Encodes a complete column value, enforcing kind and cardinality.
pub fn encode_value(value: &Value, column: &ColumnSchema) -> CodecResult<Json> {
    let ty = &column.column_type;
    match (&ty.value, ty.kind(), value) {
        (Some(value_type), _, Value::Map(map)) => {
            ty.check_cardinality(&column.name, map.len())?;
            encode_map(map, ty, value_type)
        }
        (Some(_), _, other) => Err(CodecError::type_mismatch("map", other.kind_name())),
        (None, ColumnKind::Scalar, Value::Set(set)) => match set.iter().next() {
            Some(atom) if set.len() == 1 => encode_atom(atom, &ty.key),
            _ => Err(CodecError::CardinalityViolation {
                column: column.name.clone(),
                min: ty.min,
                max: ty.max,
                actual: set.len(),
            }),
        },
        (None, ColumnKind::Scalar, atom) => encode_atom(atom, &ty.key),
        (None, _, Value::Set(set)) => {
            ty.check_cardinality(&column.name, set.len())?;
            encode_set(set, &ty.key)
        }
        (None, _, Value::Map(_)) => Err(CodecError::type_mismatch("set", "map")),
        (None, _, atom) => {
            ty.check_cardinality(&column.name, 1)?;
            encode_set(&BTreeSet::from([atom.clone()]), &ty.key)
        }
    }
}

/// Encodes an operand or diff value without enforcing cardinality.
pub fn encode_loose(value: &Value, column: &ColumnSchema) -> CodecResult<Json> {
    let ty = &column.column_type;
    match value {
        Value::Map(map) => match &ty.value {
            Some(value_type) => encode_map(map, ty, value_type),
            None => Err(CodecError::type_mismatch(
                if ty.kind() == ColumnKind::Scalar { ty.key.atomic.as_str() } else { "set" },
                "map",
            )),
        },
        Value::Set(set) => encode_set(set, &ty.key),
        atom => encode_atom(atom, &ty.key),
    }
}

/// Brings an operand into the column's canonical shape.
///
/// A one-element set becomes an atom for scalar columns and an atom becomes
/// a one-element set for set columns.
pub fn normalize(value: Value, column: &ColumnSchema) -> Value {
    match (column.kind(), value) {
        (ColumnKind::Scalar, Value::Set(set)) if set.len() == 1 => {
            let mut set = set;
            set.pop_first().unwrap_or_else(Value::empty_set)
        }
        (ColumnKind::Set, atom) if atom.is_atom() => Value::Set(BTreeSet::from([atom])),
        (_, value) => value,
    }
}

/// Returns the value an unset column holds.
pub fn default_value(column_type: &ColumnType) -> Value {
    match column_type.kind() {
        ColumnKind::Map => Value::Map(BTreeMap::new()),
        ColumnKind::Set => Value::empty_set(),
        ColumnKind::Scalar => match column_type.key.atomic {
            AtomicType::Boolean => Value::Boolean(false),
            AtomicType::Integer => Value::Integer(0),
            AtomicType::Real => Value::Real(0.0),
            AtomicType::String => Value::String(String::new()),
            AtomicType::Uuid => Value::Uuid(NIL_UUID.to_string()),
        },
    }
}

/// Encodes a row. Every column must exist in the table.
pub fn encode_row(row: &Row, table: &TableSchema) -> CodecResult<Map<String, Json>> {
    row.iter()
        .map(|(name, value)| {
            let column = table.require_column(name)?;
            Ok((name.clone(), encode_value(value, column)?))
        })
        .collect()
}

/// Encodes an update2 modify payload.
pub fn encode_diff_row(row: &Row, table: &TableSchema) -> CodecResult<Map<String, Json>> {
    row.iter()
        .map(|(name, value)| {
            let column = table.require_column(name)?;
            Ok((name.clone(), encode_loose(value, column)?))
        })
        .collect()
}

fn decode_object(
    json: &Json,
    table: &TableSchema,
    decode: fn(&Json, &ColumnSchema) -> CodecResult<Value>,
) -> CodecResult<Row> {
    let object = json
        .as_object()
        .ok_or_else(|| CodecError::type_mismatch("object", json_kind(json)))?;
    let mut row = Row::new();
    for (name, value) in object {
        // Columns unknown to the local schema are dropped.
        if let Some(column) = table.column(name) {
            row.insert(name.clone(), decode(value, column)?);
        }
    }
    Ok(row)
}

/// Decodes a row, dropping columns the table does not declare.
pub fn decode_row(json: &Json, table: &TableSchema) -> CodecResult<Row> {
    decode_object(json, table, decode_value)
}

/// Decodes an update2 modify payload, dropping undeclared columns.
pub fn decode_diff_row(json: &Json, table: &TableSchema) -> CodecResult<Row> {
    decode_object(json, table, |json, column| {
        let value = decode_loose(json, column)?;
        Ok(normalize(value, column))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn column(name: &str, ty: ColumnType) -> ColumnSchema {
        ColumnSchema::new(name, ty)
    }

    #[test]
    fn decode_scalar_atom() {
        let c = column("name", ColumnType::scalar(AtomicType::String));
        assert_eq!(decode_value(&json!("br0"), &c).unwrap(), Value::from("br0"));
        assert_eq!(
            decode_value(&json!(["set", ["br0"]]), &c).unwrap(),
            Value::from("br0")
        );
        assert!(matches!(
            decode_value(&json!(["set", []]), &c),
            Err(CodecError::CardinalityViolation { .. })
        ));
    }

    #[test]
    fn integer_and_real_are_distinct() {
        let int = column("n", ColumnType::scalar(AtomicType::Integer));
        let real = column("r", ColumnType::scalar(AtomicType::Real));
        assert!(matches!(
            decode_value(&json!(1.5), &int),
            Err(CodecError::TypeMismatch { .. })
        ));
        assert_eq!(decode_value(&json!(2), &real).unwrap(), Value::Real(2.0));
        assert!(matches!(
            encode_value(&Value::Integer(2), &real),
            Err(CodecError::TypeMismatch { .. })
        ));
        assert!(matches!(
            encode_value(&Value::Real(2.0), &int),
            Err(CodecError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn optional_scalar_absent_is_empty_set() {
        let c = column("datapath_id", ColumnType::optional(AtomicType::String));
        assert_eq!(
            encode_value(&Value::empty_set(), &c).unwrap(),
            json!(["set", []])
        );
        assert_eq!(
            decode_value(&json!(["set", []]), &c).unwrap(),
            Value::empty_set()
        );
        assert_eq!(
            decode_value(&json!("42"), &c).unwrap(),
            Value::set(["42"])
        );
    }

    #[test]
    fn set_cardinality_enforced_on_encode() {
        let c = column(
            "ports",
            ColumnType::set(BaseType::atomic(AtomicType::Integer), 1, 2),
        );
        assert!(encode_value(&Value::set([1i64, 2]), &c).is_ok());
        assert!(matches!(
            encode_value(&Value::set([1i64, 2, 3]), &c),
            Err(CodecError::CardinalityViolation { actual: 3, .. })
        ));
        assert!(matches!(
            encode_value(&Value::empty_set(), &c),
            Err(CodecError::CardinalityViolation { actual: 0, .. })
        ));
    }

    #[test]
    fn map_values() {
        let c = column(
            "external_ids",
            ColumnType::map(
                BaseType::atomic(AtomicType::String),
                BaseType::atomic(AtomicType::String),
                0,
                crate::schema::UNLIMITED,
            ),
        );
        let wire = json!(["map", [["a", "1"], ["b", "2"]]]);
        let value = decode_value(&wire, &c).unwrap();
        assert_eq!(value, Value::map([("a", "1"), ("b", "2")]));
        assert_eq!(encode_value(&value, &c).unwrap(), wire);
        assert!(matches!(
            decode_value(&json!(["map", [["a", 1]]]), &c),
            Err(CodecError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn uuid_atoms() {
        let c = column("r", ColumnType::scalar(AtomicType::Uuid));
        let id = "1f2f1a5c-8d4e-4a5d-9c6f-0a1b2c3d4e5f";
        assert_eq!(
            decode_value(&json!(["uuid", id]), &c).unwrap(),
            Value::uuid(id)
        );
        assert_eq!(
            decode_value(&json!(["named-uuid", "row1"]), &c).unwrap(),
            Value::named_uuid("row1")
        );
        assert!(matches!(
            decode_value(&json!(["uuid", "nope"]), &c),
            Err(CodecError::InvalidStructure { .. })
        ));
        assert!(matches!(
            decode_value(&json!(id), &c),
            Err(CodecError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn unknown_columns_are_dropped_on_decode() {
        let table = TableSchema::new("T")
            .with_column(column("a", ColumnType::scalar(AtomicType::Integer)));
        let row = decode_row(&json!({"a": 1, "b": 2}), &table).unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("a"), Some(&Value::Integer(1)));

        let mut bad = Row::new();
        bad.insert("b", Value::Integer(2));
        assert!(matches!(
            encode_row(&bad, &table),
            Err(CodecError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn loose_operands() {
        let c = column(
            "tags",
            ColumnType::set(BaseType::atomic(AtomicType::String), 0, crate::schema::UNLIMITED),
        );
        assert_eq!(decode_loose(&json!("x"), &c).unwrap(), Value::from("x"));
        assert_eq!(normalize(Value::from("x"), &c), Value::set(["x"]));
        assert_eq!(encode_loose(&Value::from("x"), &c).unwrap(), json!("x"));

        let m = column(
            "ids",
            ColumnType::map(
                BaseType::atomic(AtomicType::String),
                BaseType::atomic(AtomicType::String),
                0,
                crate::schema::UNLIMITED,
            ),
        );
        assert_eq!(
            decode_loose(&json!(["set", ["k"]]), &m).unwrap(),
            Value::set(["k"])
        );
    }

    #[test]
    fn defaults() {
        assert_eq!(
            default_value(&ColumnType::scalar(AtomicType::Integer)),
            Value::Integer(0)
        );
        assert_eq!(
            default_value(&ColumnType::optional(AtomicType::Integer)),
            Value::empty_set()
        );
        assert_eq!(
            default_value(&ColumnType::scalar(AtomicType::Uuid)),
            Value::uuid(NIL_UUID)
        );
    }
}
