//! Property-based test generators using proptest.
//!
//! Provides strategies for generating values, rows and models that fit
//! a schema.

use crate::fixtures::{BridgeModel, OvsModel};
use ovsdb_protocol::{
    AtomicType, BaseType, ColumnKind, ColumnSchema, MonitorRequest, MonitorRequests, Row,
    TableSchema, Value,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating real UUIDs in canonical text form.
pub fn uuid_strategy() -> impl Strategy<Value = String> {
    any::<[u8; 16]>().prop_map(|bytes| {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    })
}

/// Strategy for short identifier-like strings.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,11}").expect("Invalid regex")
}

/// Strategy for one atom of `base`'s type.
pub fn atom_strategy(base: &BaseType) -> BoxedStrategy<Value> {
    match base.atomic {
        AtomicType::Boolean => any::<bool>().prop_map(Value::Boolean).boxed(),
        AtomicType::Integer => (-1000i64..1000).prop_map(Value::Integer).boxed(),
        // Quarters are exact in binary, so they survive a JSON round trip.
        AtomicType::Real => (-1000i32..1000)
            .prop_map(|n| Value::Real(f64::from(n) / 4.0))
            .boxed(),
        AtomicType::String => name_strategy().prop_map(Value::String).boxed(),
        AtomicType::Uuid => uuid_strategy().prop_map(Value::Uuid).boxed(),
    }
}

/// Strategy for a complete value of `column`, within its cardinality.
pub fn column_value_strategy(column: &ColumnSchema) -> BoxedStrategy<Value> {
    let ty = &column.column_type;
    // Unlimited columns get small collections.
    let max = ty.max.min(4);
    let min = ty.min.min(max);
    let key = atom_strategy(&ty.key);
    match (ty.kind(), &ty.value) {
        (ColumnKind::Scalar, _) => key,
        (ColumnKind::Map, Some(value)) => {
            prop::collection::btree_map(key, atom_strategy(value), min..=max)
                .prop_map(Value::Map)
                .boxed()
        }
        _ => prop::collection::btree_set(key, min..=max)
            .prop_map(Value::Set)
            .boxed(),
    }
}

/// Strategy for a row holding a value for every user column of `table`.
pub fn row_strategy(table: &TableSchema) -> BoxedStrategy<Row> {
    let columns: Vec<(String, BoxedStrategy<Value>)> = table
        .user_columns()
        .map(|c| (c.name.clone(), column_value_strategy(c)))
        .collect();
    let (names, values): (Vec<_>, Vec<_>) = columns.into_iter().unzip();
    values
        .prop_map(move |values| names.iter().cloned().zip(values).collect())
        .boxed()
}

/// Strategy for monitor requests over a subset of `tables`, each asking
/// for a subset of the table's user columns.
pub fn monitor_requests_strategy(tables: Vec<TableSchema>) -> BoxedStrategy<MonitorRequests> {
    let per_table: Vec<BoxedStrategy<Option<(String, MonitorRequest)>>> = tables
        .into_iter()
        .map(|table| {
            let names = table.user_column_names();
            let name = table.name.clone();
            (any::<bool>(), prop::sample::subsequence(names.clone(), 0..=names.len()))
                .prop_map(move |(wanted, columns)| {
                    wanted.then(|| (name.clone(), MonitorRequest::new(columns)))
                })
                .boxed()
        })
        .collect();
    per_table
        .prop_map(|entries| entries.into_iter().flatten().collect())
        .boxed()
}

fn string_map_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(name_strategy(), name_strategy(), 0..4)
}

/// Strategy for `Bridge` models with every field populated.
pub fn bridge_model_strategy() -> impl Strategy<Value = BridgeModel> {
    (
        uuid_strategy(),
        name_strategy(),
        name_strategy(),
        name_strategy(),
        string_map_strategy(),
        string_map_strategy(),
        prop::collection::btree_set(uuid_strategy(), 1..4),
        string_map_strategy(),
    )
        .prop_map(
            |(uuid, name, datapath_type, datapath_id, other_config, external_ids, ports, status)| {
                BridgeModel {
                    uuid,
                    name,
                    datapath_type,
                    datapath_id: Some(datapath_id),
                    other_config,
                    external_ids,
                    // Sets come back sorted.
                    ports: ports.into_iter().collect(),
                    status,
                }
            },
        )
}

/// Strategy for `Open_vSwitch` models.
pub fn ovs_model_strategy() -> impl Strategy<Value = OvsModel> {
    (
        uuid_strategy(),
        prop::collection::btree_set(uuid_strategy(), 0..4),
        any::<i64>(),
    )
        .prop_map(|(uuid, bridges, next_cfg)| OvsModel {
            uuid,
            bridges: bridges.into_iter().collect(),
            next_cfg,
        })
}
