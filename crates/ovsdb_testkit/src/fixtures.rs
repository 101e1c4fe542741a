//! Test fixtures: the `ovslite` schema and its models.
//!
//! `ovslite` is a cut-down `Open_vSwitch` schema: a root table holding a
//! strong reference set to `Bridge`, and a `Bridge` table with an
//! immutable, uniquely indexed `name`.

use ovsdb_client::{DatabaseModel, FieldBinding, Model};
use ovsdb_protocol::DatabaseSchema;
use std::collections::BTreeMap;

/// Name of the `ovslite` database.
pub const OVSLITE_DB: &str = "Open_vSwitch";

/// The `ovslite` schema document.
pub const OVSLITE_SCHEMA: &str = r#"{
    "name": "Open_vSwitch",
    "version": "0.0.1",
    "tables": {
        "Open_vSwitch": {
            "columns": {
                "bridges": {
                    "type": {
                        "key": {"type": "uuid", "refTable": "Bridge"},
                        "min": 0,
                        "max": "unlimited"
                    }
                },
                "next_cfg": {"type": "integer"}
            },
            "isRoot": true,
            "maxRows": 1
        },
        "Bridge": {
            "columns": {
                "name": {"type": "string", "mutable": false},
                "datapath_type": {"type": "string"},
                "datapath_id": {
                    "type": {"key": "string", "min": 0, "max": 1},
                    "ephemeral": true
                },
                "other_config": {
                    "type": {"key": "string", "value": "string", "min": 0, "max": "unlimited"}
                },
                "external_ids": {
                    "type": {"key": "string", "value": "string", "min": 0, "max": "unlimited"}
                },
                "ports": {
                    "type": {"key": "uuid", "min": 0, "max": "unlimited"}
                },
                "status": {
                    "type": {"key": "string", "value": "string", "min": 0, "max": "unlimited"},
                    "ephemeral": true
                }
            },
            "indexes": [["name"]]
        }
    }
}"#;

/// Parses the `ovslite` schema.
///
/// # Panics
///
/// Never in practice: the document is a constant.
pub fn ovslite_schema() -> DatabaseSchema {
    DatabaseSchema::from_json(OVSLITE_SCHEMA).expect("ovslite schema is valid")
}

/// The `ovslite` schema with both models registered.
pub fn ovslite_model() -> DatabaseModel {
    DatabaseModel::new(ovslite_schema())
        .register::<OvsModel>()
        .and_then(DatabaseModel::register::<BridgeModel>)
        .expect("ovslite models match the schema")
}

/// Typed row of the `Bridge` table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeModel {
    /// `_uuid`
    pub uuid: String,
    /// `name`
    pub name: String,
    /// `datapath_type`
    pub datapath_type: String,
    /// `datapath_id`
    pub datapath_id: Option<String>,
    /// `other_config`
    pub other_config: BTreeMap<String, String>,
    /// `external_ids`
    pub external_ids: BTreeMap<String, String>,
    /// `ports`
    pub ports: Vec<String>,
    /// `status`
    pub status: BTreeMap<String, String>,
}

impl BridgeModel {
    /// A bridge with only its name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Model for BridgeModel {
    fn table_name() -> &'static str {
        "Bridge"
    }

    fn bindings() -> Vec<FieldBinding<Self>> {
        vec![
            FieldBinding::new("_uuid", |b| &b.uuid, |b| &mut b.uuid),
            FieldBinding::new("name", |b| &b.name, |b| &mut b.name),
            FieldBinding::new("datapath_type", |b| &b.datapath_type, |b| &mut b.datapath_type),
            FieldBinding::new("datapath_id", |b| &b.datapath_id, |b| &mut b.datapath_id),
            FieldBinding::new("other_config", |b| &b.other_config, |b| &mut b.other_config),
            FieldBinding::new("external_ids", |b| &b.external_ids, |b| &mut b.external_ids),
            FieldBinding::new("ports", |b| &b.ports, |b| &mut b.ports),
            FieldBinding::new("status", |b| &b.status, |b| &mut b.status),
        ]
    }
}

/// Typed row of the `Open_vSwitch` table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OvsModel {
    /// `_uuid`
    pub uuid: String,
    /// `bridges`
    pub bridges: Vec<String>,
    /// `next_cfg`
    pub next_cfg: i64,
}

impl Model for OvsModel {
    fn table_name() -> &'static str {
        "Open_vSwitch"
    }

    fn bindings() -> Vec<FieldBinding<Self>> {
        vec![
            FieldBinding::new("_uuid", |o| &o.uuid, |o| &mut o.uuid),
            FieldBinding::new("bridges", |o| &o.bridges, |o| &mut o.bridges),
            FieldBinding::new("next_cfg", |o| &o.next_cfg, |o| &mut o.next_cfg),
        ]
    }
}

/// Builds a map from string pairs.
pub fn string_map<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_and_models_agree() {
        let model = ovslite_model();
        assert_eq!(model.schema().name, OVSLITE_DB);
        assert!(model.has_model("Bridge"));
        assert!(model.has_model("Open_vSwitch"));

        let bridge = model.schema().table("Bridge").unwrap();
        assert!(!bridge.require_column("name").unwrap().mutable);
        assert_eq!(bridge.indexes, vec![vec!["name".to_string()]]);
    }

    #[test]
    fn string_map_builds_sorted_map() {
        let map = string_map([("b", "2"), ("a", "1")]);
        assert_eq!(map.keys().collect::<Vec<_>>(), ["a", "b"]);
    }
}
