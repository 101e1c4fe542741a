//! Typed models bound to tables.
//!
//! A model is a plain struct whose fields map to table columns through an
//! explicit list of [`FieldBinding`]s, built once per type. Exactly one
//! binding maps a `String` field to `_uuid`.
//!
//! ```
//! use ovsdb_client::{FieldBinding, Model};
//!
//! #[derive(Debug, Clone, Default, PartialEq)]
//! struct Bridge {
//!     uuid: String,
//!     name: String,
//!     datapath_id: Option<String>,
//! }
//!
//! impl Model for Bridge {
//!     fn table_name() -> &'static str {
//!         "Bridge"
//!     }
//!
//!     fn bindings() -> Vec<FieldBinding<Self>> {
//!         vec![
//!             FieldBinding::new("_uuid", |b| &b.uuid, |b| &mut b.uuid),
//!             FieldBinding::new("name", |b| &b.name, |b| &mut b.name),
//!             FieldBinding::new("datapath_id", |b| &b.datapath_id, |b| &mut b.datapath_id),
//!         ]
//!     }
//! }
//! ```

mod binding;
mod database;

pub use binding::{Atom, ColumnValue, FieldBinding, FieldShape};
pub use database::{DatabaseModel, Mapper};

use std::fmt::Debug;

/// A typed view of a table's rows.
pub trait Model: Clone + Default + PartialEq + Debug + Send + Sync + 'static {
    /// Name of the bound table.
    fn table_name() -> &'static str;

    /// Field bindings, including the one for `_uuid`.
    fn bindings() -> Vec<FieldBinding<Self>>;
}
