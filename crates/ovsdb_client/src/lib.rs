//! # OVSDB Client
//!
//! Client engine for the OVSDB management protocol.
//!
//! This crate provides:
//! - Typed models bound to tables through explicit field bindings
//! - An indexed table cache applying filtered update2 batches
//! - Ordered add/update/delete observers and bounded event queues
//! - A monitor manager with full or resumed resynchronisation
//! - A transaction builder resolving named-UUID forward references
//! - A transport abstraction and a client facade with an update thread
//!
//! ## Key Invariants
//!
//! - Columns and tables that were not monitored never reach the cache
//! - Within a batch, deletes are reported before adds, adds before updates
//! - Models handed out are copies; mutating them never touches the cache
//! - Builder errors are raised before anything is sent

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod client;
mod config;
mod error;
mod model;
mod monitor;
mod transaction;
mod transport;

pub use cache::{
    ApplySummary, CacheEvent, CachedRow, EventHandler, EventHandlerFns, EventKind, Resync,
    Subscription, TableCache,
};
pub use client::Client;
pub use config::{ClientConfig, MonitorMethod};
pub use error::{ClientError, ClientResult};
pub use model::{Atom, ColumnValue, DatabaseModel, FieldBinding, FieldShape, Mapper, Model};
pub use monitor::MonitorManager;
pub use transaction::{TransactionBuilder, Where};
pub use transport::{Inbound, MockTransport, Transport};
