//! # OVSDB Server
//!
//! In-memory OVSDB server speaking the JSON-RPC monitor and transact
//! protocol.
//!
//! This crate provides:
//! - A row store with schema-declared unique indexes
//! - A transaction executor for every operation kind
//! - Per-session monitors streaming filtered update2/update3 batches
//! - Method dispatch for `echo`, `list_dbs`, `get_schema`, `transact`,
//!   `monitor_cond`, `monitor_cond_since` and `monitor_cancel`
//!
//! # Architecture
//!
//! The server has no network front end. A transport hands it
//! [`Request`](ovsdb_protocol::Request)s tagged with the [`SessionId`] of
//! the connection they came from, and drains each session's notification
//! queue.
//!
//! # Transactions
//!
//! A transaction runs against a copy-on-write view of the tables it
//! touches. Either every operation succeeds and the changes are committed
//! under a new transaction id, or nothing is: the failing operation carries
//! the error and the operations after it are reported as `null`.
//!
//! # Monitors
//!
//! Monitors are registered and notified while the store lock is held, so a
//! commit is either part of a monitor's initial state or delivered to it as
//! an update, never both and never neither.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod database;
mod error;
mod handler;
mod monitor;
mod server;
mod transact;

pub use config::ServerConfig;
pub use database::{ChangeSet, Database, RowChange};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use monitor::SessionId;
pub use server::{OvsdbServer, Session};
