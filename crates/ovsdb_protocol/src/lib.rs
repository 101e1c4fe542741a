//! # OVSDB Protocol
//!
//! Protocol types and JSON codecs for the OVSDB management protocol.
//!
//! This crate provides:
//! - The schema model, parsed from `.ovsschema` documents
//! - The tagged [`Value`] and schema-checked wire codec
//! - [`Row`] with update2 difference computation and application
//! - [`UniqueIndex`] over schema-declared index columns
//! - update2 batches and the [`filter2`] column filter
//! - Operations, conditions, mutations and the result validator
//! - JSON-RPC envelopes for the methods client and server exchange
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
mod error;
mod index;
mod messages;
mod monitor;
mod operation;
mod results;
mod row;
mod schema;
mod update;
mod value;

pub use error::{CodecError, CodecResult};
pub use index::UniqueIndex;
pub use messages::{
    empty_object, parse_monitor_requests, parse_transact_reply, Message, MonitorCondSinceReply,
    Request, Response, UpdateNotification, METHOD_ECHO, METHOD_GET_SCHEMA, METHOD_LIST_DBS,
    METHOD_MONITOR_CANCEL, METHOD_MONITOR_COND, METHOD_MONITOR_COND_SINCE, METHOD_TRANSACT,
    METHOD_UPDATE2, METHOD_UPDATE3,
};
pub use monitor::{filter2, MonitorRequest, MonitorRequests, MonitorSelect};
pub use operation::{
    Condition, ConditionFunction, Mutation, Mutator, Operation, OperationKind, OperationResult,
    WaitUntil,
};
pub use results::{check_operation_results, OperationError, TransactionError};
pub use row::Row;
pub use schema::{
    AtomicType, BaseType, ColumnKind, ColumnSchema, ColumnType, DatabaseSchema, RefType,
    TableSchema, UNLIMITED, UUID_COLUMN, VERSION_COLUMN,
};
pub use update::{RowUpdate2, SkippedFragment, TableUpdate2, TableUpdates2};
pub use value::Value;
