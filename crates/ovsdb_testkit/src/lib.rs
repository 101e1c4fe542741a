//! # OVSDB Testkit
//!
//! Test utilities for the OVSDB crates.
//!
//! This crate provides:
//! - The `ovslite` schema and typed `Bridge` / `Open_vSwitch` models
//! - An in-memory transport wiring a client to an [`OvsdbServer`](ovsdb_server::OvsdbServer)
//! - Property-based test generators using proptest
//! - Tracing initialisation for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ovsdb_testkit::prelude::*;
//!
//! #[test]
//! fn insert_bridge() {
//!     let harness = Harness::new();
//!     let mut bridge = BridgeModel::named("br0");
//!     let mut txn = harness.client.transaction();
//!     txn.insert(&mut bridge).unwrap();
//!     harness.client.transact(&txn).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::transport::*;
}

pub use fixtures::*;
pub use generators::*;
pub use transport::*;

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
