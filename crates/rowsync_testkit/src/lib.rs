//! # rowsync testkit
//!
//! Test utilities for rowsync.
//!
//! This crate provides:
//! - Fixtures: a sample schema, seeded memory stores and temporary batch
//!   directories
//! - Property-based generators for values, tables and rows using proptest
//! - A client/server harness running agents against a web server through a
//!   loopback client
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rowsync_testkit::prelude::*;
//!
//! #[test]
//! fn clients_converge() {
//!     let harness = SyncHarness::new(seeded_server("server", 10));
//!     let a = harness.client("a");
//!     let b = harness.client("b");
//!     a.synchronize().unwrap();
//!     b.synchronize().unwrap();
//!     assert_same_rows(a.local().provider(), harness.server_store(), CUSTOMER);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
