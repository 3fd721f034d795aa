//! Vigil persistence layer
//!
//! Store traits used by the scanning services, their Postgres implementations, and the
//! migration runner. Enable the `test-helpers` feature for in-memory implementations.

pub mod db;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use db::*;
