//! In-memory store implementations for testing
//!
//! [`InMemoryStore`] implements every store trait over one mutex-guarded state, so a
//! quarantine is as atomic as the Postgres transaction it stands in for.

mod memory;

pub use memory::{InMemoryStore, Notification, Score};
