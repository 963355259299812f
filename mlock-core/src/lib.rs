//! # mlock-core
//!
//! A distributed mutual-exclusion lock for one-time operations such as
//! schema migrations. Built only on a store's conditional writes:
//! insert-if-absent to acquire, delete-if-owner to release.

pub mod config;
pub mod error;
pub mod infrastructure;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod lock;
pub mod retry;
pub mod schema;
pub mod types;

pub use config::LockConfig;
pub use error::{LockError, LockErrorKind, StoreError};
pub use lock::{LockingMechanism, StoreLock};

#[cfg(test)]
mod lock_test;
#[cfg(test)]
mod schema_test;
