//! Storage Layer - SQLite-backed ordered key-value store
//!
//! System of record is a single SQLite table:
//! - entries(key BLOB PRIMARY KEY, value TEXT)
//!
//! Every index namespace (see [`crate::keys`]) is a key prefix inside this
//! one table, so all lookups are point reads or prefix range scans.

pub mod schema;
pub mod sqlite;

pub use sqlite::{BatchOp, KvStats, SqliteStore, StoreHandle, prefix_upper_bound};
