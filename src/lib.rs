//! # Symdex - Incremental C/C++ Symbol Index
//!
//! Persistent symbol index and query service for editor integrations.
//!
//! Symdex provides:
//! - An ordered SQLite-backed key space holding every index namespace
//! - An incremental per-file indexer driven by a pluggable parser
//! - A deduplicating work scheduler with a fixed worker pool
//! - Prefix, suffix and file-name search plus occurrence lookups
//! - A long-lived HTTP service with idle self-termination, and its client

pub mod storage;
pub mod keys;
pub mod symbol;
pub mod edge;
pub mod parser;
pub mod indexer;
pub mod scheduler;
pub mod query;
pub mod compile_db;
pub mod project;
pub mod live;
pub mod watcher;
pub mod ignore;
pub mod server;
pub mod client;
pub mod config;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenient access
pub use symbol::{CursorKind, Location, Occurrence, SymbolKind, UseType};
pub use edge::DependencyEdge;
pub use storage::{SqliteStore, StoreHandle};
pub use indexer::{IndexOutcome, Indexer};
pub use scheduler::{IndexJob, Scheduler};
pub use query::{MatchResults, QueryEngine};
pub use project::{Project, ProjectState};

/// Result type alias for Symdex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Symdex operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("No compile_commands.json found at or above {0}")]
    ProjectNotFound(String),

    #[error("Could not find builtin include directory near {0}")]
    BuiltinHeadersNotFound(String),

    #[error("{0} is outside the registered project {1}")]
    ProjectConflict(String, String),

    #[error("No project registered")]
    NotRegistered,

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Lock poisoned: {0}")]
    Lock(String),
}
