//! SQLite storage implementation

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use rusqlite::{Connection, params, OptionalExtension};
use crate::{Result, Error};
use super::schema;

/// A single operation inside a [`SqliteStore::write_batch`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(String, String),
    Delete(String),
    /// Delete every key inside `[prefix, prefix_upper_bound(prefix))`
    DeletePrefix(String),
}

/// Ordered, persistent key-value map backed by SQLite.
///
/// The connection is guarded by a mutex; callers share one store through
/// an `Arc` (see [`StoreHandle`]).
pub struct SqliteStore {
    conn: Mutex<Connection>,
    puts: AtomicU64,
    deletes: AtomicU64,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row(schema::JOURNAL_MODE_PRAGMA, [], |_| Ok(()))?;
        for pragma in schema::PRAGMAS {
            conn.execute(pragma, [])?;
        }
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        for stmt in schema::all_schema_statements() {
            conn.execute(stmt, [])?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            puts: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Lock("sqlite connection".to_string()))
    }

    // ========== Point Operations ==========

    /// Get the value stored under `key`
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT value FROM entries WHERE key = ?1",
                [key.as_bytes()],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Insert or replace a single entry
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)",
            params![key.as_bytes(), value],
        )?;
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Delete a single entry. Deleting a missing key is not an error.
    pub fn delete(&self, key: &str) -> Result<()> {
        let removed = self
            .conn()?
            .execute("DELETE FROM entries WHERE key = ?1", [key.as_bytes()])?;
        self.deletes.fetch_add(removed as u64, Ordering::Relaxed);
        Ok(())
    }

    // ========== Range Operations ==========

    /// All entries whose key starts with `prefix`, in ascending key order
    pub fn range_scan(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.scan(prefix, -1)
    }

    /// The first `limit` entries whose key starts with `prefix`
    pub fn range_scan_limit(&self, prefix: &str, limit: usize) -> Result<Vec<(String, String)>> {
        self.scan(prefix, i64::try_from(limit).unwrap_or(i64::MAX))
    }

    /// Ordered scan over `[prefix, prefix_upper_bound(prefix))`; a negative
    /// `limit` means no limit
    fn scan(&self, prefix: &str, limit: i64) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let start = prefix.as_bytes().to_vec();

        let rows: Vec<(Vec<u8>, String)> = match prefix_upper_bound(prefix.as_bytes()) {
            Some(end) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT key, value FROM entries WHERE key >= ?1 AND key < ?2 ORDER BY key LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![start, end, limit], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT key, value FROM entries WHERE key >= ?1 ORDER BY key LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![start, limit], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };

        rows.into_iter()
            .map(|(key, value)| {
                let key = String::from_utf8(key)
                    .map_err(|e| Error::InvalidKey(format!("non UTF-8 key: {}", e)))?;
                Ok((key, value))
            })
            .collect()
    }

    /// Apply a list of operations in one transaction
    pub fn write_batch(&self, ops: &[BatchOp]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut puts = 0u64;
        let mut deletes = 0u64;
        {
            let mut put_stmt =
                tx.prepare_cached("INSERT OR REPLACE INTO entries (key, value) VALUES (?1, ?2)")?;
            let mut delete_stmt = tx.prepare_cached("DELETE FROM entries WHERE key = ?1")?;

            for op in ops {
                match op {
                    BatchOp::Put(key, value) => {
                        put_stmt.execute(params![key.as_bytes(), value])?;
                        puts += 1;
                    }
                    BatchOp::Delete(key) => {
                        deletes += delete_stmt.execute([key.as_bytes()])? as u64;
                    }
                    BatchOp::DeletePrefix(prefix) => {
                        deletes += match prefix_upper_bound(prefix.as_bytes()) {
                            Some(end) => tx.execute(
                                "DELETE FROM entries WHERE key >= ?1 AND key < ?2",
                                params![prefix.as_bytes(), end],
                            )?,
                            None => tx.execute(
                                "DELETE FROM entries WHERE key >= ?1",
                                [prefix.as_bytes()],
                            )?,
                        } as u64;
                    }
                }
            }
        }
        tx.commit()?;

        self.puts.fetch_add(puts, Ordering::Relaxed);
        self.deletes.fetch_add(deletes, Ordering::Relaxed);
        Ok(())
    }

    /// Count all entries
    pub fn count_entries(&self) -> Result<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<KvStats> {
        Ok(KvStats {
            entries: self.count_entries()?,
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        })
    }
}

/// Exclusive upper bound of the key range sharing `prefix`.
///
/// Trailing `0xFF` bytes cannot be incremented and are dropped first; a
/// prefix made only of `0xFF` (or an empty one) has no upper bound.
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Lazily opened, process-wide store handle.
///
/// The first caller of [`StoreHandle::get`] opens the database under the
/// initialization lock; everyone after that shares the same `Arc`.
pub struct StoreHandle {
    path: PathBuf,
    store: Mutex<Option<Arc<SqliteStore>>>,
}

impl StoreHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store: Mutex::new(None),
        }
    }

    /// Wrap an already opened store (in-memory stores in tests)
    pub fn from_store(store: SqliteStore) -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            store: Mutex::new(Some(Arc::new(store))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Result<Arc<SqliteStore>> {
        let mut guard = self
            .store
            .lock()
            .map_err(|_| Error::Lock("store handle".to_string()))?;

        if let Some(store) = guard.as_ref() {
            return Ok(Arc::clone(store));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        tracing::info!("Opening index store at {}", self.path.display());
        let store = Arc::new(SqliteStore::open(&self.path)?);
        *guard = Some(Arc::clone(&store));
        Ok(store)
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct KvStats {
    pub entries: usize,
    pub puts: u64,
    pub deletes: u64,
}

impl std::fmt::Display for KvStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Index Statistics:")?;
        writeln!(f, "  Entries: {}", self.entries)?;
        writeln!(f, "  Puts: {}", self.puts)?;
        writeln!(f, "  Deletes: {}", self.deletes)
    }
}
