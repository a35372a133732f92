//! Database schema definitions

/// SQL to create the ordered key-value table.
///
/// Keys are BLOBs so SQLite orders them bytewise (memcmp), which is what
/// prefix range scans rely on.
pub const CREATE_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    key BLOB PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID
"#;

/// Journal mode pragma. Returns a row, so it must be run as a query.
pub const JOURNAL_MODE_PRAGMA: &str = "PRAGMA journal_mode = WAL";

/// Pragmas that return no rows
pub const PRAGMAS: &[&str] = &["PRAGMA synchronous = NORMAL"];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![CREATE_ENTRIES_TABLE]
}
