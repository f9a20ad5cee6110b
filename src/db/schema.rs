//! SQL DDL for the authoritative tables.
//!
//! Defines `records`, `record_embeddings` and `schema_meta`. The optional
//! sqlite-vec mirror (`vec_index_<kind>`) is owned by the native vector index
//! and created on demand, not here. All DDL uses `IF NOT EXISTS`.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Knowledge-base records
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    summary TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_updated ON records(updated_at);

-- Authoritative vectors, one per (record, kind)
CREATE TABLE IF NOT EXISTS record_embeddings (
    record_id TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK(kind IN ('summary','content')),
    dimensions INTEGER NOT NULL,
    vector BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (record_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_record_embeddings_kind ON record_embeddings(kind, updated_at);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
