//! Record and vector table access.
//!
//! Record writes ([`create_record`], [`update_record`], [`delete_record`]) run in a
//! transaction that also replaces the record's vectors. Vector reads
//! ([`get_vector`], [`load_vectors`], [`modified_times`]) are what the search
//! engine and its index backends consume.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

use super::types::{EmbeddingKind, Record, StoredVector};
use super::{bytes_to_vector, now_timestamp, timestamp_micros, vector_to_bytes};
use crate::search::math::l2_normalize;

/// Partial update for [`update_record`]. `None` fields are left unchanged.
#[derive(Debug, Default)]
pub struct RecordUpdate<'a> {
    pub title: Option<&'a str>,
    pub content: Option<&'a str>,
    pub summary: Option<&'a str>,
}

/// Insert a new record together with its vectors.
pub fn create_record(
    conn: &mut Connection,
    title: &str,
    content: &str,
    summary: Option<&str>,
    vectors: &[(EmbeddingKind, &[f32])],
) -> Result<Record> {
    if title.trim().is_empty() {
        bail!("record title must not be empty");
    }

    let id = uuid::Uuid::now_v7().to_string();
    let now = now_timestamp();

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO records (id, title, content, summary, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, title, content, summary, now],
    )?;
    for (kind, vector) in vectors {
        put_vector(&tx, &id, *kind, vector, &now)?;
    }
    tx.commit()?;

    Ok(Record {
        id,
        title: title.to_string(),
        content: content.to_string(),
        summary: summary.map(str::to_string),
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Apply a partial update and replace the given vectors.
///
/// Vectors of kinds not listed in `vectors` are dropped when the text changed,
/// so a stale embedding can never outlive its content.
pub fn update_record(
    conn: &mut Connection,
    record_id: &str,
    update: &RecordUpdate<'_>,
    vectors: &[(EmbeddingKind, &[f32])],
) -> Result<Record> {
    let Some(mut record) = get_record(conn, record_id)? else {
        bail!("record not found: {record_id}");
    };

    if let Some(title) = update.title {
        record.title = title.to_string();
    }
    if let Some(content) = update.content {
        record.content = content.to_string();
    }
    if let Some(summary) = update.summary {
        record.summary = Some(summary.to_string());
    }
    record.updated_at = now_timestamp();

    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE records SET title = ?1, content = ?2, summary = ?3, updated_at = ?4 WHERE id = ?5",
        params![
            record.title,
            record.content,
            record.summary,
            record.updated_at,
            record_id
        ],
    )?;
    tx.execute(
        "DELETE FROM record_embeddings WHERE record_id = ?1",
        params![record_id],
    )?;
    for (kind, vector) in vectors {
        put_vector(&tx, record_id, *kind, vector, &record.updated_at)?;
    }
    tx.commit()?;

    Ok(record)
}

/// Delete a record and its vectors. Returns `false` if it did not exist.
pub fn delete_record(conn: &mut Connection, record_id: &str) -> Result<bool> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM record_embeddings WHERE record_id = ?1",
        params![record_id],
    )?;
    let deleted = tx.execute("DELETE FROM records WHERE id = ?1", params![record_id])?;
    tx.commit()?;
    Ok(deleted > 0)
}

pub fn get_record(conn: &Connection, record_id: &str) -> Result<Option<Record>> {
    let record = conn
        .query_row(
            "SELECT id, title, content, summary, created_at, updated_at FROM records WHERE id = ?1",
            params![record_id],
            record_from_row,
        )
        .optional()?;
    Ok(record)
}

/// All records, oldest first.
pub fn list_records(conn: &Connection) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, content, summary, created_at, updated_at FROM records ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Batch-fetch records by ID. Missing IDs are skipped.
pub fn fetch_records(conn: &Connection, ids: &[&str]) -> Result<HashMap<String, Record>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT id, title, content, summary, created_at, updated_at \
         FROM records WHERE id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows.into_iter().map(|r| (r.id.clone(), r)).collect())
}

/// Plain substring match over title and content, newest first. Used when
/// semantic ranking is unavailable.
pub fn keyword_search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<Record>> {
    let needle = query.trim();
    if needle.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{escaped}%");

    let mut stmt = conn.prepare(
        "SELECT id, title, content, summary, created_at, updated_at FROM records \
         WHERE title LIKE ?1 ESCAPE '\\' OR content LIKE ?1 ESCAPE '\\' \
         ORDER BY updated_at DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![pattern, limit as i64], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        summary: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

// ── Vector table ─────────────────────────────────────────────────────────────

/// Insert or replace one vector. The vector is L2-normalized before storage.
pub fn put_vector(
    conn: &Connection,
    record_id: &str,
    kind: EmbeddingKind,
    vector: &[f32],
    modified_at: &str,
) -> rusqlite::Result<()> {
    let normalized = l2_normalize(vector);
    conn.execute(
        "INSERT OR REPLACE INTO record_embeddings (record_id, kind, dimensions, vector, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record_id,
            kind.as_str(),
            normalized.len() as i64,
            vector_to_bytes(&normalized),
            modified_at
        ],
    )?;
    Ok(())
}

pub fn get_vector(
    conn: &Connection,
    record_id: &str,
    kind: EmbeddingKind,
) -> rusqlite::Result<Option<StoredVector>> {
    conn.query_row(
        "SELECT record_id, vector, updated_at FROM record_embeddings \
         WHERE record_id = ?1 AND kind = ?2",
        params![record_id, kind.as_str()],
        |row| stored_vector_from_row(row, kind),
    )
    .optional()
}

/// Bulk read of every vector of one kind, most recently modified first.
pub fn load_vectors(conn: &Connection, kind: EmbeddingKind) -> rusqlite::Result<Vec<StoredVector>> {
    let mut stmt = conn.prepare(
        "SELECT record_id, vector, updated_at FROM record_embeddings \
         WHERE kind = ?1 ORDER BY updated_at DESC, record_id",
    )?;
    let rows = stmt
        .query_map(params![kind.as_str()], |row| stored_vector_from_row(row, kind))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_vectors(conn: &Connection, kind: EmbeddingKind) -> rusqlite::Result<usize> {
    conn.query_row(
        "SELECT COUNT(*) FROM record_embeddings WHERE kind = ?1",
        params![kind.as_str()],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n as usize)
}

/// Modification times (µs since epoch) for the given records' vectors.
pub fn modified_times(
    conn: &Connection,
    kind: EmbeddingKind,
    ids: &[&str],
) -> rusqlite::Result<HashMap<String, i64>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (2..=ids.len() + 1).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT record_id, updated_at FROM record_embeddings \
         WHERE kind = ?1 AND record_id IN ({})",
        placeholders.join(", ")
    );

    let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::with_capacity(ids.len() + 1);
    let kind_str = kind.as_str();
    params.push(&kind_str);
    params.extend(ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params.as_slice(), |row| {
            let id: String = row.get(0)?;
            let updated_at: String = row.get(1)?;
            Ok((id, timestamp_micros(&updated_at)))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

fn stored_vector_from_row(
    row: &rusqlite::Row<'_>,
    kind: EmbeddingKind,
) -> rusqlite::Result<StoredVector> {
    let blob: Vec<u8> = row.get(1)?;
    let updated_at: String = row.get(2)?;
    Ok(StoredVector {
        record_id: row.get(0)?,
        kind,
        vector: bytes_to_vector(&blob),
        modified_micros: timestamp_micros(&updated_at),
    })
}
