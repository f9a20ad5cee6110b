//! sqlite-vec backed index.
//!
//! Mirrors `record_embeddings` rows of one kind into a `vec0` virtual table
//! named `vec_index_<kind>`. KNN runs inside SQLite by L2 distance; since all
//! vectors are unit length, cosine similarity is recovered as `1 - d²/2`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use super::{check_dimension, IndexBackend, ScoredRecord, VectorIndex};
use crate::error::SearchError;
use crate::records::store::{count_vectors, load_vectors, modified_times};
use crate::records::types::EmbeddingKind;
use crate::records::vector_to_bytes;
use crate::search::lock_db;
use crate::search::math::{l2_normalize, top_k};

/// Extra neighbours fetched beyond `k` so equal scores at the cut-off can be
/// re-ordered by recency.
const TIE_SLACK: usize = 8;

/// sqlite-vec caps KNN queries at this many neighbours. The engine clamps `k`
/// below it.
pub const MAX_KNN: usize = 4096;

pub struct SqliteVecIndex {
    db: Arc<Mutex<Connection>>,
    kind: EmbeddingKind,
    dimension: usize,
    table: String,
    meta_key: String,
    /// Set while the stored vectors cannot be mirrored at `dimension`. The
    /// mirror is left as it was and every search retries the rebuild.
    needs_rebuild: AtomicBool,
}

impl SqliteVecIndex {
    /// Probe sqlite-vec and create (or reuse) the mirror table.
    ///
    /// Fails with [`SearchError::IndexBackendUnavailable`] when the extension
    /// is not usable. A mirror whose row count or dimension disagrees with the
    /// authoritative table is rebuilt before returning. If the stored vectors
    /// themselves have another dimension, the index still opens and searches
    /// report [`SearchError::DimensionMismatch`] until the vectors are
    /// recomputed.
    pub fn open(
        db: Arc<Mutex<Connection>>,
        kind: EmbeddingKind,
        dimension: usize,
    ) -> Result<Self, SearchError> {
        let table = format!("vec_index_{}", kind.as_str());
        let meta_key = format!("{table}_dimension");

        let index = Self {
            db,
            kind,
            dimension,
            table,
            meta_key,
            needs_rebuild: AtomicBool::new(false),
        };

        let (version, mirrored_dimension) = {
            let conn = lock_db(&index.db)?;
            let version: String = conn
                .query_row("SELECT vec_version()", [], |row| row.get(0))
                .map_err(|e| SearchError::IndexBackendUnavailable(e.to_string()))?;
            let mirrored_dimension = index.mirrored_dimension(&conn)?;
            if mirrored_dimension.is_none() {
                index.create_mirror(&conn)?;
            }
            (version, mirrored_dimension)
        };

        let mirrored = index.len()?;
        let authoritative = count_vectors(&*lock_db(&index.db)?, kind)?;
        let dimension_changed = mirrored_dimension.is_some_and(|d| d != dimension);
        if dimension_changed || mirrored != authoritative {
            tracing::info!(
                table = %index.table,
                mirrored,
                authoritative,
                old_dimension = ?mirrored_dimension,
                dimension,
                "vector mirror out of date, rebuilding"
            );
            match index.rebuild() {
                Ok(_) => {}
                Err(e @ SearchError::DimensionMismatch { .. }) => {
                    tracing::warn!(
                        table = %index.table,
                        error = %e,
                        "stored vectors do not match the configured dimension, \
                         run `tome reindex --re-embed`"
                    );
                    index.needs_rebuild.store(true, Ordering::SeqCst);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(table = %index.table, sqlite_vec = %version, "native vector index ready");
        Ok(index)
    }

    fn mirrored_dimension(&self, conn: &Connection) -> Result<Option<usize>, SearchError> {
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM schema_meta WHERE key = ?1",
                [&self.meta_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    fn create_mirror(&self, conn: &Connection) -> Result<(), SearchError> {
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING vec0(\
                 id TEXT PRIMARY KEY, \
                 embedding float[{}]\
             )",
            self.table, self.dimension
        ))
        .map_err(|e| SearchError::IndexBackendUnavailable(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_meta (key, value) VALUES (?1, ?2)",
            params![self.meta_key, self.dimension.to_string()],
        )?;
        Ok(())
    }

    fn upsert(&self, record_id: &str, vector: &[f32]) -> Result<(), SearchError> {
        check_dimension(record_id, self.dimension, vector)?;
        if self.needs_rebuild.load(Ordering::SeqCst) {
            // the next successful rebuild picks the vector up from the store
            return Ok(());
        }
        let normalized = l2_normalize(vector);

        let mut conn = lock_db(&self.db)?;
        let tx = conn.transaction()?;
        // vec0 has no upsert
        tx.execute(&format!("DELETE FROM {} WHERE id = ?1", self.table), [record_id])?;
        tx.execute(
            &format!("INSERT INTO {} (id, embedding) VALUES (?1, ?2)", self.table),
            params![record_id, vector_to_bytes(&normalized)],
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl VectorIndex for SqliteVecIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Native
    }

    fn is_available(&self) -> bool {
        true
    }

    fn add(&self, record_id: &str, vector: &[f32]) -> Result<(), SearchError> {
        self.upsert(record_id, vector)
    }

    fn update(&self, record_id: &str, vector: &[f32]) -> Result<(), SearchError> {
        self.upsert(record_id, vector)
    }

    fn delete(&self, record_id: &str) -> Result<(), SearchError> {
        let conn = lock_db(&self.db)?;
        conn.execute(&format!("DELETE FROM {} WHERE id = ?1", self.table), [record_id])?;
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>, SearchError> {
        if query.len() != self.dimension {
            return Err(SearchError::dimension_mismatch(
                "query vector",
                self.dimension,
                query.len(),
            ));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        if self.needs_rebuild.load(Ordering::SeqCst) {
            self.rebuild()?;
        }

        let normalized = l2_normalize(query);
        let fetch = (k + TIE_SLACK).min(MAX_KNN);

        let conn = lock_db(&self.db)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, distance FROM {} WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
            self.table
        ))?;
        let candidates: Vec<(String, f64)> = stmt
            .query_map(params![vector_to_bytes(&normalized), fetch as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let ids: Vec<String> = candidates.iter().map(|(id, _)| id.clone()).collect();
        let scores: Vec<f32> = candidates
            .iter()
            .map(|(_, d)| (1.0 - d * d / 2.0) as f32)
            .collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let modified: HashMap<String, i64> = modified_times(&conn, self.kind, &id_refs)?;
        drop(conn);

        let order = top_k(&scores, &ids, k, |i| {
            modified.get(&ids[i]).copied().unwrap_or(i64::MIN)
        });
        Ok(order
            .into_iter()
            .map(|i| ScoredRecord {
                record_id: ids[i].clone(),
                score: scores[i],
            })
            .collect())
    }

    fn rebuild(&self) -> Result<usize, SearchError> {
        let mut conn = lock_db(&self.db)?;

        // validate before touching the mirror so a failure leaves it intact
        let vectors = load_vectors(&conn, self.kind)?;
        for stored in &vectors {
            check_dimension(&stored.record_id, self.dimension, &stored.vector)?;
        }

        let recreate = self.mirrored_dimension(&conn)? != Some(self.dimension);
        let tx = conn.transaction()?;
        if recreate {
            tracing::info!(
                table = %self.table,
                dimension = self.dimension,
                "recreating vector mirror"
            );
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", self.table))?;
            self.create_mirror(&tx)?;
        } else {
            tx.execute(&format!("DELETE FROM {}", self.table), [])?;
        }
        {
            let mut insert =
                tx.prepare(&format!("INSERT INTO {} (id, embedding) VALUES (?1, ?2)", self.table))?;
            for stored in &vectors {
                let normalized = l2_normalize(&stored.vector);
                insert.execute(params![stored.record_id, vector_to_bytes(&normalized)])?;
            }
        }
        tx.commit()?;
        self.needs_rebuild.store(false, Ordering::SeqCst);

        tracing::info!(table = %self.table, vectors = vectors.len(), "rebuilt native vector index");
        Ok(vectors.len())
    }

    fn needs_rebuild(&self) -> bool {
        self.needs_rebuild.load(Ordering::SeqCst)
    }

    fn len(&self) -> Result<usize, SearchError> {
        let conn = lock_db(&self.db)?;
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
            row.get(0)
        })?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::now_timestamp;
    use crate::records::store::{create_record, put_vector};

    fn shared_db() -> Arc<Mutex<Connection>> {
        Arc::new(Mutex::new(crate::db::open_memory_database().unwrap()))
    }

    fn seed(db: &Arc<Mutex<Connection>>, title: &str, vector: &[f32]) -> String {
        let mut conn = db.lock().unwrap();
        create_record(&mut conn, title, "body", None, &[(EmbeddingKind::Content, vector)])
            .unwrap()
            .id
    }

    #[test]
    fn open_rebuilds_from_existing_vectors() {
        let db = shared_db();
        let a = seed(&db, "a", &[1.0, 0.0, 0.0]);
        seed(&db, "b", &[0.0, 1.0, 0.0]);

        let index = SqliteVecIndex::open(Arc::clone(&db), EmbeddingKind::Content, 3).unwrap();
        assert_eq!(index.len().unwrap(), 2);

        let hits = index.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].record_id, a);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn distance_converts_to_cosine() {
        let db = shared_db();
        let index = SqliteVecIndex::open(Arc::clone(&db), EmbeddingKind::Content, 2).unwrap();
        index.add("x", &[0.6, 0.8]).unwrap();
        index.add("y", &[-1.0, 0.0]).unwrap();

        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].record_id, "x");
        assert!((hits[0].score - 0.6).abs() < 1e-5);
        assert!((hits[1].score + 1.0).abs() < 1e-5);
    }

    #[test]
    fn update_replaces_and_delete_removes() {
        let db = shared_db();
        let index = SqliteVecIndex::open(Arc::clone(&db), EmbeddingKind::Content, 2).unwrap();
        index.add("x", &[1.0, 0.0]).unwrap();
        index.update("x", &[0.0, 1.0]).unwrap();
        assert_eq!(index.len().unwrap(), 1);

        let hits = index.search(&[0.0, 1.0], 1).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-5);

        index.delete("x").unwrap();
        index.delete("x").unwrap();
        assert!(index.search(&[0.0, 1.0], 3).unwrap().is_empty());
    }

    #[test]
    fn ties_prefer_recently_modified() {
        let db = shared_db();
        let older = seed(&db, "older", &[1.0, 0.0]);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let newer = seed(&db, "newer", &[1.0, 0.0]);

        let index = SqliteVecIndex::open(Arc::clone(&db), EmbeddingKind::Content, 2).unwrap();
        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].record_id, newer);
        assert_eq!(hits[1].record_id, older);
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let db = shared_db();
        let index = SqliteVecIndex::open(Arc::clone(&db), EmbeddingKind::Content, 4).unwrap();
        assert!(matches!(
            index.add("x", &[1.0, 0.0]),
            Err(SearchError::DimensionMismatch { expected: 4, actual: 2, .. })
        ));
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(SearchError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn mismatched_stored_vector_fails_rebuild() {
        let db = shared_db();
        let id = seed(&db, "ok", &[1.0, 0.0, 0.0]);
        let index = SqliteVecIndex::open(Arc::clone(&db), EmbeddingKind::Content, 3).unwrap();
        {
            let conn = db.lock().unwrap();
            put_vector(&conn, &id, EmbeddingKind::Content, &[1.0, 0.0], &now_timestamp()).unwrap();
        }
        assert!(matches!(
            index.rebuild(),
            Err(SearchError::DimensionMismatch { expected: 3, actual: 2, .. })
        ));
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn stored_vectors_of_another_dimension_leave_mirror_intact() {
        let db = shared_db();
        let id = seed(&db, "a", &[1.0, 0.0, 0.0]);
        SqliteVecIndex::open(Arc::clone(&db), EmbeddingKind::Content, 3).unwrap();

        let index = SqliteVecIndex::open(Arc::clone(&db), EmbeddingKind::Content, 2).unwrap();
        assert!(index.needs_rebuild());
        assert_eq!(index.len().unwrap(), 1);
        let recorded: String = db
            .lock()
            .unwrap()
            .query_row(
                "SELECT value FROM schema_meta WHERE key = 'vec_index_content_dimension'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(recorded, "3");

        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(SearchError::DimensionMismatch { expected: 2, actual: 3, .. })
        ));
        // skipped while stale, picked up by the rebuild below
        index.update(&id, &[0.0, 1.0]).unwrap();

        {
            let conn = db.lock().unwrap();
            put_vector(&conn, &id, EmbeddingKind::Content, &[0.0, 1.0], &now_timestamp()).unwrap();
        }
        let hits = index.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].record_id, id);
        assert!(!index.needs_rebuild());
    }

    #[test]
    fn engine_k_limit_fits_the_knn_cap() {
        assert!(crate::search::engine::MAX_K + 1 + TIE_SLACK <= MAX_KNN);
    }

    #[test]
    fn reopening_with_new_dimension_recreates_mirror() {
        let db = shared_db();
        let index = SqliteVecIndex::open(Arc::clone(&db), EmbeddingKind::Content, 2).unwrap();
        index.add("x", &[1.0, 0.0]).unwrap();
        drop(index);

        let index = SqliteVecIndex::open(Arc::clone(&db), EmbeddingKind::Content, 3).unwrap();
        assert_eq!(index.len().unwrap(), 0);
        index.add("y", &[0.0, 0.0, 1.0]).unwrap();
        assert_eq!(index.len().unwrap(), 1);
    }
}
