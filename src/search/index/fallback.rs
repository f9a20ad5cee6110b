//! Brute-force index over the authoritative vector table.
//!
//! Keeps a row-stacked snapshot of every vector of one kind. Mutations only
//! mark the snapshot stale; the next search reloads it with one bulk read and
//! scores the query with a single matrix–vector product.

use std::sync::{Arc, Mutex};

use parking_lot::Mutex as SnapshotLock;
use rusqlite::Connection;

use super::{check_dimension, IndexBackend, ScoredRecord, VectorIndex};
use crate::error::SearchError;
use crate::records::store::{count_vectors, load_vectors};
use crate::records::types::EmbeddingKind;
use crate::search::lock_db;
use crate::search::math::{top_k, VectorMatrix};

struct LoadedTable {
    matrix: VectorMatrix,
    /// Modification time (µs) of each row, parallel to `matrix.ids()`.
    modified: Vec<i64>,
}

enum TableSnapshot {
    Stale,
    Loaded(Arc<LoadedTable>),
}

pub struct BruteForceIndex {
    db: Arc<Mutex<Connection>>,
    kind: EmbeddingKind,
    dimension: usize,
    // locked before the db, never the other way round
    snapshot: SnapshotLock<TableSnapshot>,
}

impl BruteForceIndex {
    pub fn new(db: Arc<Mutex<Connection>>, kind: EmbeddingKind, dimension: usize) -> Self {
        Self {
            db,
            kind,
            dimension,
            snapshot: SnapshotLock::new(TableSnapshot::Stale),
        }
    }

    fn mark_stale(&self) {
        *self.snapshot.lock() = TableSnapshot::Stale;
    }

    fn table(&self) -> Result<Arc<LoadedTable>, SearchError> {
        let mut snapshot = self.snapshot.lock();
        if let TableSnapshot::Loaded(table) = &*snapshot {
            return Ok(Arc::clone(table));
        }

        let stored = load_vectors(&*lock_db(&self.db)?, self.kind)?;
        let modified = stored.iter().map(|v| v.modified_micros).collect();
        let matrix = VectorMatrix::from_rows(
            self.dimension,
            stored.into_iter().map(|v| (v.record_id, v.vector)),
        )?;
        tracing::debug!(kind = %self.kind, rows = matrix.len(), "loaded brute-force snapshot");

        let table = Arc::new(LoadedTable { matrix, modified });
        *snapshot = TableSnapshot::Loaded(Arc::clone(&table));
        Ok(table)
    }
}

impl VectorIndex for BruteForceIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Fallback
    }

    fn is_available(&self) -> bool {
        false
    }

    fn add(&self, record_id: &str, vector: &[f32]) -> Result<(), SearchError> {
        check_dimension(record_id, self.dimension, vector)?;
        self.mark_stale();
        Ok(())
    }

    fn update(&self, record_id: &str, vector: &[f32]) -> Result<(), SearchError> {
        self.add(record_id, vector)
    }

    fn delete(&self, _record_id: &str) -> Result<(), SearchError> {
        self.mark_stale();
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

        let table = self.table()?;
        let scores = table.matrix.scores(query)?.to_vec();
        let ids = table.matrix.ids();
        let order = top_k(&scores, ids, k, |i| table.modified[i]);

        Ok(order
            .into_iter()
            .map(|i| ScoredRecord {
                record_id: ids[i].clone(),
                score: scores[i],
            })
            .collect())
    }

    fn rebuild(&self) -> Result<usize, SearchError> {
        self.mark_stale();
        let table = self.table()?;
        tracing::info!(
            kind = %self.kind,
            vectors = table.matrix.len(),
            "rebuilt brute-force index"
        );
        Ok(table.matrix.len())
    }

    fn len(&self) -> Result<usize, SearchError> {
        if let TableSnapshot::Loaded(table) = &*self.snapshot.lock() {
            return Ok(table.matrix.len());
        }
        Ok(count_vectors(&*lock_db(&self.db)?, self.kind)?)
    }
}
