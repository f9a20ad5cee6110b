//! LRU + TTL cache of per-record embedding vectors.
//!
//! Entries expire a fixed time after insertion regardless of how often they are
//! read; reads refresh LRU recency only. A derived [`MatrixSnapshot`] stacks all
//! live entries for batched scoring and is rebuilt lazily after any write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use super::math::{l2_normalize, VectorMatrix};
use crate::error::SearchError;

#[derive(Debug, Clone)]
struct CacheEntry {
    vector: Vec<f32>,
    last_access: Instant,
    inserted_at: Instant,
}

/// Stacked view of the cache contents, or `Stale` after any write.
#[derive(Debug, Clone)]
pub enum MatrixSnapshot {
    Stale,
    Valid {
        matrix: Arc<VectorMatrix>,
        /// The snapshot stops being valid once its oldest entry expires.
        valid_until: Option<Instant>,
    },
}

/// Counters exposed for diagnostics (`doctor`, `index_status`).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub resets: u64,
}

struct CacheState {
    entries: LruCache<String, CacheEntry>,
    snapshot: MatrixSnapshot,
    stats: CacheStats,
}

pub struct EmbeddingCache {
    max_size: usize,
    ttl: Duration,
    dimension: usize,
    state: Mutex<CacheState>,
}

impl EmbeddingCache {
    pub fn new(max_size: usize, ttl: Duration, dimension: usize) -> Self {
        Self {
            max_size,
            ttl,
            dimension,
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                snapshot: MatrixSnapshot::Stale,
                stats: CacheStats {
                    capacity: max_size,
                    ..CacheStats::default()
                },
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }

    /// Returns the cached vector if present and not expired.
    pub fn get(&self, record_id: &str) -> Option<Vec<f32>> {
        self.get_at(record_id, Instant::now())
    }

    /// Insert or overwrite. The vector is L2-normalized before storage.
    pub fn put(&self, record_id: &str, vector: &[f32]) -> Result<(), SearchError> {
        self.put_at(record_id, vector, Instant::now())
    }

    /// Remove an entry unconditionally. Called whenever the record changes.
    pub fn invalidate(&self, record_id: &str) {
        let mut state = self.state.lock();
        state.entries.pop(record_id);
        state.snapshot = MatrixSnapshot::Stale;
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.snapshot = MatrixSnapshot::Stale;
    }

    /// All live entries stacked into one matrix, ids sorted ascending.
    ///
    /// Repeated calls without an intervening write return the same snapshot.
    pub fn get_all_as_matrix(&self) -> Arc<VectorMatrix> {
        self.get_all_as_matrix_at(Instant::now())
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) > self.ttl
    }

    fn get_at(&self, record_id: &str, now: Instant) -> Option<Vec<f32>> {
        let mut state = self.state.lock();

        let expired = match state.entries.peek(record_id) {
            Some(entry) => self.is_expired(entry, now),
            None => {
                state.stats.misses += 1;
                return None;
            }
        };

        if expired {
            state.entries.pop(record_id);
            state.snapshot = MatrixSnapshot::Stale;
            state.stats.expirations += 1;
            state.stats.misses += 1;
            tracing::trace!(record_id, "cache entry expired");
            return None;
        }

        state.stats.hits += 1;
        let entry = state.entries.get_mut(record_id)?;
        entry.last_access = now;
        Some(entry.vector.clone())
    }

    fn put_at(&self, record_id: &str, vector: &[f32], now: Instant) -> Result<(), SearchError> {
        if vector.len() != self.dimension {
            return Err(SearchError::dimension_mismatch(
                format!("cached vector for {record_id}"),
                self.dimension,
                vector.len(),
            ));
        }
        if self.max_size == 0 {
            return Ok(());
        }

        let mut state = self.state.lock();
        state.snapshot = MatrixSnapshot::Stale;

        if !state.entries.contains(record_id) && state.entries.len() >= self.max_size {
            self.purge_expired(&mut state, now);
            if state.entries.len() >= self.max_size {
                if let Some((evicted, entry)) = state.entries.pop_lru() {
                    state.stats.evictions += 1;
                    let idle = now.saturating_duration_since(entry.last_access);
                    tracing::trace!(
                        evicted = %evicted,
                        idle_ms = idle.as_millis() as u64,
                        "evicted least recently used vector"
                    );
                }
            }
        }

        state.entries.put(
            record_id.to_string(),
            CacheEntry {
                vector: l2_normalize(vector),
                last_access: now,
                inserted_at: now,
            },
        );

        self.enforce_invariants(&mut state);
        Ok(())
    }

    fn get_all_as_matrix_at(&self, now: Instant) -> Arc<VectorMatrix> {
        let mut state = self.state.lock();

        if let MatrixSnapshot::Valid {
            matrix,
            valid_until,
        } = &state.snapshot
        {
            if valid_until.map_or(true, |until| now <= until) {
                return Arc::clone(matrix);
            }
        }

        self.purge_expired(&mut state, now);

        let mut rows: Vec<(String, Vec<f32>)> = state
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.vector.clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let valid_until = state
            .entries
            .iter()
            .map(|(_, entry)| entry.inserted_at)
            .min()
            .and_then(|oldest| oldest.checked_add(self.ttl));

        let matrix = match VectorMatrix::from_rows(self.dimension, rows) {
            Ok(matrix) => Arc::new(matrix),
            Err(e) => {
                self.reset(&mut state, &SearchError::CacheInvariantViolation(e.to_string()));
                Arc::new(VectorMatrix::empty(self.dimension))
            }
        };

        state.snapshot = MatrixSnapshot::Valid {
            matrix: Arc::clone(&matrix),
            valid_until,
        };
        matrix
    }

    fn purge_expired(&self, state: &mut CacheState, now: Instant) -> usize {
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            state.entries.pop(id.as_str());
        }
        if !expired.is_empty() {
            state.snapshot = MatrixSnapshot::Stale;
            state.stats.expirations += expired.len() as u64;
        }
        expired.len()
    }

    fn enforce_invariants(&self, state: &mut CacheState) {
        if state.entries.len() > self.max_size {
            let violation = SearchError::CacheInvariantViolation(format!(
                "{} entries exceed capacity {}",
                state.entries.len(),
                self.max_size
            ));
            self.reset(state, &violation);
        }
    }

    fn reset(&self, state: &mut CacheState, violation: &SearchError) {
        tracing::warn!(error = %violation, "embedding cache reset");
        state.entries.clear();
        state.snapshot = MatrixSnapshot::Stale;
        state.stats.resets += 1;
    }
}
