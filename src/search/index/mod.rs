//! Vector index abstraction.
//!
//! [`VectorIndex`] has exactly two implementations, chosen once per process by
//! [`open_vector_index`]:
//!
//! - [`native::SqliteVecIndex`] — a sqlite-vec `vec0` mirror of the vector table.
//! - [`fallback::BruteForceIndex`] — one batched matrix–vector product over the
//!   whole vector table plus partial top-k selection.
//!
//! Call sites only ever see `dyn VectorIndex`. Neither implementation holds
//! anything that cannot be rebuilt from `record_embeddings`.

pub mod fallback;
pub mod native;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::records::types::EmbeddingKind;

/// Which backend to use, as configured by `vector_index_backend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    /// Probe the native backend, fall back silently if it is unusable.
    Auto,
    Native,
    Fallback,
}

impl IndexBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Native => "native",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IndexBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "native" => Ok(Self::Native),
            "fallback" => Ok(Self::Fallback),
            _ => Err(format!("unknown vector index backend: {s}")),
        }
    }
}

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub record_id: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Similarity search over the vectors of one [`EmbeddingKind`].
///
/// Mutations take `&self`; each implementation serializes them internally.
pub trait VectorIndex: Send + Sync {
    /// The backend actually in use (never [`IndexBackend::Auto`]).
    fn backend(&self) -> IndexBackend;

    /// `true` only for the native backend.
    fn is_available(&self) -> bool;

    fn add(&self, record_id: &str, vector: &[f32]) -> Result<(), SearchError>;

    fn update(&self, record_id: &str, vector: &[f32]) -> Result<(), SearchError>;

    fn delete(&self, record_id: &str) -> Result<(), SearchError>;

    /// Top `k` records by descending cosine similarity. Ties go to the most
    /// recently modified record.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>, SearchError>;

    /// Discard everything and reload from the vector table. Returns the number
    /// of vectors indexed.
    fn rebuild(&self) -> Result<usize, SearchError>;

    fn len(&self) -> Result<usize, SearchError>;

    /// `true` while the stored vectors could not be indexed at the configured
    /// dimension.
    fn needs_rebuild(&self) -> bool {
        false
    }
}

/// Select the index backend. The native probe runs at most once here; on
/// `auto` a failed probe is logged once and the fallback is used from then on.
pub fn open_vector_index(
    backend: IndexBackend,
    db: Arc<Mutex<Connection>>,
    kind: EmbeddingKind,
    dimension: usize,
) -> Result<Box<dyn VectorIndex>, SearchError> {
    match backend {
        IndexBackend::Fallback => Ok(Box::new(fallback::BruteForceIndex::new(db, kind, dimension))),
        IndexBackend::Native => Ok(Box::new(native::SqliteVecIndex::open(db, kind, dimension)?)),
        IndexBackend::Auto => match native::SqliteVecIndex::open(Arc::clone(&db), kind, dimension) {
            Ok(index) => Ok(Box::new(index)),
            Err(SearchError::IndexBackendUnavailable(reason)) => {
                tracing::info!(
                    %reason,
                    "native vector index unavailable, using brute-force search"
                );
                Ok(Box::new(fallback::BruteForceIndex::new(db, kind, dimension)))
            }
            Err(e) => Err(e),
        },
    }
}

pub(crate) fn check_dimension(
    record_id: &str,
    expected: usize,
    vector: &[f32],
) -> Result<(), SearchError> {
    if vector.len() != expected {
        return Err(SearchError::dimension_mismatch(
            format!("indexed vector for {record_id}"),
            expected,
            vector.len(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_from_config_strings() {
        assert_eq!("auto".parse::<IndexBackend>().unwrap(), IndexBackend::Auto);
        assert_eq!("native".parse::<IndexBackend>().unwrap(), IndexBackend::Native);
        assert_eq!("fallback".parse::<IndexBackend>().unwrap(), IndexBackend::Fallback);
        assert!("hnsw".parse::<IndexBackend>().is_err());
    }

    #[test]
    fn fallback_is_selected_without_probing() {
        let db = Arc::new(Mutex::new(crate::db::open_memory_database().unwrap()));
        let index =
            open_vector_index(IndexBackend::Fallback, db, EmbeddingKind::Content, 8).unwrap();
        assert_eq!(index.backend(), IndexBackend::Fallback);
        assert!(!index.is_available());
    }

    #[test]
    fn auto_prefers_native_when_sqlite_vec_loads() {
        let db = Arc::new(Mutex::new(crate::db::open_memory_database().unwrap()));
        let index = open_vector_index(IndexBackend::Auto, db, EmbeddingKind::Content, 8).unwrap();
        assert_eq!(index.backend(), IndexBackend::Native);
        assert!(index.is_available());
    }
}
