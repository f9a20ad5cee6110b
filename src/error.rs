//! Error taxonomy for the semantic search engine.
//!
//! Performance-only failures ([`SearchError::ModelUnavailable`],
//! [`SearchError::IndexBackendUnavailable`]) are recovered inside the engine and
//! surface as degraded results. Correctness failures such as
//! [`SearchError::DimensionMismatch`] always propagate to the caller.

use crate::records::types::EmbeddingKind;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The embedding model is missing or failed to load.
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// The native vector index backend could not be initialized.
    #[error("native vector index unavailable: {0}")]
    IndexBackendUnavailable(String),

    /// A vector's length disagrees with the configured model dimension.
    /// Requires an explicit rebuild or re-embed, never corrected silently.
    #[error("dimension mismatch for {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("embedding cache invariant violated: {0}")]
    CacheInvariantViolation(String),

    #[error("no {kind} embedding stored for record {record_id}")]
    RecordNotFound {
        record_id: String,
        kind: EmbeddingKind,
    },

    #[error("database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SearchError {
    pub fn dimension_mismatch(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}
