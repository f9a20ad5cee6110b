//! Semantic search performance engine.
//!
//! - [`model`] — lazily loaded, idle-unloaded embedding model
//! - [`cache`] — LRU + TTL cache of record vectors with a stacked matrix view
//! - [`index`] — native (sqlite-vec) or brute-force vector index
//! - [`engine`] — the [`engine::SimilaritySearchEngine`] façade tying them together
//! - [`math`] — batched cosine scoring and top-k selection

pub mod cache;
pub mod engine;
pub mod index;
pub mod math;
pub mod model;

use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::SearchError;

pub(crate) fn lock_db(db: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, SearchError> {
    db.lock()
        .map_err(|e| SearchError::Other(anyhow::anyhow!("db lock poisoned: {e}")))
}
