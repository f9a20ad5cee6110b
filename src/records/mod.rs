//! Authoritative record store.
//!
//! Owns the `records` and `record_embeddings` tables. The search engine only
//! reads from here; writers must notify the engine after every mutation (see
//! [`crate::search::engine::SimilaritySearchEngine::record_upserted`]).

pub mod store;
pub mod sync;
pub mod types;

use chrono::{DateTime, SecondsFormat, Utc};

/// Convert an f32 embedding slice to raw bytes for SQLite blobs and sqlite-vec.
pub fn vector_to_bytes(vector: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            vector.as_ptr() as *const u8,
            std::mem::size_of_val(vector),
        )
    }
}

/// Decode a blob written by [`vector_to_bytes`]. Trailing partial floats are dropped.
pub fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(std::mem::size_of::<f32>())
        .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Current time as a fixed-width RFC 3339 string (microseconds, `Z` suffix).
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored RFC 3339 timestamp to microseconds since the epoch.
/// Unparseable values sort as the oldest possible modification.
pub fn timestamp_micros(value: &str) -> i64 {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc).timestamp_micros())
        .unwrap_or(i64::MIN)
}
