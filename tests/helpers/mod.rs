#![allow(dead_code)]

use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use tome::config::TomeConfig;
use tome::db;
use tome::embedding::ConfiguredModelLoader;
use tome::records::store::create_record;
use tome::records::types::EmbeddingKind;
use tome::search::engine::SimilaritySearchEngine;
use tome::search::index::IndexBackend;
use tome::search::model::ModelManager;

pub const DIM: usize = 384;

/// Open a fresh in-memory database with schema and migrations applied,
/// shared the way the server shares it.
pub fn test_db() -> Arc<Mutex<Connection>> {
    Arc::new(Mutex::new(db::open_memory_database().unwrap()))
}

/// Config using the hash embedder so no model files are needed.
pub fn test_config(backend: IndexBackend) -> TomeConfig {
    let mut config = TomeConfig::default();
    config.embedding.provider = "hash".into();
    config.embedding.dimension = DIM;
    config.search.vector_index_backend = backend;
    config
}

pub fn open_engine(db: &Arc<Mutex<Connection>>, config: &TomeConfig) -> SimilaritySearchEngine {
    let models = Arc::new(ModelManager::new(Box::new(ConfiguredModelLoader::new(
        config.embedding.clone(),
    ))));
    SimilaritySearchEngine::open(Arc::clone(db), config, models).unwrap()
}

/// Deterministic 384-dim embedding with a spike at position `seed`.
pub fn test_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed % DIM] = 1.0;
    v
}

/// Deterministic pseudo-random unit vector (xorshift), distinct per seed.
pub fn random_embedding(seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    let v: Vec<f32> = (0..DIM)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 40) as f32 / (1u64 << 23) as f32 - 1.0
        })
        .collect();
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.into_iter().map(|x| x / norm).collect()
}

/// Insert a record with a content vector directly through the store.
/// Returns the record ID.
pub fn insert_record(db: &Arc<Mutex<Connection>>, title: &str, vector: &[f32]) -> String {
    let mut conn = db.lock().unwrap();
    create_record(&mut conn, title, "body", None, &[(EmbeddingKind::Content, vector)])
        .unwrap()
        .id
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
