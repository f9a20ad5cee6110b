//! Similarity search façade.
//!
//! [`SimilaritySearchEngine`] owns the embedding cache and the vector index and
//! borrows the shared [`ModelManager`]. Both entry points return a
//! [`SearchResult`]: a model that cannot be loaded yields
//! [`SearchResult::Unavailable`] rather than an error, so callers can fall back
//! to lexical search. Dimension mismatches and storage failures are still
//! returned as errors.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;

use super::cache::{CacheStats, EmbeddingCache};
use super::index::{open_vector_index, IndexBackend, ScoredRecord, VectorIndex};
use super::lock_db;
use super::math::l2_normalize;
use super::model::{ModelManager, ModelStatus};
use crate::config::TomeConfig;
use crate::error::SearchError;
use crate::records::store::{get_vector, load_vectors};
use crate::records::types::EmbeddingKind;

/// Largest `k` served. Larger requests are clamped so both backends return
/// the same number of hits (sqlite-vec caps a KNN query at 4096 rows).
pub const MAX_K: usize = 4000;

/// Outcome of a similarity query.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchResult {
    /// Best matches first.
    Ranked {
        hits: Vec<ScoredRecord>,
        backend: IndexBackend,
    },
    /// Semantic ranking could not run this time. Not a failure.
    Unavailable { reason: String },
}

impl SearchResult {
    pub fn hits(&self) -> &[ScoredRecord] {
        match self {
            Self::Ranked { hits, .. } => hits,
            Self::Unavailable { .. } => &[],
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Snapshot of engine state for `doctor` and the `index_status` tool.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub backend: IndexBackend,
    pub native_available: bool,
    pub kind: EmbeddingKind,
    pub dimension: usize,
    pub indexed_vectors: usize,
    pub index_needs_rebuild: bool,
    pub cache: CacheStats,
    pub model: String,
    pub model_status: ModelStatus,
    pub model_loads: u64,
}

pub struct SimilaritySearchEngine {
    db: Arc<Mutex<Connection>>,
    kind: EmbeddingKind,
    dimension: usize,
    cache: EmbeddingCache,
    index: Box<dyn VectorIndex>,
    models: Arc<ModelManager>,
    idle_timeout: Duration,
}

impl SimilaritySearchEngine {
    /// Build the engine from config. Probes the native index backend once.
    pub fn open(
        db: Arc<Mutex<Connection>>,
        config: &TomeConfig,
        models: Arc<ModelManager>,
    ) -> Result<Self, SearchError> {
        let kind = config.embedding.kind;
        let dimension = config.embedding.dimension;
        let index = open_vector_index(
            config.search.vector_index_backend,
            Arc::clone(&db),
            kind,
            dimension,
        )?;

        tracing::info!(
            backend = %index.backend(),
            %kind,
            dimension,
            cache_max_size = config.search.cache_max_size,
            cache_ttl_secs = config.search.cache_ttl_seconds,
            "similarity search engine ready"
        );

        Ok(Self {
            db,
            kind,
            dimension,
            cache: EmbeddingCache::new(
                config.search.cache_max_size,
                config.search.cache_ttl(),
                dimension,
            ),
            index,
            models,
            idle_timeout: config.search.model_idle_timeout(),
        })
    }

    pub fn kind(&self) -> EmbeddingKind {
        self.kind
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn backend(&self) -> IndexBackend {
        self.index.backend()
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    /// Records most similar to `record_id`, never including `record_id` itself.
    /// `k` above [`MAX_K`] is clamped.
    pub fn find_similar(&self, record_id: &str, k: usize) -> Result<SearchResult, SearchError> {
        self.models.check_idle(self.idle_timeout);

        let vector = self.record_vector(record_id)?;
        let hits = self.rank(&vector, k, Some(record_id))?;
        tracing::debug!(record_id, k, results = hits.len(), "find_similar");
        Ok(self.ranked(hits))
    }

    /// Records most similar to free text. Needs the embedding model.
    pub fn semantic_search(&self, query_text: &str, k: usize) -> Result<SearchResult, SearchError> {
        self.models.check_idle(self.idle_timeout);

        if query_text.trim().is_empty() || k == 0 {
            return Ok(self.ranked(Vec::new()));
        }

        let model = match self.models.get_model() {
            Ok(model) => model,
            Err(SearchError::ModelUnavailable(reason)) => {
                tracing::debug!(%reason, "semantic search unavailable");
                return Ok(SearchResult::Unavailable { reason });
            }
            Err(e) => return Err(e),
        };

        let query = model.embed(query_text)?;
        if query.len() != self.dimension {
            return Err(SearchError::dimension_mismatch(
                "query embedding",
                self.dimension,
                query.len(),
            ));
        }

        let hits = self.rank(&l2_normalize(&query), k, None)?;
        tracing::debug!(query_len = query_text.len(), k, results = hits.len(), "semantic_search");
        Ok(self.ranked(hits))
    }

    /// Must be called after a record's vector was written to the store and
    /// before the write is reported as done.
    pub fn record_upserted(&self, record_id: &str, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dimension {
            return Err(SearchError::dimension_mismatch(
                format!("vector for {record_id}"),
                self.dimension,
                vector.len(),
            ));
        }
        self.cache.invalidate(record_id);
        self.index.update(record_id, vector)
    }

    pub fn record_deleted(&self, record_id: &str) -> Result<(), SearchError> {
        self.cache.invalidate(record_id);
        self.index.delete(record_id)
    }

    /// Drop all derived state and rebuild the index from the vector table.
    pub fn rebuild_index(&self) -> Result<usize, SearchError> {
        self.cache.clear();
        self.index.rebuild()
    }

    /// Fill a cold cache from the vector table, most recently modified first.
    /// Returns the number of vectors cached.
    pub fn warm_cache(&self) -> Result<usize, SearchError> {
        // held until the puts finish, so a writer's invalidate always lands after them
        let conn = lock_db(&self.db)?;
        let stored = load_vectors(&conn, self.kind)?;
        let take = stored.len().min(self.cache.capacity());

        // insert oldest of the selection first so the newest ends up most recent
        for vector in stored.into_iter().take(take).rev() {
            self.cache.put(&vector.record_id, &vector.vector)?;
        }
        drop(conn);
        tracing::debug!(cached = take, "warmed embedding cache");
        Ok(take)
    }

    pub fn stats(&self) -> Result<EngineStats, SearchError> {
        Ok(EngineStats {
            backend: self.index.backend(),
            native_available: self.index.is_available(),
            kind: self.kind,
            dimension: self.dimension,
            indexed_vectors: self.index.len()?,
            index_needs_rebuild: self.index.needs_rebuild(),
            cache: self.cache.stats(),
            model: self.models.describe(),
            model_status: self.models.status(),
            model_loads: self.models.loads(),
        })
    }

    fn ranked(&self, hits: Vec<ScoredRecord>) -> SearchResult {
        SearchResult::Ranked {
            hits,
            backend: self.index.backend(),
        }
    }

    /// Cache first, then the vector table. A table read repopulates the cache.
    fn record_vector(&self, record_id: &str) -> Result<Vec<f32>, SearchError> {
        if let Some(vector) = self.cache.get(record_id) {
            return Ok(vector);
        }

        // Writers commit under this lock and invalidate after releasing it, so
        // the put below must happen while it is still held.
        let conn = lock_db(&self.db)?;
        let stored = get_vector(&conn, record_id, self.kind)?.ok_or_else(|| {
            SearchError::RecordNotFound {
                record_id: record_id.to_string(),
                kind: self.kind,
            }
        })?;
        if stored.vector.len() != self.dimension {
            return Err(SearchError::dimension_mismatch(
                format!("stored vector for {record_id}"),
                self.dimension,
                stored.vector.len(),
            ));
        }

        self.cache.put(record_id, &stored.vector)?;
        drop(conn);
        Ok(stored.vector)
    }

    fn rank(
        &self,
        query: &[f32],
        k: usize,
        exclude: Option<&str>,
    ) -> Result<Vec<ScoredRecord>, SearchError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let k = k.min(MAX_K);
        let fetch = k + usize::from(exclude.is_some());
        let mut seen = HashSet::new();
        let hits = self
            .index
            .search(query, fetch)?
            .into_iter()
            .filter(|hit| Some(hit.record_id.as_str()) != exclude)
            .filter(|hit| seen.insert(hit.record_id.clone()))
            .take(k)
            .collect();
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::ConfiguredModelLoader;
    use crate::records::store::create_record;

    const DIM: usize = 64;

    fn config(backend: IndexBackend, provider: &str, idle_minutes: u64) -> TomeConfig {
        let mut config = TomeConfig::default();
        config.embedding.provider = provider.into();
        config.embedding.dimension = DIM;
        config.embedding.cache_dir = "/nonexistent/tome-models".into();
        config.search.vector_index_backend = backend;
        config.search.model_idle_timeout_minutes = idle_minutes;
        config
    }

    fn engine(
        backend: IndexBackend,
        provider: &str,
    ) -> (SimilaritySearchEngine, Arc<Mutex<Connection>>) {
        engine_with(config(backend, provider, 10))
    }

    fn engine_with(config: TomeConfig) -> (SimilaritySearchEngine, Arc<Mutex<Connection>>) {
        let db = Arc::new(Mutex::new(crate::db::open_memory_database().unwrap()));
        let models = Arc::new(ModelManager::new(Box::new(ConfiguredModelLoader::new(
            config.embedding.clone(),
        ))));
        let engine = SimilaritySearchEngine::open(Arc::clone(&db), &config, models).unwrap();
        (engine, db)
    }

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[i % DIM] = 1.0;
        v
    }

    fn add(engine: &SimilaritySearchEngine, db: &Arc<Mutex<Connection>>, vector: &[f32]) -> String {
        let record = {
            let mut conn = db.lock().unwrap();
            create_record(&mut conn, "title", "body", None, &[(EmbeddingKind::Content, vector)])
                .unwrap()
        };
        engine.record_upserted(&record.id, vector).unwrap();
        record.id
    }

    #[test]
    fn find_similar_excludes_the_record_itself() {
        for backend in [IndexBackend::Fallback, IndexBackend::Native] {
            let (engine, db) = engine(backend, "hash");
            let x = add(&engine, &db, &axis(0));
            let mut near = axis(0);
            near[1] = 0.5;
            let y = add(&engine, &db, &near);
            add(&engine, &db, &axis(5));

            let result = engine.find_similar(&x, 2).unwrap();
            let hits = result.hits();
            assert_eq!(hits.len(), 2, "{backend}");
            assert_eq!(hits[0].record_id, y);
            assert!(hits.iter().all(|h| h.record_id != x));
        }
    }

    #[test]
    fn oversized_k_is_clamped_on_both_backends() {
        for backend in [IndexBackend::Fallback, IndexBackend::Native] {
            let (engine, db) = engine(backend, "hash");
            let x = add(&engine, &db, &axis(0));
            for i in 1..5 {
                add(&engine, &db, &axis(i));
            }

            let result = engine.find_similar(&x, usize::MAX).unwrap();
            assert_eq!(result.hits().len(), 4, "{backend}");
        }
    }

    #[test]
    fn find_similar_on_unknown_record_is_not_found() {
        let (engine, _db) = engine(IndexBackend::Fallback, "hash");
        assert!(matches!(
            engine.find_similar("missing", 3),
            Err(SearchError::RecordNotFound { .. })
        ));
    }

    #[test]
    fn lookup_populates_cache_and_upsert_invalidates_it() {
        let (engine, db) = engine(IndexBackend::Fallback, "hash");
        let id = add(&engine, &db, &axis(3));
        add(&engine, &db, &axis(4));
        assert!(engine.cache().get(&id).is_none());

        engine.find_similar(&id, 1).unwrap();
        assert!(engine.cache().get(&id).is_some());

        engine.record_upserted(&id, &axis(4)).unwrap();
        assert!(engine.cache().get(&id).is_none());
    }

    #[test]
    fn missing_model_degrades_to_unavailable() {
        let (engine, db) = engine(IndexBackend::Fallback, "local");
        add(&engine, &db, &axis(0));

        let result = engine.semantic_search("anything", 5).unwrap();
        match result {
            SearchResult::Unavailable { reason } => assert!(reason.contains("model download")),
            other => panic!("expected unavailable, got {other:?}"),
        }

        // vector-only lookups still work without the model
        let id = add(&engine, &db, &axis(1));
        assert!(!engine.find_similar(&id, 1).unwrap().is_unavailable());
    }

    #[test]
    fn semantic_search_ranks_shared_vocabulary_first() {
        let (engine, db) = engine(IndexBackend::Fallback, "hash");
        let model = engine.models().get_model().unwrap();
        let texts = ["sqlite vector index", "sourdough starter feeding", "rust borrow checker"];
        let mut ids = Vec::new();
        for text in texts {
            let v = model.embed(text).unwrap();
            ids.push(add(&engine, &db, &v));
        }

        let result = engine.semantic_search("vector index in sqlite", 1).unwrap();
        assert_eq!(result.hits()[0].record_id, ids[0]);
    }

    #[test]
    fn blank_query_returns_no_hits_without_loading() {
        let (engine, _db) = engine(IndexBackend::Fallback, "hash");
        assert!(engine.semantic_search("   ", 5).unwrap().hits().is_empty());
        assert_eq!(engine.models().loads(), 0);
    }

    #[test]
    fn zero_idle_timeout_unloads_on_next_search() {
        let (engine, _db) = engine_with(config(IndexBackend::Fallback, "hash", 0));
        engine.semantic_search("first", 1).unwrap();
        assert_eq!(engine.models().status(), ModelStatus::Loaded);

        engine.semantic_search("second", 1).unwrap();
        assert_eq!(engine.models().loads(), 2);
    }

    #[test]
    fn deleted_records_drop_out_of_results() {
        let (engine, db) = engine(IndexBackend::Native, "hash");
        let a = add(&engine, &db, &axis(0));
        let b = add(&engine, &db, &axis(0));

        crate::records::store::delete_record(&mut db.lock().unwrap(), &b).unwrap();
        engine.record_deleted(&b).unwrap();

        let result = engine.find_similar(&a, 5).unwrap();
        assert!(result.hits().is_empty());
    }

    #[test]
    fn upsert_with_wrong_dimension_is_rejected() {
        let (engine, _db) = engine(IndexBackend::Fallback, "hash");
        assert!(matches!(
            engine.record_upserted("x", &[1.0, 0.0]),
            Err(SearchError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn warm_cache_is_bounded_by_capacity() {
        let mut cfg = config(IndexBackend::Fallback, "hash", 10);
        cfg.search.cache_max_size = 3;
        let (engine, db) = engine_with(cfg);
        for i in 0..5 {
            add(&engine, &db, &axis(i));
        }
        assert_eq!(engine.warm_cache().unwrap(), 3);
        assert_eq!(engine.cache().len(), 3);
    }

    #[test]
    fn stats_report_backend_and_model() {
        let (engine, db) = engine(IndexBackend::Native, "hash");
        add(&engine, &db, &axis(0));
        let stats = engine.stats().unwrap();
        assert_eq!(stats.backend, IndexBackend::Native);
        assert!(stats.native_available);
        assert_eq!(stats.indexed_vectors, 1);
        assert_eq!(stats.model_status, ModelStatus::Unloaded);
        assert_eq!(stats.model, "hash:all-MiniLM-L6-v2");
    }

    #[test]
    fn result_serializes_with_status_tag() {
        let json = serde_json::to_value(SearchResult::Unavailable {
            reason: "no model".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["reason"], "no model");
    }
}
