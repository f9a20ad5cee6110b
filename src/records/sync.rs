//! Write path that keeps the record store and the search engine in step.
//!
//! Every mutation embeds the new text, commits it to the authoritative tables
//! and then notifies the engine before returning, so no later search in this
//! process can see a stale vector.

use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::Connection;

use super::store::{self, RecordUpdate};
use super::types::{EmbeddingKind, Record};
use crate::embedding::EmbeddingProvider;
use crate::search::engine::SimilaritySearchEngine;
use crate::search::lock_db;

const KINDS: [EmbeddingKind; 2] = [EmbeddingKind::Summary, EmbeddingKind::Content];
const BATCH_SIZE: usize = 32;

/// Embed both kinds of text for a record.
pub fn embed_record(
    model: &dyn EmbeddingProvider,
    record: &Record,
) -> Result<Vec<(EmbeddingKind, Vec<f32>)>> {
    let texts: Vec<String> = KINDS.iter().map(|kind| record.text_for(*kind)).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let vectors = model.embed_batch(&refs)?;
    Ok(KINDS.into_iter().zip(vectors).collect())
}

pub fn add_record(
    db: &Mutex<Connection>,
    engine: &SimilaritySearchEngine,
    title: &str,
    content: &str,
    summary: Option<&str>,
) -> Result<Record> {
    let draft = Record {
        id: String::new(),
        title: title.to_string(),
        content: content.to_string(),
        summary: summary.map(str::to_string),
        created_at: String::new(),
        updated_at: String::new(),
    };
    let vectors = embed_with_engine_model(engine, &draft)?;

    let record = {
        let mut conn = lock_db(db)?;
        store::create_record(&mut conn, title, content, summary, &as_refs(&vectors))?
    };
    notify_upserted(engine, &record.id, &vectors)?;

    tracing::info!(id = %record.id, title_len = title.len(), "record stored");
    Ok(record)
}

pub fn edit_record(
    db: &Mutex<Connection>,
    engine: &SimilaritySearchEngine,
    record_id: &str,
    update: &RecordUpdate<'_>,
) -> Result<Record> {
    let existing = store::get_record(&*lock_db(db)?, record_id)?
        .with_context(|| format!("record not found: {record_id}"))?;

    let draft = Record {
        title: update.title.unwrap_or(&existing.title).to_string(),
        content: update.content.unwrap_or(&existing.content).to_string(),
        summary: update.summary.map(str::to_string).or(existing.summary.clone()),
        ..existing
    };
    let vectors = embed_with_engine_model(engine, &draft)?;

    let record = {
        let mut conn = lock_db(db)?;
        store::update_record(&mut conn, record_id, update, &as_refs(&vectors))?
    };
    notify_upserted(engine, record_id, &vectors)?;

    tracing::info!(id = %record_id, "record updated");
    Ok(record)
}

/// Returns `false` if the record did not exist.
pub fn remove_record(
    db: &Mutex<Connection>,
    engine: &SimilaritySearchEngine,
    record_id: &str,
) -> Result<bool> {
    let deleted = {
        let mut conn = lock_db(db)?;
        store::delete_record(&mut conn, record_id)?
    };
    engine.record_deleted(record_id)?;
    if deleted {
        tracing::info!(id = %record_id, "record deleted");
    }
    Ok(deleted)
}

/// Recompute every vector with the current model, record the model in
/// `schema_meta` and rebuild the index. `on_batch` receives the number of
/// records finished in each batch.
pub fn reembed_all(
    db: &Mutex<Connection>,
    engine: &SimilaritySearchEngine,
    model_name: &str,
    mut on_batch: impl FnMut(usize),
) -> Result<usize> {
    let model = engine
        .models()
        .get_model()
        .context("cannot re-embed without the embedding model")?;
    let records = store::list_records(&*lock_db(db)?)?;

    for chunk in records.chunks(BATCH_SIZE) {
        let mut batch = Vec::with_capacity(chunk.len());
        for record in chunk {
            batch.push((record, embed_record(model.as_ref(), record)?));
        }

        let mut conn = lock_db(db)?;
        let tx = conn.transaction()?;
        for (record, vectors) in &batch {
            for (kind, vector) in vectors {
                store::put_vector(&tx, &record.id, *kind, vector, &record.updated_at)?;
            }
        }
        tx.commit()?;
        drop(conn);

        on_batch(chunk.len());
    }

    crate::db::migrations::set_embedding_model(&*lock_db(db)?, model_name, model.dimensions())?;
    engine.rebuild_index()?;

    tracing::info!(records = records.len(), model = model_name, "re-embedded all records");
    Ok(records.len())
}

fn embed_with_engine_model(
    engine: &SimilaritySearchEngine,
    record: &Record,
) -> Result<Vec<(EmbeddingKind, Vec<f32>)>> {
    let model = engine
        .models()
        .get_model()
        .context("cannot embed record")?;
    embed_record(model.as_ref(), record)
}

fn as_refs(vectors: &[(EmbeddingKind, Vec<f32>)]) -> Vec<(EmbeddingKind, &[f32])> {
    vectors.iter().map(|(kind, v)| (*kind, v.as_slice())).collect()
}

fn notify_upserted(
    engine: &SimilaritySearchEngine,
    record_id: &str,
    vectors: &[(EmbeddingKind, Vec<f32>)],
) -> Result<()> {
    if let Some((_, vector)) = vectors.iter().find(|(kind, _)| *kind == engine.kind()) {
        engine.record_upserted(record_id, vector)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TomeConfig;
    use crate::embedding::ConfiguredModelLoader;
    use crate::search::index::IndexBackend;
    use crate::search::model::ModelManager;
    use std::sync::Arc;

    fn setup(backend: IndexBackend) -> (Arc<Mutex<Connection>>, SimilaritySearchEngine) {
        let mut config = TomeConfig::default();
        config.embedding.provider = "hash".into();
        config.embedding.dimension = 64;
        config.search.vector_index_backend = backend;

        let db = Arc::new(Mutex::new(crate::db::open_memory_database().unwrap()));
        let models = Arc::new(ModelManager::new(Box::new(ConfiguredModelLoader::new(
            config.embedding.clone(),
        ))));
        let engine = SimilaritySearchEngine::open(Arc::clone(&db), &config, models).unwrap();
        (db, engine)
    }

    #[test]
    fn added_records_are_searchable() {
        let (db, engine) = setup(IndexBackend::Native);
        let a = add_record(&db, &engine, "sqlite tuning", "wal mode and busy timeouts", None)
            .unwrap();
        add_record(&db, &engine, "bread", "sourdough hydration", None).unwrap();

        let result = engine.semantic_search("sqlite wal busy timeouts", 1).unwrap();
        assert_eq!(result.hits()[0].record_id, a.id);
    }

    #[test]
    fn both_kinds_are_stored() {
        let (db, engine) = setup(IndexBackend::Fallback);
        let r = add_record(&db, &engine, "title", "body", Some("summary")).unwrap();
        let conn = db.lock().unwrap();
        assert!(store::get_vector(&conn, &r.id, EmbeddingKind::Summary).unwrap().is_some());
        assert!(store::get_vector(&conn, &r.id, EmbeddingKind::Content).unwrap().is_some());
    }

    #[test]
    fn edit_invalidates_the_cached_vector() {
        let (db, engine) = setup(IndexBackend::Fallback);
        let r = add_record(&db, &engine, "alpha", "first text", None).unwrap();
        add_record(&db, &engine, "beta", "second text", None).unwrap();
        engine.find_similar(&r.id, 1).unwrap();
        assert!(engine.cache().get(&r.id).is_some());

        let update = RecordUpdate {
            content: Some("rewritten text"),
            ..RecordUpdate::default()
        };
        let updated = edit_record(&db, &engine, &r.id, &update).unwrap();
        assert_eq!(updated.content, "rewritten text");
        assert!(engine.cache().get(&r.id).is_none());
    }

    #[test]
    fn edit_of_missing_record_fails() {
        let (db, engine) = setup(IndexBackend::Fallback);
        assert!(edit_record(&db, &engine, "nope", &RecordUpdate::default()).is_err());
    }

    #[test]
    fn removed_records_leave_results() {
        let (db, engine) = setup(IndexBackend::Native);
        let a = add_record(&db, &engine, "same", "same", None).unwrap();
        let b = add_record(&db, &engine, "same", "same", None).unwrap();

        assert!(remove_record(&db, &engine, &b.id).unwrap());
        assert!(!remove_record(&db, &engine, &b.id).unwrap());
        assert!(engine.find_similar(&a.id, 3).unwrap().hits().is_empty());
    }

    #[test]
    fn reembed_reports_progress_and_records_model() {
        let (db, engine) = setup(IndexBackend::Native);
        for i in 0..3 {
            add_record(&db, &engine, &format!("note {i}"), "body", None).unwrap();
        }

        let mut seen = 0;
        let n = reembed_all(&db, &engine, "hash-test", |done| seen += done).unwrap();
        assert_eq!(n, 3);
        assert_eq!(seen, 3);

        let conn = db.lock().unwrap();
        assert_eq!(
            crate::db::migrations::get_embedding_model(&conn).unwrap().as_deref(),
            Some("hash-test")
        );
        assert_eq!(crate::db::migrations::get_embedding_dimension(&conn).unwrap(), Some(64));
    }
}
