//! CLI `reindex` command: rebuild the vector index, optionally re-embedding
//! every record first.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use tome::config::TomeConfig;
use tome::records::store::list_records;
use tome::records::sync;
use tome::search::index::IndexBackend;

pub async fn reindex(config: TomeConfig, re_embed: bool) -> Result<()> {
    if re_embed {
        re_embed_all(config.clone()).await?;
    }

    let state = super::open_state(config).await?;
    let pb = super::spinner("Rebuilding vector index...");
    let engine = Arc::clone(&state.engine);
    let indexed = tokio::task::spawn_blocking(move || engine.rebuild_index())
        .await?
        .context("index rebuild failed")?;
    pb.finish_and_clear();

    println!("Indexed {indexed} vectors ({} backend).", state.engine.backend());
    Ok(())
}

/// Recompute all vectors. Runs against the brute-force index so vectors
/// stored with a different dimension don't block opening the native mirror.
async fn re_embed_all(mut config: TomeConfig) -> Result<()> {
    config.search.vector_index_backend = IndexBackend::Fallback;
    let model_name = config.embedding.model.clone();
    let state = super::open_state(config).await?;

    let total = {
        let conn = state
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
        list_records(&conn)?.len()
    };
    if total == 0 {
        println!("No records to re-embed.");
        return Ok(());
    }

    println!("Re-embedding {total} records with model '{model_name}'...");
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
            .context("progress template")?
            .progress_chars("##-"),
    );

    let db = Arc::clone(&state.db);
    let engine = Arc::clone(&state.engine);
    let progress = pb.clone();
    let done = tokio::task::spawn_blocking(move || {
        sync::reembed_all(&db, &engine, &model_name, |n| progress.inc(n as u64))
    })
    .await?
    .context("re-embed failed")?;

    pb.finish_and_clear();
    println!("Re-embedded {done} records.");
    Ok(())
}
