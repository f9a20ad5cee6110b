//! CLI `add` command: store a record and index it.

use anyhow::{Context, Result};
use std::sync::Arc;

use tome::config::TomeConfig;
use tome::records::sync;

pub async fn add(
    config: TomeConfig,
    title: String,
    content: String,
    summary: Option<String>,
) -> Result<()> {
    let state = super::open_state(config).await?;
    let pb = super::spinner("Embedding record...");

    let db = Arc::clone(&state.db);
    let engine = Arc::clone(&state.engine);
    let record = tokio::task::spawn_blocking(move || {
        sync::add_record(&db, &engine, &title, &content, summary.as_deref())
    })
    .await?
    .context("failed to add record")?;

    pb.finish_and_clear();
    println!("Added {} ({})", record.title, record.id);
    Ok(())
}
