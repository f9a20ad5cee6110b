//! CLI `doctor` command: database, index and model diagnostics.

use anyhow::{Context, Result};

use tome::config::TomeConfig;
use tome::db;

pub async fn doctor(config: TomeConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `tome add` or `tome serve` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    let configured_model = config.embedding.model.clone();
    let configured_dim = config.embedding.dimension;
    let configured_backend = config.search.vector_index_backend;

    let state = super::open_state(config)
        .await
        .context("failed to open database (may be corrupt)")?;

    let engine = std::sync::Arc::clone(&state.engine);
    let db_handle = std::sync::Arc::clone(&state.db);
    let (report, stats) = tokio::task::spawn_blocking(move || -> Result<_> {
        let report = {
            let conn = db_handle
                .lock()
                .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
            db::check_database_health(&conn).context("failed to run health check")?
        };
        Ok((report, engine.stats()?))
    })
    .await??;

    println!("tome health report");
    println!("==================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    match &report.sqlite_vec_version {
        Some(v) => println!("sqlite-vec:        {v}"),
        None => println!("sqlite-vec:        unavailable"),
    }
    println!();
    println!("Embedding model:");
    println!("  Stored:          {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {configured_model} ({configured_dim} dims)");
    let model_changed = report
        .embedding_model
        .as_deref()
        .is_some_and(|stored| stored != configured_model);
    let dim_changed = report
        .embedding_dimension
        .is_some_and(|stored| stored != configured_dim);
    if model_changed || dim_changed {
        println!("  WARNING: mismatch! Run `tome reindex --re-embed` to update vectors.");
    } else {
        println!("  Status:          OK (match)");
    }
    println!();
    println!("Vector index:");
    println!("  Configured:      {configured_backend}");
    println!("  In use:          {}", stats.backend);
    println!("  Indexed ({}):  {}", stats.kind, stats.indexed_vectors);
    if stats.index_needs_rebuild {
        println!(
            "  WARNING: stored vectors are not {} dims; searches fail until \
             `tome reindex --re-embed` runs.",
            stats.dimension
        );
    }
    println!("  Cache capacity:  {}", stats.cache.capacity);
    println!();
    println!("Row counts:");
    println!("  Records:         {}", report.record_count);
    println!("  Summary vectors: {}", report.summary_vectors);
    println!("  Content vectors: {}", report.content_vectors);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.db ~/.tome/tome.db");
        println!("  2. Then rebuild derived state: tome reindex");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
