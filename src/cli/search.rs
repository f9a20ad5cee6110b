//! CLI `search` command: semantic ranking with a keyword fallback.

use anyhow::Result;
use std::sync::Arc;

use tome::config::TomeConfig;
use tome::records::store::keyword_search;
use tome::search::engine::SearchResult;
use tome::search::model::ModelStatus;

/// Rank records against `query` and print them.
pub async fn search(config: TomeConfig, query: &str, k: Option<usize>) -> Result<()> {
    let k = k.unwrap_or(config.search.default_k);
    let state = super::open_state(config).await?;

    let pb = (state.engine.models().status() != ModelStatus::Loaded)
        .then(|| super::spinner("Loading embedding model..."));

    let engine = Arc::clone(&state.engine);
    let query_text = query.to_string();
    let result =
        tokio::task::spawn_blocking(move || engine.semantic_search(&query_text, k)).await??;

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if super::print_ranked(&state.db, &result)? {
        return Ok(());
    }

    if let SearchResult::Unavailable { reason } = &result {
        println!("Semantic ranking unavailable this time ({reason}).");
        println!("Showing keyword matches instead.\n");
    }

    let matches = {
        let conn = state
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
        keyword_search(&conn, query, k)?
    };
    if matches.is_empty() {
        println!("No results found.");
    }
    for (i, record) in matches.iter().enumerate() {
        println!("  {}. {}", i + 1, record.title);
        println!("     {}", record.id);
        println!("     {}", super::preview(&record.content));
        println!();
    }
    Ok(())
}
