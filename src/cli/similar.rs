use anyhow::Result;
use std::sync::Arc;

use tome::config::TomeConfig;

/// Print the records nearest to `id`, excluding `id` itself.
pub async fn similar(config: TomeConfig, id: &str, k: Option<usize>) -> Result<()> {
    let k = k.unwrap_or(config.search.default_k);
    let state = super::open_state(config).await?;

    let engine = Arc::clone(&state.engine);
    let record_id = id.to_string();
    let result = tokio::task::spawn_blocking(move || engine.find_similar(&record_id, k)).await??;

    super::print_ranked(&state.db, &result)?;
    Ok(())
}
