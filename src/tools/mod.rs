pub mod delete_record;
pub mod find_similar;
pub mod index_status;
pub mod semantic_search;
pub mod store_record;
pub mod update_record;

use delete_record::DeleteRecordParams;
use find_similar::FindSimilarParams;
use index_status::IndexStatusParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use rusqlite::Connection;
use semantic_search::SemanticSearchParams;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use store_record::StoreRecordParams;
use update_record::UpdateRecordParams;

use crate::config::TomeConfig;
use crate::records::store::{fetch_records, keyword_search, RecordUpdate};
use crate::records::sync;
use crate::search::engine::{SearchResult, SimilaritySearchEngine};
use crate::search::lock_db;

const MAX_K: usize = 50;
const PREVIEW_CHARS: usize = 160;

/// Shown to agents when semantic ranking could not run.
const UNAVAILABLE_HINT: &str =
    "Semantic ranking was unavailable this time; results are plain keyword matches.";

/// The tome MCP tool handler. Holds the shared db connection, search engine
/// and config, and exposes every tool via the `#[tool_router]` macro.
#[derive(Clone)]
pub struct TomeTools {
    tool_router: ToolRouter<Self>,
    db: Arc<Mutex<Connection>>,
    engine: Arc<SimilaritySearchEngine>,
    config: Arc<TomeConfig>,
}

/// One hydrated search hit.
#[derive(Debug, Serialize)]
struct HitView {
    id: String,
    title: String,
    score: f32,
    preview: String,
}

#[tool_router]
impl TomeTools {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        engine: Arc<SimilaritySearchEngine>,
        config: Arc<TomeConfig>,
    ) -> Self {
        Self {
            tool_router: Self::tool_router(),
            db,
            engine,
            config,
        }
    }

    /// Rank records by meaning against a free-text query.
    #[tool(description = "Search records by meaning. Returns ranked results, or status 'unavailable' when the embedding model cannot be loaded.")]
    async fn semantic_search(
        &self,
        Parameters(params): Parameters<SemanticSearchParams>,
    ) -> Result<String, String> {
        let k = clamp_k(params.k, self.config.search.default_k);
        tracing::info!(query_len = params.query.len(), k, "semantic_search called");

        let engine = Arc::clone(&self.engine);
        let db = Arc::clone(&self.db);
        let response = tokio::task::spawn_blocking(move || {
            let result = engine.semantic_search(&params.query, k)?;
            let mut response = render(&db, &result)?;
            if result.is_unavailable() {
                response["keyword_results"] = keyword_fallback(&db, &params.query, k)?;
            }
            Ok::<_, anyhow::Error>(response)
        })
        .await
        .map_err(|e| format!("search task failed: {e}"))?
        .map_err(|e| format!("search failed: {e:#}"))?;

        Ok(response.to_string())
    }

    /// Find the records closest to an existing record.
    #[tool(description = "Find records similar to an existing record. The record itself is excluded.")]
    async fn find_similar(
        &self,
        Parameters(params): Parameters<FindSimilarParams>,
    ) -> Result<String, String> {
        let k = clamp_k(params.k, self.config.search.default_k);
        tracing::info!(record_id = %params.record_id, k, "find_similar called");

        let engine = Arc::clone(&self.engine);
        let db = Arc::clone(&self.db);
        let response = tokio::task::spawn_blocking(move || {
            let result = engine.find_similar(&params.record_id, k)?;
            render(&db, &result)
        })
        .await
        .map_err(|e| format!("search task failed: {e}"))?
        .map_err(|e| format!("find_similar failed: {e:#}"))?;

        Ok(response.to_string())
    }

    #[tool(description = "Store a new record (title, content, optional summary) and index it for semantic search.")]
    async fn store_record(
        &self,
        Parameters(params): Parameters<StoreRecordParams>,
    ) -> Result<String, String> {
        if params.title.trim().is_empty() {
            return Err("title must not be empty".into());
        }

        let engine = Arc::clone(&self.engine);
        let db = Arc::clone(&self.db);
        let record = tokio::task::spawn_blocking(move || {
            sync::add_record(
                &db,
                &engine,
                &params.title,
                &params.content,
                params.summary.as_deref(),
            )
        })
        .await
        .map_err(|e| format!("store task failed: {e}"))?
        .map_err(|e| format!("store failed: {e:#}"))?;

        serde_json::to_string(&record).map_err(|e| format!("serialization failed: {e}"))
    }

    #[tool(description = "Update a record's title, content or summary. Its embeddings are recomputed.")]
    async fn update_record(
        &self,
        Parameters(params): Parameters<UpdateRecordParams>,
    ) -> Result<String, String> {
        let engine = Arc::clone(&self.engine);
        let db = Arc::clone(&self.db);
        let record = tokio::task::spawn_blocking(move || {
            let update = RecordUpdate {
                title: params.title.as_deref(),
                content: params.content.as_deref(),
                summary: params.summary.as_deref(),
            };
            sync::edit_record(&db, &engine, &params.record_id, &update)
        })
        .await
        .map_err(|e| format!("update task failed: {e}"))?
        .map_err(|e| format!("update failed: {e:#}"))?;

        serde_json::to_string(&record).map_err(|e| format!("serialization failed: {e}"))
    }

    #[tool(description = "Delete a record and its embeddings. Requires confirm=true.")]
    async fn delete_record(
        &self,
        Parameters(params): Parameters<DeleteRecordParams>,
    ) -> Result<String, String> {
        if !params.confirm {
            return Err("set confirm=true to delete".into());
        }

        let engine = Arc::clone(&self.engine);
        let db = Arc::clone(&self.db);
        let record_id = params.record_id.clone();
        let deleted = tokio::task::spawn_blocking(move || {
            sync::remove_record(&db, &engine, &record_id)
        })
        .await
        .map_err(|e| format!("delete task failed: {e}"))?
        .map_err(|e| format!("delete failed: {e:#}"))?;

        Ok(serde_json::json!({
            "record_id": params.record_id,
            "deleted": deleted,
        })
        .to_string())
    }

    #[tool(description = "Report the vector index backend, embedding cache counters and model state.")]
    async fn index_status(
        &self,
        Parameters(params): Parameters<IndexStatusParams>,
    ) -> Result<String, String> {
        let engine = Arc::clone(&self.engine);
        let stats = tokio::task::spawn_blocking(move || {
            if params.warm_cache.unwrap_or(false) {
                engine.warm_cache()?;
            }
            engine.stats()
        })
        .await
        .map_err(|e| format!("status task failed: {e}"))?
        .map_err(|e| format!("status failed: {e}"))?;

        serde_json::to_string(&stats).map_err(|e| format!("serialization failed: {e}"))
    }
}

#[tool_handler]
impl ServerHandler for TomeTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "tome is a personal knowledge base. Use store_record to save notes, \
                 semantic_search to find them by meaning, and find_similar to explore \
                 neighbours of a record."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}

fn clamp_k(k: Option<usize>, default_k: usize) -> usize {
    k.unwrap_or(default_k).clamp(1, MAX_K)
}

/// Hydrate ranked hits with titles and previews. Hits whose record vanished
/// between ranking and hydration are skipped.
fn render(db: &Mutex<Connection>, result: &SearchResult) -> anyhow::Result<serde_json::Value> {
    let (hits, backend) = match result {
        SearchResult::Unavailable { reason } => {
            return Ok(serde_json::json!({
                "status": "unavailable",
                "reason": reason,
                "message": UNAVAILABLE_HINT,
            }));
        }
        SearchResult::Ranked { hits, backend } => (hits, backend),
    };

    let ids: Vec<&str> = hits.iter().map(|h| h.record_id.as_str()).collect();
    let records = fetch_records(&*lock_db(db)?, &ids)?;

    let results: Vec<HitView> = hits
        .iter()
        .filter_map(|hit| {
            let record = records.get(&hit.record_id)?;
            Some(HitView {
                id: record.id.clone(),
                title: record.title.clone(),
                score: hit.score,
                preview: preview(&record.content),
            })
        })
        .collect();

    Ok(serde_json::json!({
        "status": "ranked",
        "backend": backend,
        "total": results.len(),
        "results": results,
    }))
}

fn keyword_fallback(
    db: &Mutex<Connection>,
    query: &str,
    limit: usize,
) -> anyhow::Result<serde_json::Value> {
    let records = keyword_search(&*lock_db(db)?, query, limit)?;
    let results: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            serde_json::json!({
                "id": r.id,
                "title": r.title,
                "preview": preview(&r.content),
            })
        })
        .collect();
    Ok(serde_json::Value::Array(results))
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let mut truncated: String = content.chars().take(PREVIEW_CHARS).collect();
    truncated.push_str("...");
    truncated
}
