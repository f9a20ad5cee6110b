//! MCP server initialization for stdio and SSE transports.
//!
//! Provides [`serve_stdio`] and [`serve_sse`] entry points that wire up the
//! database, model manager, search engine and MCP tool handler into a running
//! server. [`setup_shared_state`] is also used by the CLI commands.

use crate::config::TomeConfig;
use crate::db;
use crate::embedding::ConfiguredModelLoader;
use crate::search::engine::SimilaritySearchEngine;
use crate::search::model::ModelManager;
use crate::tools::TomeTools;
use anyhow::{Context, Result};
use rmcp::ServiceExt;
use std::sync::{Arc, Mutex};

/// Everything a request handler needs, shared behind `Arc`s.
#[derive(Clone)]
pub struct SharedState {
    pub db: Arc<Mutex<rusqlite::Connection>>,
    pub engine: Arc<SimilaritySearchEngine>,
    pub config: Arc<TomeConfig>,
}

/// Open the database, create the single model manager and build the engine.
///
/// The model itself is not loaded here; the first semantic search does that.
pub fn setup_shared_state(config: TomeConfig) -> Result<SharedState> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path)?;
    tracing::info!(db = %db_path.display(), "database ready");

    warn_on_model_change(&conn, &config);

    let db = Arc::new(Mutex::new(conn));
    let models = Arc::new(ModelManager::new(Box::new(ConfiguredModelLoader::new(
        config.embedding.clone(),
    ))));
    let engine = SimilaritySearchEngine::open(Arc::clone(&db), &config, models)
        .context("failed to initialize search engine")?;

    Ok(SharedState {
        db,
        engine: Arc::new(engine),
        config: Arc::new(config),
    })
}

fn warn_on_model_change(conn: &rusqlite::Connection, config: &TomeConfig) {
    if let Ok(Some(stored_model)) = db::migrations::get_embedding_model(conn) {
        if stored_model != config.embedding.model {
            tracing::warn!(
                stored = %stored_model,
                configured = %config.embedding.model,
                "embedding model changed, run `tome reindex --re-embed` to update all vectors"
            );
        }
    }
    if let Ok(Some(stored_dim)) = db::migrations::get_embedding_dimension(conn) {
        if stored_dim != config.embedding.dimension {
            tracing::warn!(
                stored = stored_dim,
                configured = config.embedding.dimension,
                "embedding dimension changed, run `tome reindex --re-embed`"
            );
        }
    }
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: TomeConfig) -> Result<()> {
    tracing::info!("starting tome MCP server on stdio");

    let state = tokio::task::spawn_blocking(move || setup_shared_state(config)).await??;

    let tools = TomeTools::new(state.db, state.engine, state.config);
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over Streamable HTTP (SSE) transport.
pub async fn serve_sse(config: TomeConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting tome MCP server on SSE/HTTP");

    let state = tokio::task::spawn_blocking(move || setup_shared_state(config)).await??;

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || {
            Ok(TomeTools::new(
                Arc::clone(&state.db),
                Arc::clone(&state.engine),
                Arc::clone(&state.config),
            ))
        },
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down SSE server");
        })
        .await?;

    Ok(())
}
