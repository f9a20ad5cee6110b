//! Local-first personal knowledge base with fast semantic search.
//!
//! tome stores notes ("records") in SQLite and ranks them by meaning. Ranking
//! is served by a small performance engine:
//!
//! | Component | Role |
//! |-----------|------|
//! | [`search::model::ModelManager`] | Loads the embedding model on first use, unloads it when idle |
//! | [`search::cache::EmbeddingCache`] | LRU + TTL cache of record vectors with a stacked matrix view |
//! | [`search::index::VectorIndex`] | sqlite-vec mirror table, or brute-force batch scoring |
//! | [`search::engine::SimilaritySearchEngine`] | `find_similar` / `semantic_search` façade |
//!
//! A missing model never fails a search: the engine returns
//! [`search::engine::SearchResult::Unavailable`] and callers fall back to
//! keyword matching.
//!
//! # Architecture
//!
//! - **Storage**: SQLite, with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   as the optional native vector index
//! - **Embeddings**: Local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions),
//!   or a deterministic feature-hashing embedder
//! - **Transport**: MCP over stdio (primary) or Streamable HTTP/SSE
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite initialization, schema, migrations, and health checks
//! - [`embedding`] — Text-to-vector providers and the model loader
//! - [`error`] — Typed search errors
//! - [`records`] — Authoritative record and vector tables, and the write path
//! - [`search`] — The semantic search engine
//! - [`server`] / [`tools`] — MCP server and tool handlers

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod records;
pub mod search;
pub mod server;
pub mod tools;
