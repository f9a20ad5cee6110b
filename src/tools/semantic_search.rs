//! MCP `semantic_search` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `semantic_search` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SemanticSearchParams {
    /// Free-text query; embedded with the configured model.
    #[schemars(description = "Natural language query to rank records by meaning")]
    pub query: String,

    /// Number of results (1–50). Defaults to `search.default_k`.
    #[schemars(description = "Maximum number of results to return (1-50). Defaults to 5.")]
    pub k: Option<usize>,
}
