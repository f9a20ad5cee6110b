//! MCP `index_status` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `index_status` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IndexStatusParams {
    /// Also fill a cold embedding cache from the vector table.
    #[schemars(description = "If true, warm the embedding cache before reporting (default: false)")]
    pub warm_cache: Option<bool>,
}
