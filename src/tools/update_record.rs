use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `update_record` MCP tool. Omitted fields keep their value.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UpdateRecordParams {
    #[schemars(description = "ID of the record to update")]
    pub record_id: String,

    #[schemars(description = "New title")]
    pub title: Option<String>,

    #[schemars(description = "New full text")]
    pub content: Option<String>,

    #[schemars(description = "New summary")]
    pub summary: Option<String>,
}
