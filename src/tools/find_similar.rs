use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct FindSimilarParams {
    #[schemars(description = "ID of the record to find neighbours for. The record itself is never returned.")]
    pub record_id: String,

    #[schemars(description = "Maximum number of results to return (1-50). Defaults to 5.")]
    pub k: Option<usize>,
}
