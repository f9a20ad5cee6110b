use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct StoreRecordParams {
    #[schemars(description = "Short title of the record")]
    pub title: String,

    #[schemars(description = "Full text of the record")]
    pub content: String,

    #[schemars(description = "Optional one-paragraph summary. The title is used for summary search when omitted.")]
    pub summary: Option<String>,
}
