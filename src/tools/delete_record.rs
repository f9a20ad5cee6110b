use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DeleteRecordParams {
    #[schemars(description = "ID of the record to delete")]
    pub record_id: String,

    #[schemars(description = "Must be true to confirm the deletion")]
    pub confirm: bool,
}
