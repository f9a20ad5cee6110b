//! Record store type definitions.
//!
//! Defines [`EmbeddingKind`] (which text of a record was embedded), [`Record`]
//! (a knowledge-base entry) and [`StoredVector`] (a row of the authoritative
//! vector table).

use serde::{Deserialize, Serialize};

/// Which text of a record a vector was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    /// Short summary of the record, or the title when none was given.
    Summary,
    /// Title plus full body. The default ranking signal.
    Content,
}

impl EmbeddingKind {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Content => "content",
        }
    }
}

impl std::fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbeddingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(Self::Summary),
            "content" => Ok(Self::Content),
            _ => Err(format!("unknown embedding kind: {s}")),
        }
    }
}

/// A knowledge-base record, matching the `records` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 last-modification timestamp.
    pub updated_at: String,
}

impl Record {
    /// The text that feeds an embedding of the given kind.
    ///
    /// Records without a summary fall back to their title for [`EmbeddingKind::Summary`].
    pub fn text_for(&self, kind: EmbeddingKind) -> String {
        match kind {
            EmbeddingKind::Summary => self
                .summary
                .clone()
                .unwrap_or_else(|| self.title.clone()),
            EmbeddingKind::Content => format!("{}\n\n{}", self.title, self.content),
        }
    }
}

/// One row of the authoritative `(record_id, kind) -> vector` table.
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub record_id: String,
    pub kind: EmbeddingKind,
    pub vector: Vec<f32>,
    /// Modification time in microseconds since the Unix epoch.
    pub modified_micros: i64,
}
