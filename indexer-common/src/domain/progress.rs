use derive_more::Display;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};

/// Singleton row used as the durable checkpoint: the resumption point after restart.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexingProgress {
    pub last_indexed_height: i64,
    pub status: IndexingStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IndexingStatus {
    Idle,
    Indexing,
    Complete,
    Error,
}
