use sqlx::types::chrono::{DateTime, Utc};

/// A specific height that could not be indexed, recorded for later retry without blocking
/// progress. `height` is the natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedBlock {
    pub height: i64,
    pub error: String,
    pub retry_count: i32,
    pub last_attempt_at: DateTime<Utc>,
}
