use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};

/// A committed ledger entry from the upstream consensus node, identified by a monotonically
/// increasing height. Created once per height; immutable after commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: i64,
    pub hash: String,
    pub proposer_address: String,
    pub time: DateTime<Utc>,
    pub tx_count: i32,
    pub gas_used: i64,
    pub gas_wanted: i64,
    pub evidence_count: i32,
}

/// Natural identifier of the highest stored block, cheap to fetch on startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub height: i64,
}
