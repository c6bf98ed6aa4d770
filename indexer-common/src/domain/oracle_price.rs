use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};

/// One row per emitted `oracle_price_update` event. `(tx_hash, event_index)` is the natural key
/// used to make re-indexing a height idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OraclePrice {
    pub tx_hash: String,
    pub event_index: i32,
    pub asset: String,
    pub price: String,
    pub timestamp: DateTime<Utc>,
    pub block_height: i64,
    pub source: String,
}
