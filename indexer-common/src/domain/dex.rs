use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};

/// One row per emitted `swap` event. `(tx_hash, event_index)` is the natural key used to make
/// re-indexing a height idempotent, mirroring the key used for the event it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexSwap {
    pub tx_hash: String,
    pub event_index: i32,
    pub pool_id: String,
    pub sender: String,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: String,
    pub amount_out: String,
    pub price: String,
    pub fee: String,
    pub time: DateTime<Utc>,
}

/// One row per emitted `add_liquidity` or `remove_liquidity` event. Not named in spec.md's
/// data model but present in its hub topic list (`dex_liquidity`) and event recognition rules;
/// supplemented here so the topic has a row to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LiquidityAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexLiquidity {
    pub tx_hash: String,
    pub event_index: i32,
    pub pool_id: String,
    pub sender: String,
    pub action: LiquidityAction,
    pub token_a: String,
    pub token_b: String,
    pub amount_a: String,
    pub amount_b: String,
    pub time: DateTime<Utc>,
}
