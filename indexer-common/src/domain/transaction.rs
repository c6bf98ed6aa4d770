use derive_more::Display;
use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};

/// A transaction within a block, with its decoded module-agnostic summary and the raw messages
/// and events preserved as opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub block_height: i64,
    pub tx_index: i32,
    pub r#type: String,
    pub sender: String,
    pub status: TransactionStatus,
    pub code: i32,
    pub gas_used: i64,
    pub gas_wanted: i64,
    pub fee_amount: String,
    pub fee_denom: String,
    pub raw_log: String,
    pub time: DateTime<Utc>,
    pub messages: serde_json::Value,
    pub events: serde_json::Value,
}

/// `status = "success" ⇔ code = 0`, enforced at construction rather than by separately setting
/// both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        }
    }
}
