//! The four operations spec.md §4.1 exposes against the upstream node's JSON-RPC, plus the
//! transport-level error classification that drives §7's retry policy.

use serde::{Deserialize, Serialize};
use std::{error::Error as StdError, fmt::Debug};
use thiserror::Error;

/// RPC client abstraction. Implementations own their own retry/rate-limit policy; callers see
/// only the final outcome of each call.
#[trait_variant::make(Send)]
pub trait RpcClient
where
    Self: Clone + Send + Sync + 'static,
{
    /// Tip discovery and health: `status`.
    async fn get_status(&self) -> Result<Status, Error>;

    /// Header, txs (base64), evidence, last commit at `height`: `block`.
    async fn get_block(&self, height: i64) -> Result<BlockResponse, Error>;

    /// Per-transaction `{code, log, gas_used, gas_wanted, events[]}` plus begin/end block
    /// events at `height`: `block_results`.
    async fn get_block_results(&self, height: i64) -> Result<BlockResultsResponse, Error>;

    /// Concurrent fan-out calling [`get_block`](RpcClient::get_block) and
    /// [`get_block_results`](RpcClient::get_block_results) in parallel for each height in
    /// `start..=end`, bounded by `parallel_fetches`. If every height in the range failed (the
    /// node itself is unreachable), the first error is surfaced and the whole batch is
    /// considered fatal. Otherwise a `None` at a given position means that specific height
    /// could not be fetched; the caller records it as a per-height failure and continues with
    /// the rest.
    async fn get_block_batch(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<Option<BlockData>>, Error>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Status {
    pub chain_id: String,
    pub latest_height: i64,
    pub catching_up: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BlockResponse {
    pub height: i64,
    pub hash: String,
    pub proposer_address: String,
    pub time: String,
    /// Base64-encoded transaction bodies, in block order.
    pub txs: Vec<String>,
    pub evidence_count: i32,
    pub last_commit_round: i32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BlockResultsResponse {
    pub height: i64,
    pub tx_results: Vec<TxResult>,
    pub begin_block_events: Vec<RpcEvent>,
    pub end_block_events: Vec<RpcEvent>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TxResult {
    pub code: i32,
    pub log: String,
    pub gas_used: String,
    pub gas_wanted: String,
    pub events: Vec<RpcEvent>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RpcEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub attributes: Vec<RpcEventAttribute>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RpcEventAttribute {
    pub key: String,
    pub value: String,
}

/// Everything the indexer needs to index one height, assembled from one [`get_block`] and one
/// [`get_block_results`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockData {
    pub block: BlockResponse,
    pub block_results: BlockResultsResponse,
}

/// Transport-level error returned by an [`RpcClient`]. Non-2xx responses are retried unless the
/// caller's deadline has passed; 4xx responses are terminal (spec.md §4.1's "Failure
/// semantics").
#[derive(Debug, Error)]
pub enum Error {
    #[error("request to {method} failed")]
    Transport {
        method: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("{method} returned client error status {status}")]
    ClientError { method: &'static str, status: u16 },

    #[error("{method} returned server error status {status}")]
    ServerError { method: &'static str, status: u16 },

    #[error("cannot decode response for {method}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{method} exhausted {attempts} retry attempts")]
    RetriesExhausted {
        method: &'static str,
        attempts: u32,
    },

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this call should be retried rather than treated as terminal, per spec.md §4.1:
    /// network errors, 5xx and decode errors are retried; 4xx are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::ServerError { .. } | Error::Decode { .. }
        )
    }
}
