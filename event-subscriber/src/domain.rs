//! Wire shapes produced on the subscriber's internal queue (spec.md §4.2). Loosely typed on
//! purpose: decoding transaction bodies into the store's row shapes is the indexer's job
//! (§4.4.3), not the subscriber's.

use serde::{Deserialize, Serialize};

/// One pushed block, as received from the node's event stream.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BlockEvent {
    pub height: i64,
    pub hash: String,
    pub proposer: String,
    pub time: String,
    pub txs: Vec<TransactionResult>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TransactionResult {
    pub hash: String,
    pub code: i32,
    pub log: String,
    pub gas_used: String,
    pub gas_wanted: String,
    /// Base64-encoded raw transaction body.
    pub raw_tx: String,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub attributes: Vec<EventAttribute>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// Long-lived push connection to the upstream node's event stream.
#[trait_variant::make(Send)]
pub trait Subscriber
where
    Self: Send + 'static,
{
    /// Await the next pushed block. Backed by a bounded internal queue
    /// ([`crate::infra::ws::Config::block_buffer`]): if the consumer is slower than the
    /// producer the producer blocks rather than dropping events. Returns `None` once the
    /// subscriber has been shut down.
    async fn next(&mut self) -> Option<BlockEvent>;
}
