//! Long-lived push channel subscribed to new-block events on the upstream node (spec.md §4.2).

pub mod domain;
pub mod infra;

pub use domain::{BlockEvent, Event, EventAttribute, Subscriber, TransactionResult};
pub use infra::ws::WsSubscriber;
