pub mod domain;
pub mod infra;

pub use domain::{ClientFrame, ClientId, Message, ServerFrame, Topic, Transport, TransportError};
pub use infra::axum_ws::{AxumTransport, upgrade};
pub use infra::hub::{Config, HubHandle, spawn};
