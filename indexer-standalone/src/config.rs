//! Top-level configuration composed from each component's own `Config` sub-struct
//! (SPEC_FULL.md §10.2), loaded once at startup via [`indexer_common::config::ConfigExt::load`].

use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc_client: rpc_client::infra::http::Config,
    pub event_subscriber: event_subscriber::infra::ws::Config,
    pub postgres: indexer_common::infra::pool::postgres::Config,
    pub broadcast_hub: broadcast_hub::Config,
    pub hub_server: HubServerConfig,
    pub indexer: indexer::Config,
    pub telemetry: indexer_common::telemetry::Config,
}

/// Listen address for the downstream WebSocket protocol the broadcast hub serves (spec.md §6's
/// "Downstream client protocol"). Not named by spec.md's configuration table, which enumerates
/// upstream/storage options only; an address to bind to is the minimal addition needed to
/// actually expose that protocol.
#[derive(Debug, Clone, Deserialize)]
pub struct HubServerConfig {
    #[serde(default = "default_hub_addr")]
    pub addr: SocketAddr,
}

impl Default for HubServerConfig {
    fn default() -> Self {
        Self {
            addr: default_hub_addr(),
        }
    }
}

fn default_hub_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("valid default hub listen addr")
}
