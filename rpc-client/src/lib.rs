//! Request/retry/rate-limit wrapper around the upstream node's JSON-RPC.

pub mod domain;
pub mod infra;
pub mod retry;

pub use domain::{BlockData, BlockResponse, BlockResultsResponse, Error, RpcClient, Status};
