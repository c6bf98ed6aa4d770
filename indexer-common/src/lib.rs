//! Shared foundation for the indexing pipeline: domain primitives used by more than one
//! component, the Postgres pool wrapper, the migration runner, layered configuration loading
//! and logging/tracing bootstrap.

pub mod config;
pub mod domain;
pub mod infra;
pub mod telemetry;
