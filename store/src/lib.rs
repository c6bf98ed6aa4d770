//! Schema, connection pool and transactional batch writes for blocks, transactions, events and
//! module-specific tables (spec.md §4.3). Idempotent upserts keyed by natural identifiers.

pub mod domain;
pub mod infra;

pub use domain::Storage;
pub use infra::postgres::PostgresStorage;
