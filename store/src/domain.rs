//! Persistence abstraction (spec.md §4.3). One DB transaction spans a whole block's derived
//! rows; callers explicitly [`Storage::begin_tx`] and [`Storage::commit`] around a sequence of
//! inserts so the indexer can build up one atomic unit across many tables.

use indexer_common::domain::{
    Block, DexLiquidity, DexSwap, Event, FailedBlock, Height, IndexingStatus, OraclePrice,
    Transaction,
};

/// Storage abstraction.
#[trait_variant::make(Send)]
pub trait Storage
where
    Self: Clone + Send + Sync + 'static,
{
    /// The in-flight transaction handle threaded through one block's worth of inserts.
    type Tx: Send;

    /// Begin a new transaction with explicit `commit`; dropping `tx` without committing rolls
    /// back.
    async fn begin_tx(&self) -> Result<Self::Tx, sqlx::Error>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), sqlx::Error>;

    async fn insert_block(&self, tx: &mut Self::Tx, block: &Block) -> Result<(), sqlx::Error>;

    async fn insert_transaction(
        &self,
        tx: &mut Self::Tx,
        transaction: &Transaction,
    ) -> Result<(), sqlx::Error>;

    async fn insert_event(&self, tx: &mut Self::Tx, event: &Event) -> Result<(), sqlx::Error>;

    async fn upsert_account(
        &self,
        tx: &mut Self::Tx,
        address: &str,
        height: Height,
    ) -> Result<(), sqlx::Error>;

    async fn insert_dex_swap(&self, tx: &mut Self::Tx, swap: &DexSwap) -> Result<(), sqlx::Error>;

    async fn insert_dex_liquidity(
        &self,
        tx: &mut Self::Tx,
        liquidity: &DexLiquidity,
    ) -> Result<(), sqlx::Error>;

    async fn insert_oracle_price(
        &self,
        tx: &mut Self::Tx,
        price: &OraclePrice,
    ) -> Result<(), sqlx::Error>;

    /// Advance the checkpoint within the same transaction as the block it refers to.
    async fn update_last_indexed_height(
        &self,
        tx: &mut Self::Tx,
        height: Height,
    ) -> Result<(), sqlx::Error>;

    /// Read the durable checkpoint. `0` if nothing has ever been indexed.
    async fn get_last_indexed_height(&self) -> Result<Height, sqlx::Error>;

    /// Set the checkpoint and status outside of a block transaction, e.g. to mark
    /// `complete`/`error` at phase boundaries.
    async fn save_indexing_progress(
        &self,
        height: Height,
        status: IndexingStatus,
    ) -> Result<(), sqlx::Error>;

    /// Record that `height` could not be indexed, in its own small transaction so a single
    /// failure never aborts the batch it belongs to.
    async fn save_failed_block(&self, height: Height, error: &str) -> Result<(), sqlx::Error>;

    /// Failed heights ordered by ascending retry count, for the retry sweeper
    /// (SPEC_FULL.md §10.8).
    async fn get_failed_blocks(&self, limit: i64) -> Result<Vec<FailedBlock>, sqlx::Error>;

    async fn delete_failed_block(&self, height: Height) -> Result<(), sqlx::Error>;
}
