use crate::domain::Storage;
use fastrace::trace;
use indexer_common::{
    domain::{
        Block, DexLiquidity, DexSwap, Event, FailedBlock, Height, IndexingStatus, OraclePrice,
        Transaction,
    },
    infra::pool::postgres::PostgresPool,
};
use indoc::indoc;
use sqlx::{Postgres, Row};

/// Postgres based implementation of [`Storage`].
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PostgresPool,
}

impl PostgresStorage {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

impl Storage for PostgresStorage {
    type Tx = sqlx::Transaction<'static, Postgres>;

    #[trace]
    async fn begin_tx(&self) -> Result<Self::Tx, sqlx::Error> {
        self.pool.begin().await
    }

    #[trace]
    async fn commit(&self, tx: Self::Tx) -> Result<(), sqlx::Error> {
        tx.commit().await
    }

    #[trace]
    async fn insert_block(&self, tx: &mut Self::Tx, block: &Block) -> Result<(), sqlx::Error> {
        let query = indoc! {"
            INSERT INTO blocks (
                height, hash, proposer_address, time, tx_count, gas_used, gas_wanted,
                evidence_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (height) DO NOTHING
        "};

        sqlx::query(query)
            .bind(block.height)
            .bind(&block.hash)
            .bind(&block.proposer_address)
            .bind(block.time)
            .bind(block.tx_count)
            .bind(block.gas_used)
            .bind(block.gas_wanted)
            .bind(block.evidence_count)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    #[trace]
    async fn insert_transaction(
        &self,
        tx: &mut Self::Tx,
        transaction: &Transaction,
    ) -> Result<(), sqlx::Error> {
        let query = indoc! {"
            INSERT INTO transactions (
                hash, block_height, tx_index, type, sender, status, code, gas_used,
                gas_wanted, fee_amount, fee_denom, raw_log, time, messages, events
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (hash) DO NOTHING
        "};

        sqlx::query(query)
            .bind(&transaction.hash)
            .bind(transaction.block_height)
            .bind(transaction.tx_index)
            .bind(&transaction.r#type)
            .bind(&transaction.sender)
            .bind(transaction.status)
            .bind(transaction.code)
            .bind(transaction.gas_used)
            .bind(transaction.gas_wanted)
            .bind(&transaction.fee_amount)
            .bind(&transaction.fee_denom)
            .bind(&transaction.raw_log)
            .bind(transaction.time)
            .bind(&transaction.messages)
            .bind(&transaction.events)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    #[trace]
    async fn insert_event(&self, tx: &mut Self::Tx, event: &Event) -> Result<(), sqlx::Error> {
        let query = indoc! {"
            INSERT INTO events (tx_hash, block_height, event_index, event_type, module, attributes)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tx_hash, event_index) DO NOTHING
        "};

        sqlx::query(query)
            .bind(&event.tx_hash)
            .bind(event.block_height)
            .bind(event.event_index)
            .bind(&event.event_type)
            .bind(&event.module)
            .bind(serde_json::to_value(&event.attributes).expect("attributes serialize"))
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    #[trace]
    async fn upsert_account(
        &self,
        tx: &mut Self::Tx,
        address: &str,
        height: Height,
    ) -> Result<(), sqlx::Error> {
        if address.is_empty() {
            return Ok(());
        }

        let query = indoc! {"
            INSERT INTO accounts (address, first_seen_height, last_seen_height)
            VALUES ($1, $2, $2)
            ON CONFLICT (address)
            DO UPDATE SET last_seen_height = $2
            WHERE accounts.last_seen_height < $2
        "};

        sqlx::query(query)
            .bind(address)
            .bind(height)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    #[trace]
    async fn insert_dex_swap(&self, tx: &mut Self::Tx, swap: &DexSwap) -> Result<(), sqlx::Error> {
        let query = indoc! {"
            INSERT INTO dex_swaps (
                tx_hash, event_index, pool_id, sender, token_in, token_out, amount_in,
                amount_out, price, fee, time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (tx_hash, event_index) DO NOTHING
        "};

        sqlx::query(query)
            .bind(&swap.tx_hash)
            .bind(swap.event_index)
            .bind(&swap.pool_id)
            .bind(&swap.sender)
            .bind(&swap.token_in)
            .bind(&swap.token_out)
            .bind(&swap.amount_in)
            .bind(&swap.amount_out)
            .bind(&swap.price)
            .bind(&swap.fee)
            .bind(swap.time)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    #[trace]
    async fn insert_dex_liquidity(
        &self,
        tx: &mut Self::Tx,
        liquidity: &DexLiquidity,
    ) -> Result<(), sqlx::Error> {
        let query = indoc! {"
            INSERT INTO dex_liquidity (
                tx_hash, event_index, pool_id, sender, action, token_a, token_b, amount_a,
                amount_b, time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (tx_hash, event_index) DO NOTHING
        "};

        sqlx::query(query)
            .bind(&liquidity.tx_hash)
            .bind(liquidity.event_index)
            .bind(&liquidity.pool_id)
            .bind(&liquidity.sender)
            .bind(liquidity.action)
            .bind(&liquidity.token_a)
            .bind(&liquidity.token_b)
            .bind(&liquidity.amount_a)
            .bind(&liquidity.amount_b)
            .bind(liquidity.time)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    #[trace]
    async fn insert_oracle_price(
        &self,
        tx: &mut Self::Tx,
        price: &OraclePrice,
    ) -> Result<(), sqlx::Error> {
        let query = indoc! {"
            INSERT INTO oracle_prices (
                tx_hash, event_index, asset, price, timestamp, block_height, source
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tx_hash, event_index) DO NOTHING
        "};

        sqlx::query(query)
            .bind(&price.tx_hash)
            .bind(price.event_index)
            .bind(&price.asset)
            .bind(&price.price)
            .bind(price.timestamp)
            .bind(price.block_height)
            .bind(&price.source)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    #[trace]
    async fn update_last_indexed_height(
        &self,
        tx: &mut Self::Tx,
        height: Height,
    ) -> Result<(), sqlx::Error> {
        let query = indoc! {"
            UPDATE indexing_progress
            SET last_indexed_height = $1, status = 'indexing', updated_at = now()
            WHERE last_indexed_height < $1
        "};

        sqlx::query(query)
            .bind(height)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    #[trace]
    async fn get_last_indexed_height(&self) -> Result<Height, sqlx::Error> {
        let query = indoc! {"
            SELECT last_indexed_height
            FROM indexing_progress
        "};

        let (height,) = sqlx::query_as::<_, (i64,)>(query)
            .fetch_one(&*self.pool)
            .await?;

        Ok(height)
    }

    #[trace]
    async fn save_indexing_progress(
        &self,
        height: Height,
        status: IndexingStatus,
    ) -> Result<(), sqlx::Error> {
        let query = indoc! {"
            UPDATE indexing_progress
            SET last_indexed_height = $1, status = $2, updated_at = now()
        "};

        sqlx::query(query)
            .bind(height)
            .bind(status)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    #[trace]
    async fn save_failed_block(&self, height: Height, error: &str) -> Result<(), sqlx::Error> {
        let query = indoc! {"
            INSERT INTO failed_blocks (height, error, retry_count, last_attempt_at)
            VALUES ($1, $2, 0, now())
            ON CONFLICT (height)
            DO UPDATE SET
                error = $2,
                retry_count = failed_blocks.retry_count + 1,
                last_attempt_at = now()
        "};

        sqlx::query(query)
            .bind(height)
            .bind(error)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }

    #[trace]
    async fn get_failed_blocks(&self, limit: i64) -> Result<Vec<FailedBlock>, sqlx::Error> {
        let query = indoc! {"
            SELECT height, error, retry_count, last_attempt_at
            FROM failed_blocks
            ORDER BY retry_count ASC, height ASC
            LIMIT $1
        "};

        sqlx::query(query)
            .bind(limit)
            .fetch_all(&*self.pool)
            .await?
            .into_iter()
            .map(|row| {
                Ok(FailedBlock {
                    height: row.try_get("height")?,
                    error: row.try_get("error")?,
                    retry_count: row.try_get("retry_count")?,
                    last_attempt_at: row.try_get("last_attempt_at")?,
                })
            })
            .collect()
    }

    #[trace]
    async fn delete_failed_block(&self, height: Height) -> Result<(), sqlx::Error> {
        let query = indoc! {"
            DELETE FROM failed_blocks
            WHERE height = $1
        "};

        sqlx::query(query)
            .bind(height)
            .execute(&*self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_common::{
        domain::TransactionStatus,
        infra::pool::postgres::{Config, PgSslModeConfig},
    };
    use secrecy::SecretString;
    use sqlx::types::chrono::Utc;
    use std::time::Duration;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::postgres::Postgres as PostgresImage;

    async fn test_storage() -> (PostgresStorage, testcontainers::ContainerAsync<PostgresImage>) {
        let container = PostgresImage::default()
            .with_db_name("indexer")
            .with_user("indexer")
            .with_password("indexer")
            .start()
            .await
            .expect("container starts");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("port mapped");

        let config = Config {
            host: "localhost".to_string(),
            port,
            dbname: "indexer".to_string(),
            user: "indexer".to_string(),
            password: SecretString::from("indexer".to_string()),
            sslmode: PgSslModeConfig::Disable,
            max_connections: 10,
            idle_timeout: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(5 * 60),
        };
        let pool = PostgresPool::new(config).await.expect("pool connects");

        indexer_common::infra::migrations::postgres::run(&pool)
            .await
            .expect("migrations run");

        (PostgresStorage::new(pool), container)
    }

    #[tokio::test]
    async fn insert_block_is_idempotent_on_replay() {
        let (storage, _container) = test_storage().await;

        let block = Block {
            height: 1,
            hash: "hash-1".to_string(),
            proposer_address: "proposer".to_string(),
            time: Utc::now(),
            tx_count: 0,
            gas_used: 0,
            gas_wanted: 0,
            evidence_count: 0,
        };

        for _ in 0..2 {
            let mut tx = storage.begin_tx().await.expect("begin");
            storage
                .insert_block(&mut tx, &block)
                .await
                .expect("insert block");
            storage
                .update_last_indexed_height(&mut tx, block.height)
                .await
                .expect("checkpoint advances");
            storage.commit(tx).await.expect("commit");
        }

        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM blocks")
            .fetch_one(&*sqlx_pool_ref(&storage))
            .await
            .expect("count blocks");
        assert_eq!(count, 1);

        let height = storage
            .get_last_indexed_height()
            .await
            .expect("checkpoint read");
        assert_eq!(height, 1);
    }

    #[tokio::test]
    async fn failed_block_retry_count_increments_on_repeated_failure() {
        let (storage, _container) = test_storage().await;

        storage
            .save_failed_block(42, "decode error")
            .await
            .expect("first failure");
        storage
            .save_failed_block(42, "decode error again")
            .await
            .expect("second failure");

        let failed = storage.get_failed_blocks(10).await.expect("list failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].height, 42);
        assert_eq!(failed[0].retry_count, 1);

        storage
            .delete_failed_block(42)
            .await
            .expect("delete succeeds");
        let failed = storage.get_failed_blocks(10).await.expect("list failed");
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn upsert_account_keeps_first_seen_height() {
        let (storage, _container) = test_storage().await;

        let mut tx = storage.begin_tx().await.expect("begin");
        storage
            .upsert_account(&mut tx, "addr1", 10)
            .await
            .expect("first upsert");
        storage
            .upsert_account(&mut tx, "addr1", 20)
            .await
            .expect("second upsert");
        storage.commit(tx).await.expect("commit");

        let row: (i64, i64) =
            sqlx::query_as("SELECT first_seen_height, last_seen_height FROM accounts")
                .fetch_one(&*sqlx_pool_ref(&storage))
                .await
                .expect("fetch account");
        assert_eq!(row, (10, 20));
    }

    #[tokio::test]
    async fn transaction_status_round_trips() {
        let (storage, _container) = test_storage().await;

        let block = Block {
            height: 1,
            hash: "h".to_string(),
            proposer_address: "p".to_string(),
            time: Utc::now(),
            tx_count: 1,
            gas_used: 0,
            gas_wanted: 0,
            evidence_count: 0,
        };
        let transaction = Transaction {
            hash: "tx1".to_string(),
            block_height: 1,
            tx_index: 0,
            r#type: "unknown".to_string(),
            sender: String::new(),
            status: TransactionStatus::from_code(0),
            code: 0,
            gas_used: 0,
            gas_wanted: 0,
            fee_amount: String::new(),
            fee_denom: String::new(),
            raw_log: String::new(),
            time: Utc::now(),
            messages: serde_json::json!([]),
            events: serde_json::json!([]),
        };

        let mut tx = storage.begin_tx().await.expect("begin");
        storage.insert_block(&mut tx, &block).await.expect("block");
        storage
            .insert_transaction(&mut tx, &transaction)
            .await
            .expect("transaction");
        storage.commit(tx).await.expect("commit");

        let (status,): (TransactionStatus,) =
            sqlx::query_as("SELECT status FROM transactions WHERE hash = 'tx1'")
                .fetch_one(&*sqlx_pool_ref(&storage))
                .await
                .expect("fetch status");
        assert_eq!(status, TransactionStatus::Success);
    }

    fn sqlx_pool_ref(storage: &PostgresStorage) -> &PostgresPool {
        &storage.pool
    }
}
