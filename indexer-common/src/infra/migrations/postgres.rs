use crate::infra::pool::postgres::PostgresPool;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Run the database migrations for Postgres. The store requires migrations to have run before
/// the process starts serving traffic; this is invoked once during startup wiring.
pub async fn run(pool: &PostgresPool) -> Result<(), Error> {
    sqlx::migrate!("migrations/postgres").run(&**pool).await?;
    Ok(())
}

/// Error possibly returned by [`run`].
#[derive(Debug, Error)]
#[error("cannot run migrations for postgres")]
pub struct Error(#[from] MigrateError);

#[cfg(test)]
mod tests {
    use super::run;
    use crate::infra::pool::postgres::{Config, PgSslModeConfig, PostgresPool};
    use anyhow::Context;
    use secrecy::SecretString;
    use std::{collections::HashSet, error::Error as StdError, time::Duration};
    use testcontainers::{ImageExt, runners::AsyncRunner};
    use testcontainers_modules::postgres::Postgres;

    #[tokio::test]
    async fn test_run() -> Result<(), Box<dyn StdError>> {
        let postgres_container = Postgres::default()
            .with_db_name("indexer")
            .with_user("indexer")
            .with_password("indexer")
            .with_tag("17.1-alpine")
            .start()
            .await
            .context("start Postgres container")?;
        let postgres_port = postgres_container
            .get_host_port_ipv4(5432)
            .await
            .context("get Postgres port")?;

        let config = Config {
            host: "localhost".to_string(),
            port: postgres_port,
            dbname: "indexer".to_string(),
            user: "indexer".to_string(),
            password: SecretString::from("indexer".to_string()),
            sslmode: PgSslModeConfig::Disable,
            max_connections: 10,
            idle_timeout: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(5 * 60),
        };
        let pool = PostgresPool::new(config).await?;

        let result = run(&pool).await;
        assert!(result.is_ok());

        let table_names: HashSet<String> = sqlx::query_scalar(
            "SELECT tablename FROM pg_catalog.pg_tables WHERE schemaname = 'public'",
        )
        .fetch_all(&*pool)
        .await?
        .into_iter()
        .collect();

        for table in [
            "blocks",
            "transactions",
            "events",
            "accounts",
            "dex_swaps",
            "dex_liquidity",
            "oracle_prices",
            "failed_blocks",
            "indexing_progress",
        ] {
            assert!(table_names.contains(table), "missing table {table}");
        }

        Ok(())
    }
}
