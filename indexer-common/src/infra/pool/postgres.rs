use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::{
    ConnectOptions,
    postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode},
};
use std::{ops::Deref, time::Duration};

/// Configuration for the Postgres connection pool, with defaults matching spec.md §6's
/// deployment-specific and sized-per-deployment knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub dbname: String,
    pub user: String,
    pub password: SecretString,

    #[serde(default = "default_sslmode")]
    pub sslmode: PgSslModeConfig,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_max_lifetime")]
    pub max_lifetime: Duration,
}

/// Serde-friendly mirror of [`PgSslMode`]; sqlx's own type does not implement [`Deserialize`].
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PgSslModeConfig {
    Disable,
    Allow,
    Prefer,
    Require,
}

impl From<PgSslModeConfig> for PgSslMode {
    fn from(mode: PgSslModeConfig) -> Self {
        match mode {
            PgSslModeConfig::Disable => PgSslMode::Disable,
            PgSslModeConfig::Allow => PgSslMode::Allow,
            PgSslModeConfig::Prefer => PgSslMode::Prefer,
            PgSslModeConfig::Require => PgSslMode::Require,
        }
    }
}

fn default_port() -> u16 {
    5432
}

fn default_sslmode() -> PgSslModeConfig {
    PgSslModeConfig::Prefer
}

fn default_max_connections() -> u32 {
    10
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_lifetime() -> Duration {
    Duration::from_secs(5 * 60)
}

/// A cloneable handle to a Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PostgresPool(PgPool);

impl PostgresPool {
    pub async fn new(config: Config) -> Result<Self, sqlx::Error> {
        let Config {
            host,
            port,
            dbname,
            user,
            password,
            sslmode,
            max_connections,
            idle_timeout,
            max_lifetime,
        } = config;

        let connect_options = PgConnectOptions::new()
            .host(&host)
            .port(port)
            .database(&dbname)
            .username(&user)
            .password(password.expose_secret())
            .ssl_mode(sslmode.into())
            .disable_statement_logging();

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(idle_timeout)
            .max_lifetime(max_lifetime)
            .connect_with(connect_options)
            .await?;

        Ok(Self(pool))
    }
}

impl Deref for PostgresPool {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
