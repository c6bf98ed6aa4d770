//! [`RpcClient`] implementation talking plain JSON-RPC-over-HTTP to the upstream node, as used
//! by `scripts/pm-18678-investigation` against a local devnet.

use crate::{
    domain::{BlockData, BlockResponse, BlockResultsResponse, Error, RpcClient, Status},
    retry::{self, RateLimiter},
};
use fastrace::trace;
use futures::future::{join_all, try_join};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub url: String,

    #[serde(default = "default_parallel_fetches")]
    pub parallel_fetches: usize,

    /// Per-request deadline; a hung upstream connection fails into the retry path instead of
    /// blocking forever.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    #[serde(default)]
    pub retry: retry::Config,
}

fn default_parallel_fetches() -> usize {
    10
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: "http://localhost:26657".to_string(),
            parallel_fetches: default_parallel_fetches(),
            timeout: default_timeout(),
            retry: retry::Config::default(),
        }
    }
}

#[derive(Clone)]
pub struct HttpRpcClient {
    http: reqwest::Client,
    base_url: String,
    retry_config: retry::Config,
    rate_limiter: Arc<RateLimiter>,
    batch_semaphore: Arc<Semaphore>,
}

impl HttpRpcClient {
    pub fn new(config: Config) -> Result<Self, InvalidConfigError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(InvalidConfigError)?;

        Ok(Self {
            http,
            base_url: config.url,
            rate_limiter: Arc::new(RateLimiter::new(config.retry.requests_per_second)),
            batch_semaphore: Arc::new(Semaphore::new(config.parallel_fetches.max(1))),
            retry_config: config.retry,
        })
    }

    #[trace]
    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: &P,
    ) -> Result<R, Error> {
        self.rate_limiter.acquire().await;

        retry::with_retry(
            &self.retry_config,
            method,
            Error::is_retryable,
            || async { self.call_once(method, params).await },
        )
        .await
    }

    async fn call_once<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: &P,
    ) -> Result<R, Error> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .http
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|source| Error::Transport {
                method,
                source: Box::new(source),
            })?;

        match response.status() {
            status if status.is_success() => {}
            status if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS => {
                return Err(Error::ClientError {
                    method,
                    status: status.as_u16(),
                });
            }
            status => {
                return Err(Error::ServerError {
                    method,
                    status: status.as_u16(),
                });
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| Error::Transport {
                method,
                source: Box::new(source),
            })?;

        let envelope: JsonRpcResponse<R> =
            serde_json::from_slice(&body).map_err(|source| Error::Decode { method, source })?;

        match envelope {
            JsonRpcResponse {
                result: Some(result),
                ..
            } => Ok(result),

            JsonRpcResponse {
                error: Some(error), ..
            } if error.code < 0 && error.code >= -32099 => Err(Error::ServerError {
                method,
                status: 500,
            }),

            JsonRpcResponse { .. } => Err(Error::ClientError { method, status: 404 }),
        }
    }
}

impl RpcClient for HttpRpcClient {
    async fn get_status(&self) -> Result<Status, Error> {
        self.call("status", &()).await
    }

    async fn get_block(&self, height: i64) -> Result<BlockResponse, Error> {
        self.call("block", &BlockParams { height }).await
    }

    async fn get_block_results(&self, height: i64) -> Result<BlockResultsResponse, Error> {
        self.call("block_results", &BlockParams { height }).await
    }

    async fn get_block_batch(
        &self,
        start: i64,
        end: i64,
    ) -> Result<Vec<Option<BlockData>>, Error> {
        let total = (start..=end).count();

        let fetches = (start..=end).map(|height| {
            let client = self.clone();
            async move {
                let _permit = client
                    .batch_semaphore
                    .acquire()
                    .await
                    .expect("semaphore is never closed");

                try_join(client.get_block(height), client.get_block_results(height))
                    .await
                    .map(|(block, block_results)| BlockData {
                        block,
                        block_results,
                    })
            }
        });

        let results = join_all(fetches).await;
        debug_assert_eq!(results.len(), total);

        if total > 0 && results.iter().all(Result::is_err) {
            return Err(results
                .into_iter()
                .find_map(Result::err)
                .expect("at least one error present"));
        }

        Ok(results.into_iter().map(Result::ok).collect())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid rpc-client configuration")]
pub struct InvalidConfigError(#[source] reqwest::Error);

#[derive(Serialize)]
struct BlockParams {
    height: i64,
}

#[derive(Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a P,
}

#[derive(Deserialize)]
struct JsonRpcResponse<R> {
    #[serde(default)]
    result: Option<R>,

    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    #[allow(dead_code)]
    message: String,
}
