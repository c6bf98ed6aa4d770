//! Exponential backoff retry and a token-bucket rate limiter, applied around every call an
//! [`crate::infra::http::HttpRpcClient`] makes against the upstream node.

use log::warn;
use serde::Deserialize;
use std::{future::Future, time::Duration};
use tokio::{
    sync::Mutex,
    time::{Instant, sleep},
};

/// Retry policy: up to `attempts` tries per call, doubling the delay from `initial_delay` and
/// capping it at `max_delay`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_requests_per_second() -> u32 {
    10
}

/// Runs `f` up to `config.attempts` times, doubling the delay between attempts (capped at
/// `config.max_delay`), and retrying only while `is_retryable` holds for the returned error. The
/// final attempt's error, if any, is returned as-is.
pub async fn with_retry<T, E, Fut>(
    config: &Config,
    method: &'static str,
    is_retryable: impl Fn(&E) -> bool,
    mut f: impl FnMut() -> Fut,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = config.initial_delay;

    for attempt in 1..=config.attempts {
        match f().await {
            Ok(value) => return Ok(value),

            Err(error) if attempt < config.attempts && is_retryable(&error) => {
                warn!(method, attempt, delay:? ; "retrying after error");
                sleep(delay).await;
                delay = (delay * 2).min(config.max_delay);
            }

            Err(error) => return Err(error),
        }
    }

    unreachable!("loop always returns on its last iteration")
}

/// A simple token-bucket limiter: at most `requests_per_second` permits are handed out per
/// second, refilled continuously. Shared via `Arc` across concurrent callers.
pub struct RateLimiter {
    state: Mutex<State>,
    capacity: f64,
    refill_per_sec: f64,
}

struct State {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let capacity = requests_per_second.max(1) as f64;

        Self {
            state: Mutex::new(State {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: capacity,
        }
    }

    /// Blocks until a token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;

                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64(
                        (1.0 - state.tokens) / self.refill_per_sec,
                    ))
                }
            };

            match wait {
                None => return,
                Some(wait) => sleep(wait).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let config = Config::default();
        let calls = AtomicU32::new(0);

        let result = with_retry(&config, "test", |_: &&str| true, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(42)
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let config = Config {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Config::default()
        };
        let calls = AtomicU32::new(0);

        let result = with_retry(&config, "test", |_: &&str| true, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("transient")
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_retrying_on_non_retryable_error() {
        let config = Config::default();
        let calls = AtomicU32::new(0);

        let result = with_retry(&config, "test", |_: &&str| false, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>("terminal")
        })
        .await;

        assert_eq!(result, Err("terminal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_all_attempts() {
        let config = Config {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..Config::default()
        };
        let calls = AtomicU32::new(0);

        let result = with_retry(&config, "test", |_: &&str| true, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>("still failing")
        })
        .await;

        assert_eq!(result, Err("still failing"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
