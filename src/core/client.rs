//! Shared HTTP client plumbing: one `reqwest::Client`, a retry policy with
//! exponential backoff, and the soft per-endpoint timeouts from §5.
//!
//! Every external caller (Hive client, resolver providers, adapters) goes
//! through [`HttpClient::send_with_retry`] so that retry/backoff/timeout
//! behavior is uniform across the engine, the same way the teacher crate
//! centralizes it in one client rather than duplicating it per endpoint.

use std::time::Duration;

use rand::Rng as _;
use reqwest::{Client, RequestBuilder};

use super::error::EngineError;

/// Backoff strategy between retry attempts.
#[derive(Clone, Debug)]
pub enum Backoff {
    Fixed(Duration),
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Backoff {
    fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(d) => *d,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scaled = base.as_secs_f64() * factor.powi(attempt as i32);
                let capped = scaled.min(max.as_secs_f64());
                let with_jitter = if *jitter {
                    let mut rng = rand::rng();
                    let spread = rng.random_range(0.5..1.5);
                    capped * spread
                } else {
                    capped
                };
                Duration::from_secs_f64(with_jitter.max(0.0))
            }
        }
    }
}

/// Retry policy shared by every outbound call. `max_retries` is additional
/// attempts beyond the first, so total attempts = `max_retries + 1`.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub backoff: Backoff,
    pub retry_on_status: Vec<u16>,
    pub retry_on_timeout: bool,
    pub retry_on_connect: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(150),
                factor: 2.0,
                max: Duration::from_secs(2),
                jitter: true,
            },
            retry_on_status: vec![408, 429, 500, 502, 503, 504],
            retry_on_timeout: true,
            retry_on_connect: true,
        }
    }
}

/// Per-endpoint soft timeouts (§5: Wikidata 8s, Finnhub 4s, Yahoo 6s,
/// community RPC 3s, adapter 15s).
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub wikidata: Duration,
    pub finnhub: Duration,
    pub yahoo: Duration,
    pub community: Duration,
    pub adapter: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            wikidata: Duration::from_secs(8),
            finnhub: Duration::from_secs(4),
            yahoo: Duration::from_secs(6),
            community: Duration::from_secs(3),
            adapter: Duration::from_secs(15),
        }
    }
}

/// A thin wrapper around `reqwest::Client` that applies [`RetryConfig`] to
/// every call. Cheap to clone (internally an `Arc`-backed `reqwest::Client`).
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: Client,
    retry: RetryConfig,
}

impl HttpClient {
    #[must_use]
    pub fn new(user_agent: &str) -> Self {
        Self::with_retry(user_agent, RetryConfig::default())
    }

    #[must_use]
    pub fn with_retry(user_agent: &str, retry: RetryConfig) -> Self {
        let http = Client::builder()
            .user_agent(user_agent.to_string())
            .build()
            .expect("reqwest client builder with static config never fails");
        Self { http, retry }
    }

    #[must_use]
    pub fn raw(&self) -> &Client {
        &self.http
    }

    /// Send `req`, retrying per `override_cfg` (or the client's default
    /// policy) on transient failures. The builder must be cheaply cloneable
    /// via [`RequestBuilder::try_clone`]; callers with a streaming body
    /// should pass `retry.enabled = false`.
    pub async fn send_with_retry(
        &self,
        req: RequestBuilder,
        override_cfg: Option<&RetryConfig>,
    ) -> Result<reqwest::Response, EngineError> {
        let cfg = override_cfg.unwrap_or(&self.retry);
        if !cfg.enabled {
            return req.send().await.map_err(EngineError::Http);
        }

        let mut attempt = 0;
        loop {
            let Some(cloned) = req.try_clone() else {
                return req.send().await.map_err(EngineError::Http);
            };
            match cloned.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < cfg.max_retries && cfg.retry_on_status.contains(&status) {
                        tokio::time::sleep(cfg.backoff.delay_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    let should_retry = attempt < cfg.max_retries
                        && ((cfg.retry_on_timeout && err.is_timeout())
                            || (cfg.retry_on_connect && err.is_connect()));
                    if should_retry {
                        tokio::time::sleep(cfg.backoff.delay_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(EngineError::Http(err));
                }
            }
        }
    }
}
