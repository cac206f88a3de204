//! Finnhub lookups (§4.4 step 7b): one call using the primary ticker variant
//! only, gated by a token bucket sized to the provider's free tier (§5).

use std::{num::NonZeroU32, sync::Arc};

use governor::{Quota, RateLimiter, clock::DefaultClock, state::{InMemoryState, NotKeyed}};
use nonzero_ext::nonzero;
use serde::Deserialize;

use crate::core::{client::HttpClient, error::EngineError, net};

type Bucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Deserialize)]
struct SymbolLookupResponse {
    result: Vec<SymbolLookupEntry>,
}

#[derive(Debug, Deserialize)]
struct SymbolLookupEntry {
    symbol: String,
    #[serde(default)]
    isin: Option<String>,
}

/// Client over the Finnhub quote/symbol-lookup API, rate-limited with an
/// in-memory token bucket. Exceeding the bucket converts remaining attempts
/// into misses for the run rather than queuing or erroring (§5, §8 scenario
/// 6: "Rate-limited Finnhub").
pub struct FinnhubClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
    timeout: std::time::Duration,
    bucket: Arc<Bucket>,
}

impl FinnhubClient {
    #[must_use]
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: std::time::Duration,
        calls_per_minute: u32,
    ) -> Self {
        let quota = NonZeroU32::new(calls_per_minute)
            .map(Quota::per_minute)
            .unwrap_or_else(|| Quota::per_minute(nonzero!(60u32)));
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout,
            bucket: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// `None` if the bucket is exhausted (treated as a miss, not an error)
    /// or the lookup found nothing; `Some(isin)` on a hit.
    pub async fn resolve(&self, primary_ticker: &str) -> Result<Option<String>, EngineError> {
        if primary_ticker.is_empty() {
            return Ok(None);
        }
        if self.bucket.check().is_err() {
            return Ok(None);
        }
        let req = self
            .http
            .raw()
            .get(format!("{}/search", self.base_url.trim_end_matches('/')))
            .query(&[("q", primary_ticker), ("token", self.api_key.as_str())]);
        let resp = net::with_soft_timeout("finnhub", self.timeout, async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        let body = net::get_text(resp, "finnhub").await?;
        let parsed: SymbolLookupResponse =
            serde_json::from_str(&body).map_err(|e| EngineError::Data(e.to_string()))?;
        Ok(parsed
            .result
            .into_iter()
            .find(|e| e.symbol.eq_ignore_ascii_case(primary_ticker))
            .and_then(|e| e.isin)
            .filter(|isin| crate::core::isin::has_valid_shape(isin)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ticker_short_circuits_without_consuming_the_bucket() {
        let client = FinnhubClient::new(
            HttpClient::new("test"),
            "https://finnhub.io/api/v1",
            "key",
            std::time::Duration::from_secs(1),
            1,
        );
        assert!(client.bucket.check().is_ok());
    }
}
