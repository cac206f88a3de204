//! Yahoo-class fallback lookups (§4.4 step 7c): top-2 ticker variants only,
//! tried in order, lowest confidence rung on the ladder.

use serde::Deserialize;

use crate::core::{client::HttpClient, error::EngineError, net};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    quotes: Vec<SearchQuote>,
}

#[derive(Debug, Deserialize)]
struct SearchQuote {
    symbol: String,
    #[serde(default)]
    isin: Option<String>,
}

/// Thin client over a Yahoo-style ticker search endpoint, used only as a
/// last-resort fallback after Wikidata and Finnhub both miss.
pub struct YahooClient {
    http: HttpClient,
    base_url: String,
    timeout: std::time::Duration,
}

impl YahooClient {
    #[must_use]
    pub fn new(http: HttpClient, base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self { http, base_url: base_url.into(), timeout }
    }

    /// Tries each of `variants` (already capped to the top 2 by the caller)
    /// in order, returning the first hit.
    pub async fn resolve(&self, variants: &[String]) -> Result<Option<String>, EngineError> {
        for variant in variants.iter().take(2) {
            if let Some(isin) = self.resolve_one(variant).await? {
                return Ok(Some(isin));
            }
        }
        Ok(None)
    }

    async fn resolve_one(&self, ticker: &str) -> Result<Option<String>, EngineError> {
        let req = self
            .http
            .raw()
            .get(format!("{}/v1/finance/search", self.base_url.trim_end_matches('/')))
            .query(&[("q", ticker)]);
        let resp = net::with_soft_timeout("yahoo", self.timeout, async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        let body = net::get_text(resp, "yahoo").await?;
        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| EngineError::Data(e.to_string()))?;
        Ok(parsed
            .quotes
            .into_iter()
            .find(|q| q.symbol.eq_ignore_ascii_case(ticker))
            .and_then(|q| q.isin)
            .filter(|isin| crate::core::isin::has_valid_shape(isin)))
    }
}
