//! The community store ("Hive") client (§4.3): a high-latency,
//! occasionally-unavailable remote identity domain the resolver treats as
//! best-effort and never blocks the pipeline on.
//!
//! Every call goes through [`HttpClient::send_with_retry`] under the
//! `community` soft timeout (§5), the same retry/timeout plumbing the
//! resolver's Wikidata/Finnhub/Yahoo steps use.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{
    client::HttpClient,
    error::EngineError,
    net,
    types::{Asset, CurrencySource, EtfHoldingEdge},
};

/// A hit from `lookup_by_alias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasLookup {
    pub isin: String,
    pub source: String,
    pub confidence: f64,
    pub currency: Option<String>,
    pub exchange: Option<String>,
}

/// One page of `sync_identity_domain`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityDomainPage {
    pub assets: Vec<Asset>,
    /// `(ticker, exchange, isin, currency)`.
    pub listings: Vec<(String, String, String, String)>,
    pub aliases: Vec<crate::core::types::Alias>,
    pub has_more: bool,
}

#[derive(Serialize)]
struct ContributeAliasRequest<'a> {
    alias: &'a str,
    isin: &'a str,
    alias_type: &'static str,
    language: Option<&'a str>,
    source: &'a str,
    confidence: f64,
    currency: Option<&'a str>,
    exchange: Option<&'a str>,
    currency_source: Option<&'static str>,
    contributor_hash: Option<&'a str>,
}

/// Client for the community store's typed RPC surface.
#[derive(Clone)]
pub struct HiveClient {
    http: HttpClient,
    base_url: String,
}

impl HiveClient {
    #[must_use]
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    // ---- read surface ---------------------------------------------------

    pub async fn resolve_ticker(
        &self,
        ticker: &str,
        exchange: Option<&str>,
    ) -> Result<Option<String>, EngineError> {
        #[derive(Deserialize)]
        struct Resp {
            isin: Option<String>,
        }
        let mut req = self.http.raw().get(self.url("listings/resolve")).query(&[("ticker", ticker)]);
        if let Some(exch) = exchange {
            req = req.query(&[("exchange", exch)]);
        }
        let resp = net::with_soft_timeout("community", self.community_timeout(), async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        let body = net::get_text(resp, "community").await?;
        let parsed: Resp = serde_json::from_str(&body).map_err(|e| EngineError::Data(e.to_string()))?;
        Ok(parsed.isin)
    }

    pub async fn batch_resolve_tickers(
        &self,
        tickers: &[String],
        chunk: usize,
    ) -> Result<std::collections::HashMap<String, Option<String>>, EngineError> {
        #[derive(Deserialize)]
        struct Resp {
            resolved: std::collections::HashMap<String, Option<String>>,
        }
        let mut out = std::collections::HashMap::new();
        for batch in tickers.chunks(chunk.max(1)) {
            let req = self.http.raw().post(self.url("listings/batch-resolve")).json(&serde_json::json!({
                "tickers": batch,
            }));
            let resp = net::with_soft_timeout("community", self.community_timeout(), async {
                self.http.send_with_retry(req, None).await
            })
            .await?;
            let body = net::get_text(resp, "community").await?;
            let parsed: Resp = serde_json::from_str(&body).map_err(|e| EngineError::Data(e.to_string()))?;
            out.extend(parsed.resolved);
        }
        Ok(out)
    }

    pub async fn lookup_by_alias(&self, alias: &str) -> Result<Option<AliasLookup>, EngineError> {
        let req = self.http.raw().get(self.url("aliases/lookup")).query(&[("alias", alias)]);
        let resp = net::with_soft_timeout("community", self.community_timeout(), async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = net::get_text(resp, "community").await?;
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(None);
        }
        serde_json::from_str(&body).map(Some).map_err(|e| EngineError::Data(e.to_string()))
    }

    pub async fn get_etf_holdings(&self, etf_isin: &str) -> Result<Vec<EtfHoldingEdge>, EngineError> {
        #[derive(Deserialize)]
        struct Resp {
            edges: Vec<EtfHoldingEdge>,
        }
        let req = self.http.raw().get(self.url(&format!("etf-holdings/{etf_isin}")));
        let resp = net::with_soft_timeout("community", self.community_timeout(), async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body = net::get_text(resp, "community").await?;
        let parsed: Resp = serde_json::from_str(&body).map_err(|e| EngineError::Data(e.to_string()))?;
        Ok(parsed.edges)
    }

    pub async fn sync_identity_domain(&self, page: usize) -> Result<IdentityDomainPage, EngineError> {
        let req = self
            .http
            .raw()
            .get(self.url("sync/identity-domain"))
            .query(&[("page_size", page.to_string())]);
        let resp = net::with_soft_timeout("community", self.community_timeout(), async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        let body = net::get_text(resp, "community").await?;
        serde_json::from_str(&body).map_err(|e| EngineError::Data(e.to_string()))
    }

    // ---- write surface (best-effort, never blocks the pipeline) --------

    pub async fn contribute_listing(
        &self,
        ticker: &str,
        exchange: &str,
        isin: &str,
        currency: &str,
    ) -> Result<(), EngineError> {
        let req = self.http.raw().post(self.url("listings/contribute")).json(&serde_json::json!({
            "ticker": ticker, "exchange": exchange, "isin": isin, "currency": currency,
        }));
        let resp = net::with_soft_timeout("community", self.community_timeout(), async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        net::get_text(resp, "community").await.map(|_| ())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn contribute_alias(
        &self,
        alias: &str,
        isin: &str,
        alias_type: crate::core::types::AliasType,
        language: Option<&str>,
        source: &str,
        confidence: f64,
        currency: Option<&str>,
        exchange: Option<&str>,
        currency_source: Option<CurrencySource>,
        contributor_hash: Option<&str>,
    ) -> Result<(), EngineError> {
        use crate::core::types::AliasType;
        let alias_type = match alias_type {
            AliasType::Name => "name",
            AliasType::Abbreviation => "abbreviation",
            AliasType::LocalName => "local_name",
            AliasType::Ticker => "ticker",
        };
        let currency_source = currency_source.map(|s| match s {
            CurrencySource::Explicit => "explicit",
            CurrencySource::Inferred => "inferred",
        });
        let body = ContributeAliasRequest {
            alias,
            isin,
            alias_type,
            language,
            source,
            confidence,
            currency,
            exchange,
            currency_source,
            contributor_hash,
        };
        let req = self.http.raw().post(self.url("aliases/contribute")).json(&body);
        let resp = net::with_soft_timeout("community", self.community_timeout(), async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        net::get_text(resp, "community").await.map(|_| ())
    }

    /// Opt-in contribution of a decomposed ETF's holdings graph, e.g. from
    /// `contribute_holdings_to_hive` on the IPC surface.
    pub async fn contribute_etf_holdings(&self, etf_isin: &str, edges: &[EtfHoldingEdge]) -> Result<(), EngineError> {
        let req = self
            .http
            .raw()
            .post(self.url(&format!("etf-holdings/{etf_isin}/contribute")))
            .json(&serde_json::json!({ "edges": edges }));
        let resp = net::with_soft_timeout("community", self.community_timeout(), async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        net::get_text(resp, "community").await.map(|_| ())
    }

    pub async fn batch_contribute_assets(&self, assets: &[Asset]) -> Result<(), EngineError> {
        let req = self
            .http
            .raw()
            .post(self.url("assets/batch-contribute"))
            .json(&serde_json::json!({ "assets": assets }));
        let resp = net::with_soft_timeout("community", self.community_timeout(), async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        net::get_text(resp, "community").await.map(|_| ())
    }

    fn community_timeout(&self) -> std::time::Duration {
        crate::core::client::Timeouts::default().community
    }
}

/// Deterministic, non-reversible contributor identity for an anonymous
/// write. Derived from a per-install salt so repeated contributions from the
/// same installation dedupe server-side without identifying the user.
#[must_use]
pub fn contributor_hash(install_salt: &str, alias: &str, isin: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(install_salt.as_bytes());
    hasher.update(b"|");
    hasher.update(alias.as_bytes());
    hasher.update(b"|");
    hasher.update(isin.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// When the last sync happened, and whether it's older than `threshold`.
#[must_use]
pub fn is_stale(last_sync: Option<DateTime<Utc>>, threshold: chrono::Duration) -> bool {
    match last_sync {
        Some(t) => Utc::now() - t > threshold,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contributor_hash_is_deterministic_and_salted() {
        let a = contributor_hash("salt-1", "NVIDIA", "US67066G1040");
        let b = contributor_hash("salt-1", "NVIDIA", "US67066G1040");
        let c = contributor_hash("salt-2", "NVIDIA", "US67066G1040");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn no_sync_yet_is_always_stale() {
        assert!(is_stale(None, chrono::Duration::hours(24)));
    }
}
