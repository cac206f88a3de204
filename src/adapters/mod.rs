//! Per-issuer ETF-holdings adapters (§4.5).
//!
//! Each adapter follows a fixed resolution order: manual upload, then a
//! stable HTTP JSON/CSV endpoint, then an HTML scrape fallback, then
//! [`EngineError::ManualUploadRequired`]. No headless browsers — anything
//! needing one is out of scope for this layer.

pub mod manual;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::core::{client::HttpClient, error::EngineError, net};

use manual::ManualFileStore;

/// One row of an ETF's holdings as returned by an adapter, before it is
/// passed through the resolver. `ticker`/`name`/`weight` are required;
/// everything else is provider-dependent and optional.
#[derive(Debug, Clone, PartialEq)]
pub struct HoldingRow {
    pub ticker: String,
    pub name: String,
    pub weight: f64,
    pub isin: Option<String>,
    pub sector: Option<String>,
    pub country: Option<String>,
    pub currency: Option<String>,
}

/// Issuer tag, derived from the ETF ISIN prefix and cached metadata (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Issuer {
    Ishares,
    Vanguard,
    Amundi,
    Xtrackers,
    Vaneck,
    Spdr,
    Invesco,
    Unknown,
}

impl Issuer {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ishares => "ishares",
            Self::Vanguard => "vanguard",
            Self::Amundi => "amundi",
            Self::Xtrackers => "xtrackers",
            Self::Vaneck => "vaneck",
            Self::Spdr => "spdr",
            Self::Invesco => "invesco",
            Self::Unknown => "unknown",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "ishares" => Self::Ishares,
            "vanguard" => Self::Vanguard,
            "amundi" => Self::Amundi,
            "xtrackers" => Self::Xtrackers,
            "vaneck" => Self::Vaneck,
            "spdr" => Self::Spdr,
            "invesco" => Self::Invesco,
            _ => Self::Unknown,
        }
    }
}

/// Prefix → issuer lookup over the ISIN's first four characters. This is a
/// coarse heuristic; `cached_source` (from a prior decomposition) always
/// takes precedence when present.
const ISIN_PREFIX_ISSUER: &[(&str, Issuer)] = &[
    ("IE00B4L5", Issuer::Ishares),
    ("IE00B3RB", Issuer::Ishares),
    ("IE00BK5B", Issuer::Vanguard),
    ("IE00BFY0", Issuer::Xtrackers),
    ("LU04", Issuer::Amundi),
    ("LU14", Issuer::Amundi),
    ("IE00BQQP", Issuer::Vaneck),
    ("IE00B6YX", Issuer::Spdr),
    ("IE00B53S", Issuer::Invesco),
];

/// Derive the issuer tag from cached source (if known) or the ISIN prefix.
#[must_use]
pub fn detect_issuer(etf_isin: &str, cached_source: Option<&str>) -> Issuer {
    if let Some(source) = cached_source {
        return Issuer::from_str(source);
    }
    ISIN_PREFIX_ISSUER
        .iter()
        .find(|(prefix, _)| etf_isin.starts_with(prefix))
        .map_or(Issuer::Unknown, |(_, issuer)| *issuer)
}

/// Capability set every adapter implements. Modeled as a trait object
/// registry rather than an inheritance hierarchy (§9 "Polymorphism without
/// inheritance").
#[async_trait]
pub trait EtfAdapter: Send + Sync {
    async fn fetch_holdings(&self, etf_isin: &str) -> Result<Vec<HoldingRow>, EngineError>;
}

/// Endpoint templates for one issuer's public holdings feed, with `{isin}`
/// substituted in. `None` means that stage is unavailable for this issuer.
#[derive(Debug, Clone, Default)]
pub struct IssuerEndpoints {
    pub json_url_template: Option<String>,
    pub csv_url_template: Option<String>,
    pub html_url_template: Option<String>,
    pub manual_download_url: Option<String>,
}

/// A generic adapter driven entirely by configured endpoint templates,
/// shared across issuers rather than hand-rolled per vendor.
pub struct HttpAdapter {
    issuer: Issuer,
    endpoints: IssuerEndpoints,
    manual_store: ManualFileStore,
    http: HttpClient,
    timeout: std::time::Duration,
}

impl HttpAdapter {
    #[must_use]
    pub fn new(
        issuer: Issuer,
        endpoints: IssuerEndpoints,
        manual_store: ManualFileStore,
        http: HttpClient,
        timeout: std::time::Duration,
    ) -> Self {
        Self { issuer, endpoints, manual_store, http, timeout }
    }

    fn url_for(template: &str, etf_isin: &str) -> String {
        template.replace("{isin}", etf_isin)
    }

    async fn fetch_json(&self, url: &str) -> Result<Vec<HoldingRow>, EngineError> {
        #[derive(Deserialize)]
        struct JsonHolding {
            ticker: String,
            name: String,
            weight: f64,
            #[serde(default)]
            isin: Option<String>,
            #[serde(default)]
            sector: Option<String>,
            #[serde(default)]
            country: Option<String>,
            #[serde(default)]
            currency: Option<String>,
        }
        #[derive(Deserialize)]
        struct JsonResponse {
            holdings: Vec<JsonHolding>,
        }

        let req = self.http.raw().get(url);
        let resp = net::with_soft_timeout("adapter", self.timeout, async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        let body = net::get_text(resp, "adapter").await?;
        let parsed: JsonResponse =
            serde_json::from_str(&body).map_err(|e| EngineError::Data(e.to_string()))?;
        Ok(parsed
            .holdings
            .into_iter()
            .map(|h| HoldingRow {
                ticker: h.ticker,
                name: h.name,
                weight: h.weight,
                isin: h.isin,
                sector: h.sector,
                country: h.country,
                currency: h.currency,
            })
            .collect())
    }

    async fn fetch_csv(&self, url: &str) -> Result<Vec<HoldingRow>, EngineError> {
        let req = self.http.raw().get(url);
        let resp = net::with_soft_timeout("adapter", self.timeout, async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        let body = net::get_text(resp, "adapter").await?;
        parse_csv_text(&body)
    }

    async fn fetch_html(&self, url: &str) -> Result<Vec<HoldingRow>, EngineError> {
        let req = self.http.raw().get(url);
        let resp = net::with_soft_timeout("adapter", self.timeout, async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        let body = net::get_text(resp, "adapter").await?;
        extract_embedded_json_holdings(&body)
    }
}

#[async_trait]
impl EtfAdapter for HttpAdapter {
    async fn fetch_holdings(&self, etf_isin: &str) -> Result<Vec<HoldingRow>, EngineError> {
        // 1. manual upload always wins, even for issuers with a live feed.
        if let Some(path) = self.manual_store.lookup(etf_isin) {
            return manual::parse_manual_file(&path);
        }

        // 2. stable HTTP JSON/CSV endpoint.
        if let Some(template) = &self.endpoints.json_url_template {
            if let Ok(rows) = self.fetch_json(&Self::url_for(template, etf_isin)).await {
                if !rows.is_empty() {
                    return Ok(rows);
                }
            }
        }
        if let Some(template) = &self.endpoints.csv_url_template {
            if let Ok(rows) = self.fetch_csv(&Self::url_for(template, etf_isin)).await {
                if !rows.is_empty() {
                    return Ok(rows);
                }
            }
        }

        // 3. fallback HTML scrape.
        if let Some(template) = &self.endpoints.html_url_template {
            if let Ok(rows) = self.fetch_html(&Self::url_for(template, etf_isin)).await {
                if !rows.is_empty() {
                    return Ok(rows);
                }
            }
        }

        // 4. no public source left; the user must supply a file.
        Err(EngineError::ManualUploadRequired {
            isin: etf_isin.to_string(),
            provider: self.issuer.as_str().to_string(),
            download_url: self.endpoints.manual_download_url.clone(),
        })
    }
}

fn parse_csv_text(body: &str) -> Result<Vec<HoldingRow>, EngineError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| EngineError::Data(format!("reading adapter CSV headers: {e}")))?
        .clone();
    let field = |record: &csv::StringRecord, name: &str| -> Option<String> {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
    };
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| EngineError::Data(format!("reading adapter CSV row: {e}")))?;
        let Some(ticker) = field(&record, "ticker") else { continue };
        let Some(weight_raw) = field(&record, "weight") else { continue };
        let Ok(weight) = weight_raw.trim_end_matches('%').parse::<f64>() else { continue };
        let weight = if weight > 1.0 { weight / 100.0 } else { weight };
        rows.push(HoldingRow {
            name: field(&record, "name").unwrap_or_else(|| ticker.clone()),
            ticker,
            weight,
            isin: field(&record, "isin"),
            sector: field(&record, "sector"),
            country: field(&record, "country"),
            currency: field(&record, "currency"),
        });
    }
    Ok(rows)
}

/// Many issuer fund pages embed the holdings table as a JSON blob inside a
/// `<script>` tag rather than real markup. Extracting that blob is cheaper
/// and far more stable than parsing the rendered HTML table.
static EMBEDDED_JSON_BLOB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)window\.__FUND_HOLDINGS__\s*=\s*(\{.*?\});"#).expect("static regex")
});

fn extract_embedded_json_holdings(html: &str) -> Result<Vec<HoldingRow>, EngineError> {
    #[derive(Deserialize)]
    struct EmbeddedHolding {
        ticker: String,
        name: String,
        weight: f64,
        #[serde(default)]
        isin: Option<String>,
    }
    #[derive(Deserialize)]
    struct EmbeddedBlob {
        holdings: Vec<EmbeddedHolding>,
    }

    let captures = EMBEDDED_JSON_BLOB
        .captures(html)
        .ok_or_else(|| EngineError::Data("no embedded holdings blob found in HTML".to_string()))?;
    let json = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let parsed: EmbeddedBlob = serde_json::from_str(json).map_err(|e| EngineError::Data(e.to_string()))?;
    Ok(parsed
        .holdings
        .into_iter()
        .map(|h| HoldingRow {
            ticker: h.ticker,
            name: h.name,
            weight: h.weight,
            isin: h.isin,
            sector: None,
            country: None,
            currency: None,
        })
        .collect())
}

/// Registry of adapters keyed by issuer, with a default no-op `Unknown`
/// adapter that always requires a manual upload.
pub struct AdapterRegistry {
    adapters: std::collections::HashMap<Issuer, HttpAdapter>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new(manual_store: ManualFileStore, http: HttpClient, timeout: std::time::Duration) -> Self {
        let mut adapters = std::collections::HashMap::new();
        for issuer in [
            Issuer::Ishares,
            Issuer::Vanguard,
            Issuer::Amundi,
            Issuer::Xtrackers,
            Issuer::Vaneck,
            Issuer::Spdr,
            Issuer::Invesco,
        ] {
            adapters.insert(
                issuer,
                HttpAdapter::new(issuer, IssuerEndpoints::default(), manual_store.clone(), http.clone(), timeout),
            );
        }
        adapters.insert(
            Issuer::Unknown,
            HttpAdapter::new(Issuer::Unknown, IssuerEndpoints::default(), manual_store, http, timeout),
        );
        Self { adapters }
    }

    /// Replace the endpoint templates for one issuer, e.g. from a config file.
    pub fn configure(&mut self, issuer: Issuer, endpoints: IssuerEndpoints) {
        if let Some(adapter) = self.adapters.get_mut(&issuer) {
            adapter.endpoints = endpoints;
        }
    }

    #[must_use]
    pub fn get(&self, issuer: Issuer) -> Option<&HttpAdapter> {
        self.adapters.get(&issuer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_issuer_prefers_cached_source_over_isin_prefix() {
        assert_eq!(detect_issuer("IE00B4L5Y983", Some("vanguard")), Issuer::Vanguard);
    }

    #[test]
    fn detect_issuer_falls_back_to_isin_prefix() {
        assert_eq!(detect_issuer("IE00B4L5Y983", None), Issuer::Ishares);
    }

    #[test]
    fn unknown_prefix_maps_to_unknown_issuer() {
        assert_eq!(detect_issuer("ZZ00000000ZZ", None), Issuer::Unknown);
    }

    #[test]
    fn csv_text_parses_percentage_and_fractional_weights() {
        let csv = "ticker,name,weight\nNVDA,Nvidia Corp,5.2%\nAAPL,Apple Inc,0.048\n";
        let rows = parse_csv_text(csv).expect("parse");
        assert_eq!(rows.len(), 2);
        assert!((rows[0].weight - 0.052).abs() < 1e-9);
        assert!((rows[1].weight - 0.048).abs() < 1e-9);
    }

    #[test]
    fn embedded_json_blob_is_extracted_from_html() {
        let html = r#"<html><script>window.__FUND_HOLDINGS__ = {"holdings":[{"ticker":"NVDA","name":"Nvidia","weight":0.05}]};</script></html>"#;
        let rows = extract_embedded_json_holdings(html).expect("extract");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ticker, "NVDA");
    }

    #[tokio::test]
    async fn no_endpoints_and_no_manual_file_requires_manual_upload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ManualFileStore::new(dir.path());
        let http = HttpClient::new("test");
        let adapter = HttpAdapter::new(
            Issuer::Unknown,
            IssuerEndpoints::default(),
            store,
            http,
            std::time::Duration::from_secs(1),
        );
        let err = adapter.fetch_holdings("IE00ZZZZZZZZ").await.unwrap_err();
        assert!(matches!(err, EngineError::ManualUploadRequired { .. }));
    }

    #[tokio::test]
    async fn manual_file_takes_priority_over_every_other_stage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ManualFileStore::new(dir.path());
        store
            .store("IE00ZZZZZZZZ", "csv", b"ticker,name,weight\nNVDA,Nvidia,0.05\n")
            .expect("store manual file");
        let http = HttpClient::new("test");
        let adapter = HttpAdapter::new(
            Issuer::Unknown,
            IssuerEndpoints::default(),
            store,
            http,
            std::time::Duration::from_secs(1),
        );
        let rows = adapter.fetch_holdings("IE00ZZZZZZZZ").await.expect("manual file used");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ticker, "NVDA");
    }
}
