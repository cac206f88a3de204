//! The Decomposer (§4.6): turns one ETF position into its weighted
//! underlying rows, via cache → community store → adapter, recursively
//! resolving each underlying through the Identity Resolver.

use std::collections::HashSet;

use chrono::Utc;

use crate::{
    adapters::{self, AdapterRegistry, HoldingRow},
    cache::LocalCache,
    core::{config::EngineConfig, error::EngineError, types::EtfHoldingEdge},
    hive::HiveClient,
    resolver::{IdentityResolver, ResolveRequest},
};

/// Outcome of decomposing a single ETF (§4.6 step 5, feeds the health
/// report's `decomposition.per_etf`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtfStatus {
    Success,
    Partial,
    Failed,
}

impl EtfStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// One underlying holding after resolution, with its weight rebased to the
/// overall portfolio (`weight * parent ETF's portfolio weight`, recursively
/// for nested ETFs).
#[derive(Debug, Clone)]
pub struct DecomposedRow {
    pub isin: Option<String>,
    pub name: String,
    pub ticker: String,
    pub weight_within_etf: f64,
    pub effective_weight: f64,
    pub resolution_status: crate::core::types::ResolutionStatus,
    pub resolution_detail: String,
    pub resolution_source: Option<String>,
    pub resolution_confidence: f64,
    pub sector: Option<String>,
    pub currency: Option<String>,
    pub parent_etf_isin: String,
}

/// Per-ETF summary (§4.6 step 5 / §4.8 health report `decomposition.per_etf`).
#[derive(Debug, Clone)]
pub struct EtfSummary {
    pub isin: String,
    pub name: String,
    pub holdings_count: usize,
    pub weight_sum: f64,
    pub status: EtfStatus,
    pub source: String,
}

/// Everything produced by decomposing one ETF position, including any
/// nested ETFs flattened recursively.
#[derive(Debug, Clone, Default)]
pub struct DecomposeOutcome {
    pub rows: Vec<DecomposedRow>,
    pub summaries: Vec<EtfSummary>,
    /// Set when an adapter raised `ManualUploadRequired`: the actionable
    /// failure the orchestrator lists (§4.6 step 3, §7).
    pub manual_upload_required: Option<ManualUploadFailure>,
}

#[derive(Debug, Clone)]
pub struct ManualUploadFailure {
    pub isin: String,
    pub provider: String,
    pub download_url: Option<String>,
    pub portfolio_weight: f64,
}

pub struct Decomposer {
    cache: LocalCache,
    hive: HiveClient,
    adapters: AdapterRegistry,
    resolver: IdentityResolver,
    etf_holdings_ttl: chrono::Duration,
}

impl Decomposer {
    pub fn new(
        config: &EngineConfig,
        cache: LocalCache,
        hive: HiveClient,
        adapters: AdapterRegistry,
        resolver: IdentityResolver,
    ) -> Result<Self, EngineError> {
        let etf_holdings_ttl = chrono::Duration::from_std(config.etf_holdings_ttl)
            .map_err(|e| EngineError::Fatal(format!("etf_holdings_ttl out of range: {e}")))?;
        Ok(Self { cache, hive, adapters, resolver, etf_holdings_ttl })
    }

    /// Decompose `etf_isin` (weighted `portfolio_weight` of the overall
    /// portfolio), recursing into any underlying that is itself a known ETF.
    /// `visited` is the per-run cycle guard shared across the whole
    /// decomposition phase (§9 "Cyclic references").
    pub async fn decompose_etf(
        &self,
        etf_isin: &str,
        etf_name: &str,
        portfolio_weight: f64,
        visited: &mut HashSet<String>,
    ) -> Result<DecomposeOutcome, EngineError> {
        if visited.contains(etf_isin) {
            // Re-entrant ETF: treat as an opaque leaf, preserving its weight.
            return Ok(DecomposeOutcome {
                rows: vec![DecomposedRow {
                    isin: Some(etf_isin.to_string()),
                    name: etf_name.to_string(),
                    ticker: String::new(),
                    weight_within_etf: 1.0,
                    effective_weight: portfolio_weight,
                    resolution_status: crate::core::types::ResolutionStatus::Resolved,
                    resolution_detail: "cyclic_etf_leaf".to_string(),
                    resolution_source: Some("provider".to_string()),
                    resolution_confidence: 1.0,
                    sector: None,
                    currency: None,
                    parent_etf_isin: etf_isin.to_string(),
                }],
                summaries: Vec::new(),
                manual_upload_required: None,
            });
        }
        visited.insert(etf_isin.to_string());

        let (underlying, source) = match self.load_underlying(etf_isin, etf_name).await {
            Ok(pair) => pair,
            Err(EngineError::ManualUploadRequired { isin, provider, download_url }) => {
                return Ok(DecomposeOutcome {
                    rows: Vec::new(),
                    summaries: vec![EtfSummary {
                        isin: etf_isin.to_string(),
                        name: etf_name.to_string(),
                        holdings_count: 0,
                        weight_sum: 0.0,
                        status: EtfStatus::Failed,
                        source: "manual_upload_required".to_string(),
                    }],
                    manual_upload_required: Some(ManualUploadFailure {
                        isin,
                        provider,
                        download_url,
                        portfolio_weight,
                    }),
                });
            }
            Err(other) => return Err(other),
        };

        let weight_sum: f64 = underlying.iter().map(|h| h.weight).sum();
        let mut rows = Vec::with_capacity(underlying.len());
        let mut summaries = Vec::new();
        let mut unresolved_count = 0usize;
        let mut manual_upload_required = None;

        for holding in &underlying {
            let request = ResolveRequest {
                ticker: Some(holding.ticker.clone()),
                name: Some(holding.name.clone()),
                provider_isin: holding.isin.clone(),
                weight: Some(holding.weight * portfolio_weight),
            };
            let result = self.resolver.resolve(&request).await?;
            if result.isin.is_none() {
                unresolved_count += 1;
            }

            let effective_weight = holding.weight * portfolio_weight;
            let is_nested_etf = match &result.isin {
                Some(isin) => self
                    .cache
                    .get_asset(isin)
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|a| a.asset_class == crate::core::types::AssetClass::Etf),
                None => false,
            };

            if is_nested_etf {
                let nested_isin = result.isin.clone().unwrap_or_default();
                let nested = Box::pin(self.decompose_etf(&nested_isin, &holding.name, effective_weight, visited))
                    .await?;
                rows.extend(nested.rows);
                summaries.extend(nested.summaries);
                // First-wins: an outer ETF can nest at most one reported manual-upload
                // failure per run here, matching how `DecomposeOutcome` already models
                // it as a single `Option` rather than a collection.
                if manual_upload_required.is_none() {
                    manual_upload_required = nested.manual_upload_required;
                }
            } else {
                rows.push(DecomposedRow {
                    isin: result.isin.clone(),
                    name: holding.name.clone(),
                    ticker: holding.ticker.clone(),
                    weight_within_etf: holding.weight,
                    effective_weight,
                    resolution_status: result.status,
                    resolution_detail: result.detail.clone(),
                    resolution_source: result.source.clone(),
                    resolution_confidence: result.confidence,
                    sector: holding.sector.clone(),
                    currency: holding.currency.clone(),
                    parent_etf_isin: etf_isin.to_string(),
                });
            }
        }

        let resolved_edges: Vec<EtfHoldingEdge> = rows
            .iter()
            .filter(|r| r.parent_etf_isin == etf_isin)
            .filter_map(|r| {
                r.isin.clone().map(|holding_isin| EtfHoldingEdge {
                    etf_isin: etf_isin.to_string(),
                    holding_isin,
                    weight: r.weight_within_etf,
                    confidence: r.resolution_confidence,
                    last_updated: Utc::now(),
                })
            })
            .collect();
        if !resolved_edges.is_empty() {
            let _ = self.cache.put_etf_holdings(etf_isin, &resolved_edges).await;
        }

        let status = if underlying.is_empty() {
            EtfStatus::Failed
        } else if unresolved_count == 0 {
            EtfStatus::Success
        } else if unresolved_count < underlying.len() {
            EtfStatus::Partial
        } else {
            EtfStatus::Failed
        };

        summaries.push(EtfSummary {
            isin: etf_isin.to_string(),
            name: etf_name.to_string(),
            holdings_count: underlying.len(),
            weight_sum,
            status,
            source,
        });

        Ok(DecomposeOutcome { rows, summaries, manual_upload_required })
    }

    /// §4.6 steps 1-3: local cache → community store → adapter.
    async fn load_underlying(
        &self,
        etf_isin: &str,
        etf_name: &str,
    ) -> Result<(Vec<HoldingRow>, String), EngineError> {
        if let Some((edges, last_updated)) = self.cache.get_etf_holdings(etf_isin).await? {
            if Utc::now() - last_updated <= self.etf_holdings_ttl {
                let rows = edges
                    .into_iter()
                    .map(|e| HoldingRow {
                        ticker: String::new(),
                        name: String::new(),
                        weight: e.weight,
                        isin: Some(e.holding_isin),
                        sector: None,
                        country: None,
                        currency: None,
                    })
                    .collect();
                return Ok((rows, "local_cache".to_string()));
            }
        }

        if let Ok(edges) = self.hive.get_etf_holdings(etf_isin).await {
            if !edges.is_empty() {
                let _ = self.cache.put_etf_holdings(etf_isin, &edges).await;
                let rows = edges
                    .into_iter()
                    .map(|e| HoldingRow {
                        ticker: String::new(),
                        name: String::new(),
                        weight: e.weight,
                        isin: Some(e.holding_isin),
                        sector: None,
                        country: None,
                        currency: None,
                    })
                    .collect();
                return Ok((rows, "hive".to_string()));
            }
        }

        // No cached issuer metadata beyond the Asset record itself, which
        // doesn't carry an issuer tag; fall through to the ISIN-prefix guess.
        let issuer = adapters::detect_issuer(etf_isin, None);
        let adapter = self
            .adapters
            .get(issuer)
            .ok_or_else(|| EngineError::Fatal(format!("no adapter registered for issuer {issuer:?}")))?;
        let rows = adapter.fetch_holdings(etf_isin).await?;
        let _ = etf_name;
        Ok((rows, format!("adapter:{}", issuer.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etf_status_str_matches_health_report_vocabulary() {
        assert_eq!(EtfStatus::Success.as_str(), "success");
        assert_eq!(EtfStatus::Partial.as_str(), "partial");
        assert_eq!(EtfStatus::Failed.as_str(), "failed");
    }
}
