//! The Aggregator (§4.7): merges direct and decomposed holdings by ISIN,
//! preserving the highest-confidence provenance, and produces the
//! true-exposure table plus a truncated unresolved report.
//!
//! Vectorized end to end via `polars`: no per-row control flow once the
//! input rows are loaded into a `DataFrame`, per the component's own
//! requirement.

use polars::prelude::*;
use serde::Serialize;

use crate::core::{dataframe::ToDataFrame, error::EngineError};

/// One row feeding the aggregator: either a direct holding or an already
/// decomposed/weighted ETF underlying.
#[derive(Debug, Clone)]
pub struct AggregationInputRow {
    pub isin: Option<String>,
    pub name: String,
    pub ticker: Option<String>,
    pub sector: Option<String>,
    pub geography: Option<String>,
    /// Exposure in portfolio currency (already `quantity * unit_price`,
    /// rebased by ETF weight where applicable).
    pub total_exposure: f64,
    pub resolution_source: Option<String>,
    pub resolution_confidence: f64,
    pub parent_etf_isin: Option<String>,
}

impl AggregationInputRow {
    /// Tolerates missing provenance by defaulting confidence/source, per the
    /// aggregator's contract.
    #[must_use]
    pub fn with_default_provenance(mut self) -> Self {
        if self.resolution_source.is_none() {
            self.resolution_confidence = 0.0;
        }
        self
    }
}

impl ToDataFrame for AggregationInputRow {
    fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        rows_to_dataframe(std::slice::from_ref(self))
    }

    fn empty_dataframe() -> PolarsResult<DataFrame> {
        rows_to_dataframe(&[])
    }

    fn schema() -> PolarsResult<Vec<(&'static str, DataType)>> {
        Ok(vec![
            ("isin", DataType::String),
            ("name", DataType::String),
            ("ticker", DataType::String),
            ("sector", DataType::String),
            ("geography", DataType::String),
            ("total_exposure", DataType::Float64),
            ("resolution_source", DataType::String),
            ("resolution_confidence", DataType::Float64),
        ])
    }
}

fn rows_to_dataframe(rows: &[AggregationInputRow]) -> PolarsResult<DataFrame> {
    let isin: Vec<Option<String>> = rows.iter().map(|r| r.isin.clone()).collect();
    let name: Vec<String> = rows.iter().map(|r| r.name.clone()).collect();
    let ticker: Vec<Option<String>> = rows.iter().map(|r| r.ticker.clone()).collect();
    let sector: Vec<Option<String>> = rows.iter().map(|r| r.sector.clone()).collect();
    let geography: Vec<Option<String>> = rows.iter().map(|r| r.geography.clone()).collect();
    let total_exposure: Vec<f64> = rows.iter().map(|r| r.total_exposure).collect();
    let resolution_source: Vec<Option<String>> = rows.iter().map(|r| r.resolution_source.clone()).collect();
    let resolution_confidence: Vec<f64> = rows.iter().map(|r| r.resolution_confidence).collect();

    df! {
        "isin" => isin,
        "name" => name,
        "ticker" => ticker,
        "sector" => sector,
        "geography" => geography,
        "total_exposure" => total_exposure,
        "resolution_source" => resolution_source,
        "resolution_confidence" => resolution_confidence,
    }
}

/// One row of the final true-exposure table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRow {
    pub isin: String,
    pub name: String,
    pub sector: Option<String>,
    pub geography: Option<String>,
    pub total_exposure: f64,
    pub resolution_source: Option<String>,
    pub resolution_confidence: f64,
}

/// One row retained in the unresolved report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedItem {
    pub ticker: Option<String>,
    pub name: String,
    pub weight: f64,
    pub parent_etf: Option<String>,
}

/// The unresolved report, truncated to the top N by weight (§4.7).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedReport {
    pub items: Vec<UnresolvedItem>,
    pub truncated: bool,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct AggregationReport {
    pub resolved: Vec<AggregatedRow>,
    pub unresolved: UnresolvedReport,
}

/// Group by ISIN; sum `total_exposure`; first-value textual columns;
/// max `resolution_confidence`; `resolution_source` from the row achieving
/// that max (ties broken by first occurrence). Rows without a resolved ISIN
/// bypass aggregation into the unresolved report.
pub fn aggregate(rows: Vec<AggregationInputRow>, unresolved_cap: usize) -> Result<AggregationReport, EngineError> {
    let rows: Vec<AggregationInputRow> = rows.into_iter().map(AggregationInputRow::with_default_provenance).collect();

    let (resolved_rows, unresolved_rows): (Vec<_>, Vec<_>) =
        rows.into_iter().partition(|r| r.isin.is_some());

    let resolved = if resolved_rows.is_empty() {
        Vec::new()
    } else {
        aggregate_resolved(resolved_rows)?
    };

    let unresolved = build_unresolved_report(unresolved_rows, unresolved_cap);

    Ok(AggregationReport { resolved, unresolved })
}

fn aggregate_resolved(rows: Vec<AggregationInputRow>) -> Result<Vec<AggregatedRow>, EngineError> {
    let df = rows_to_dataframe(&rows).map_err(|e| EngineError::Data(e.to_string()))?;

    // Two stable sorts: first by confidence descending (ties keep their
    // original, first-occurrence order), then by isin ascending (stable, so
    // within each isin group the highest-confidence row stays first). The
    // groupby's `first()` aggregation then always picks the max-confidence
    // row's textual columns, with first-occurrence tie-breaking for free.
    let by_confidence = df
        .sort(
            ["resolution_confidence"],
            SortMultipleOptions::default().with_order_descending(true).with_maintain_order(true),
        )
        .map_err(|e| EngineError::Data(e.to_string()))?;
    let sorted = by_confidence
        .sort(["isin"], SortMultipleOptions::default().with_maintain_order(true))
        .map_err(|e| EngineError::Data(e.to_string()))?;

    let grouped = sorted
        .lazy()
        .group_by([col("isin")])
        .agg([
            col("name").first().alias("name"),
            col("sector").first().alias("sector"),
            col("geography").first().alias("geography"),
            col("total_exposure").sum().alias("total_exposure"),
            col("resolution_source").first().alias("resolution_source"),
            col("resolution_confidence").max().alias("resolution_confidence"),
        ])
        .sort(["isin"], SortMultipleOptions::default())
        .collect()
        .map_err(|e| EngineError::Data(e.to_string()))?;

    dataframe_to_aggregated_rows(&grouped)
}

fn dataframe_to_aggregated_rows(df: &DataFrame) -> Result<Vec<AggregatedRow>, EngineError> {
    let isin = str_column(df, "isin")?;
    let name = str_column(df, "name")?;
    let sector = opt_str_column(df, "sector")?;
    let geography = opt_str_column(df, "geography")?;
    let total_exposure = f64_column(df, "total_exposure")?;
    let resolution_source = opt_str_column(df, "resolution_source")?;
    let resolution_confidence = f64_column(df, "resolution_confidence")?;

    let n = df.height();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        out.push(AggregatedRow {
            isin: isin[i].clone().unwrap_or_default(),
            name: name[i].clone().unwrap_or_default(),
            sector: sector[i].clone(),
            geography: geography[i].clone(),
            total_exposure: total_exposure[i].unwrap_or(0.0),
            resolution_source: resolution_source[i].clone(),
            resolution_confidence: resolution_confidence[i].unwrap_or(0.0),
        });
    }
    Ok(out)
}

fn build_unresolved_report(rows: Vec<AggregationInputRow>, cap: usize) -> UnresolvedReport {
    let total = rows.len();
    let mut items: Vec<UnresolvedItem> = rows
        .into_iter()
        .map(|r| UnresolvedItem {
            ticker: r.ticker,
            name: r.name,
            weight: r.total_exposure,
            parent_etf: r.parent_etf_isin,
        })
        .collect();
    items.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
    let truncated = items.len() > cap;
    items.truncate(cap);
    UnresolvedReport { items, truncated, total }
}

fn str_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, EngineError> {
    Ok(df
        .column(name)
        .map_err(|e| EngineError::Data(e.to_string()))?
        .str()
        .map_err(|e| EngineError::Data(e.to_string()))?
        .into_iter()
        .map(|v| v.map(ToString::to_string))
        .collect())
}

fn opt_str_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, EngineError> {
    str_column(df, name)
}

fn f64_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, EngineError> {
    Ok(df
        .column(name)
        .map_err(|e| EngineError::Data(e.to_string()))?
        .f64()
        .map_err(|e| EngineError::Data(e.to_string()))?
        .into_iter()
        .collect())
}

/// `df.market_value` elementwise when present, else `df.quantity * df.price`.
/// Result length always equals input length (§8 universal invariant).
pub fn calculate_position_values(df: &DataFrame) -> Result<Series, EngineError> {
    if let Ok(market_value) = df.column("market_value") {
        return Ok(market_value.as_materialized_series().clone());
    }
    let quantity = df
        .column("quantity")
        .map_err(|e| EngineError::Data(e.to_string()))?
        .f64()
        .map_err(|e| EngineError::Data(e.to_string()))?;
    let price = df
        .column("price")
        .map_err(|e| EngineError::Data(e.to_string()))?
        .f64()
        .map_err(|e| EngineError::Data(e.to_string()))?;
    Ok((quantity * price).into_series())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(isin: &str, exposure: f64, source: &str, confidence: f64) -> AggregationInputRow {
        AggregationInputRow {
            isin: Some(isin.to_string()),
            name: "Nvidia Corp".to_string(),
            ticker: Some("NVDA".to_string()),
            sector: Some("Technology".to_string()),
            geography: Some("US".to_string()),
            total_exposure: exposure,
            resolution_source: Some(source.to_string()),
            resolution_confidence: confidence,
            parent_etf_isin: None,
        }
    }

    #[test]
    fn groups_by_isin_and_sums_exposure() {
        let rows = vec![
            row("US67066G1040", 1679.37, "provider", 1.0),
            row("US67066G1040", 50.0, "api_wikidata", 0.80),
        ];
        let report = aggregate(rows, 100).expect("aggregate");
        assert_eq!(report.resolved.len(), 1);
        let nvda = &report.resolved[0];
        assert!((nvda.total_exposure - 1729.37).abs() < 1e-6);
    }

    #[test]
    fn keeps_highest_confidence_source() {
        let rows = vec![
            row("US67066G1040", 100.0, "api_wikidata", 0.80),
            row("US67066G1040", 200.0, "provider", 1.0),
        ];
        let report = aggregate(rows, 100).expect("aggregate");
        assert_eq!(report.resolved[0].resolution_source.as_deref(), Some("provider"));
        assert_eq!(report.resolved[0].resolution_confidence, 1.0);
    }

    #[test]
    fn unresolved_rows_bypass_aggregation_and_truncate() {
        let mut rows = Vec::new();
        for i in 0..150 {
            rows.push(AggregationInputRow {
                isin: None,
                name: format!("Obscure Co {i}"),
                ticker: None,
                sector: None,
                geography: None,
                total_exposure: i as f64,
                resolution_source: None,
                resolution_confidence: 0.0,
                parent_etf_isin: None,
            });
        }
        let report = aggregate(rows, 100).expect("aggregate");
        assert!(report.resolved.is_empty());
        assert_eq!(report.unresolved.total, 150);
        assert_eq!(report.unresolved.items.len(), 100);
        assert!(report.unresolved.truncated);
        // Top item by weight (149.0) should be first after descending sort.
        assert!((report.unresolved.items[0].weight - 149.0).abs() < 1e-9);
    }

    #[test]
    fn aggregation_is_associative_over_partitions() {
        let rows = vec![
            row("US67066G1040", 100.0, "provider", 1.0),
            row("IE00B4L5Y983", 50.0, "hive_ticker", 0.90),
            row("US67066G1040", 25.0, "api_wikidata", 0.80),
        ];
        let whole = aggregate(rows.clone(), 100).expect("aggregate whole");

        let (a, b) = rows.split_at(2);
        let part_a = aggregate(a.to_vec(), 100).expect("aggregate part a").resolved;
        let part_b = aggregate(b.to_vec(), 100).expect("aggregate part b").resolved;
        let mut recombined_input = Vec::new();
        for r in part_a.into_iter().chain(part_b) {
            recombined_input.push(AggregationInputRow {
                isin: Some(r.isin),
                name: r.name,
                ticker: None,
                sector: r.sector,
                geography: r.geography,
                total_exposure: r.total_exposure,
                resolution_source: r.resolution_source,
                resolution_confidence: r.resolution_confidence,
                parent_etf_isin: None,
            });
        }
        let recombined = aggregate(recombined_input, 100).expect("re-aggregate");

        let mut whole_sorted = whole.resolved.clone();
        whole_sorted.sort_by(|a, b| a.isin.cmp(&b.isin));
        let mut recombined_sorted = recombined.resolved.clone();
        recombined_sorted.sort_by(|a, b| a.isin.cmp(&b.isin));

        assert_eq!(whole_sorted.len(), recombined_sorted.len());
        for (w, r) in whole_sorted.iter().zip(recombined_sorted.iter()) {
            assert_eq!(w.isin, r.isin);
            assert!((w.total_exposure - r.total_exposure).abs() < 1e-6);
        }
    }
}
