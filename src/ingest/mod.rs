//! Ingestion & Schema (§4.9): the single gate between external broker/CSV
//! data and the rest of the engine. No component downstream of this module
//! may read raw broker data directly.
//!
//! `ingest_positions` normalizes and validates one run's positions into
//! `CanonicalPosition`s, which live only for that run (§3 "Lifecycles").
//! `ingest_metadata` does the same for asset metadata and upserts the result
//! into the Local Cache, since asset records persist across runs.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::{
    cache::LocalCache,
    core::{
        error::EngineError,
        isin,
        types::{Asset, AssetClass, CanonicalPosition, EnrichmentStatus},
    },
};

/// Canonical column name -> accepted source aliases (case-insensitive,
/// punctuation/whitespace-insensitive once normalized).
static POSITION_COLUMN_ALIASES: LazyLock<HashMap<&'static str, &'static [&'static str]>> = LazyLock::new(|| {
    HashMap::from([
        ("isin", &["isin", "isincode", "securityisin", "isin_code"] as &[&str]),
        ("name", &["name", "securityname", "description", "security"] as &[&str]),
        ("quantity", &["quantity", "qty", "shares", "units"] as &[&str]),
        ("unit_price", &["unitprice", "price", "pricepershare", "marketprice"] as &[&str]),
        ("currency", &["currency", "ccy"] as &[&str]),
        ("source", &["source", "broker", "provider"] as &[&str]),
        ("asset_type", &["assettype", "type", "assetclass"] as &[&str]),
        ("timestamp", &["timestamp", "date", "asof", "asofdate"] as &[&str]),
    ])
});

static METADATA_COLUMN_ALIASES: LazyLock<HashMap<&'static str, &'static [&'static str]>> = LazyLock::new(|| {
    HashMap::from([
        ("isin", &["isin", "isincode"] as &[&str]),
        ("name", &["name", "securityname"] as &[&str]),
        ("asset_type", &["assettype", "type", "assetclass"] as &[&str]),
        ("base_currency", &["basecurrency", "currency", "ccy"] as &[&str]),
        ("sector", &["sector", "industry"] as &[&str]),
        ("geography", &["geography", "country", "region"] as &[&str]),
    ])
});

/// Lowercases and strips everything but alphanumerics, so `"ISIN Code"`,
/// `"isin_code"` and `"Isin-Code"` all normalize to `"isincode"`.
fn fold_column_name(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).flat_map(char::to_lowercase).collect()
}

/// Resolve a raw source header to one of this gate's canonical column names.
fn canonical_column(
    raw: &str,
    aliases: &HashMap<&'static str, &'static [&'static str]>,
) -> Option<&'static str> {
    let folded = fold_column_name(raw);
    aliases
        .iter()
        .find(|(_, variants)| variants.iter().any(|v| *v == folded))
        .map(|(canonical, _)| *canonical)
}

/// One row of the raw input that failed validation and was dropped, with the
/// reason (§7 "row skipped with `resolution_status=skipped, detail=invalid_*`").
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    pub row_index: usize,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestOutcome<T> {
    pub rows: Vec<T>,
    pub skipped: Vec<SkippedRow>,
}

/// Raw row shape accepted from a broker/CSV source, post header-normalization.
#[derive(Debug, Clone, Default)]
struct RawRow {
    fields: HashMap<&'static str, String>,
}

impl RawRow {
    fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Reshape a table of `{header: value}` maps (one per row, as produced by any
/// CSV/JSON/broker-API reader) into normalized rows keyed by canonical
/// column name.
fn normalize_rows(
    raw_rows: &[HashMap<String, String>],
    aliases: &HashMap<&'static str, &'static [&'static str]>,
) -> Vec<RawRow> {
    raw_rows
        .iter()
        .map(|row| {
            let mut fields = HashMap::new();
            for (header, value) in row {
                if let Some(canonical) = canonical_column(header, aliases) {
                    fields.insert(canonical, value.trim().to_string());
                }
            }
            RawRow { fields }
        })
        .collect()
}

fn parse_asset_type(raw: Option<&str>) -> AssetClass {
    match raw.map(str::to_lowercase).as_deref() {
        Some("etf") => AssetClass::Etf,
        Some("crypto") | Some("cryptocurrency") => AssetClass::Crypto,
        Some("cash") => AssetClass::Cash,
        _ => AssetClass::Stock,
    }
}

/// §4.9: normalize, validate (ISIN shape, numeric coercion, non-negative
/// price), and return the canonical positions for this run. No cache writes
/// — positions are never persisted (§3 "Lifecycles").
pub fn ingest_positions(raw_rows: &[HashMap<String, String>]) -> Result<IngestOutcome<CanonicalPosition>, EngineError> {
    let rows = normalize_rows(raw_rows, &POSITION_COLUMN_ALIASES);
    let mut out = IngestOutcome::default();

    for (row_index, row) in rows.iter().enumerate() {
        let Some(isin_raw) = row.get("isin") else {
            out.skipped.push(SkippedRow { row_index, detail: "invalid_missing_isin".to_string() });
            continue;
        };
        let isin_value = isin_raw.to_uppercase();
        if !isin::has_valid_shape(&isin_value) {
            out.skipped.push(SkippedRow { row_index, detail: "invalid_isin_shape".to_string() });
            continue;
        }

        let Some(quantity_raw) = row.get("quantity") else {
            out.skipped.push(SkippedRow { row_index, detail: "invalid_missing_quantity".to_string() });
            continue;
        };
        let Ok(quantity) = quantity_raw.parse::<Decimal>() else {
            out.skipped.push(SkippedRow { row_index, detail: "invalid_numeric_quantity".to_string() });
            continue;
        };

        let Some(price_raw) = row.get("unit_price") else {
            out.skipped.push(SkippedRow { row_index, detail: "invalid_missing_price".to_string() });
            continue;
        };
        let Ok(unit_price) = price_raw.parse::<Decimal>() else {
            out.skipped.push(SkippedRow { row_index, detail: "invalid_numeric_price".to_string() });
            continue;
        };
        if unit_price.is_sign_negative() {
            out.skipped.push(SkippedRow { row_index, detail: "invalid_negative_price".to_string() });
            continue;
        }

        let name = row.get("name").unwrap_or(&isin_value).to_string();
        let currency = row.get("currency").unwrap_or("USD").to_uppercase();
        let source = row.get("source").unwrap_or("manual").to_string();
        let asset_type = parse_asset_type(row.get("asset_type"));
        let timestamp = row
            .get("timestamp")
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        out.rows.push(CanonicalPosition {
            isin: isin_value,
            name,
            quantity,
            unit_price,
            currency,
            source,
            asset_type,
            timestamp,
        });
    }

    Ok(out)
}

/// §4.9: normalize, validate, and upsert asset metadata into the Local
/// Cache. Unlike positions, metadata is asset-identity data and therefore
/// persists.
pub async fn ingest_metadata(
    cache: &LocalCache,
    raw_rows: &[HashMap<String, String>],
) -> Result<IngestOutcome<Asset>, EngineError> {
    let rows = normalize_rows(raw_rows, &METADATA_COLUMN_ALIASES);
    let mut out = IngestOutcome::default();

    for (row_index, row) in rows.iter().enumerate() {
        let Some(isin_raw) = row.get("isin") else {
            out.skipped.push(SkippedRow { row_index, detail: "invalid_missing_isin".to_string() });
            continue;
        };
        let isin_value = isin_raw.to_uppercase();
        if !isin::has_valid_shape(&isin_value) {
            out.skipped.push(SkippedRow { row_index, detail: "invalid_isin_shape".to_string() });
            continue;
        }

        let name = row.get("name").unwrap_or(&isin_value).to_string();
        let asset_class = parse_asset_type(row.get("asset_type"));
        let base_currency = row.get("base_currency").unwrap_or("USD").to_uppercase();
        let sector = row.get("sector").map(str::to_string);
        let geography = row.get("geography").map(str::to_string);

        let asset = Asset {
            isin: isin_value,
            name,
            asset_class,
            base_currency,
            sector,
            geography,
            enrichment_status: EnrichmentStatus::Partial,
            updated_at: Utc::now(),
        };
        cache.upsert_asset(&asset).await?;
        out.rows.push(asset);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn accepts_aliased_headers_case_and_punctuation_insensitive() {
        let rows = vec![row(&[
            ("ISIN Code", "US67066G1040"),
            ("Security Name", "Nvidia Corp"),
            ("Qty", "10.506795"),
            ("Price Per Share", "159.84"),
            ("Currency", "usd"),
        ])];
        let outcome = ingest_positions(&rows).expect("ingest");
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.skipped.len(), 0);
        assert_eq!(outcome.rows[0].isin, "US67066G1040");
        assert_eq!(outcome.rows[0].currency, "USD");
    }

    #[test]
    fn rejects_malformed_isin_shape() {
        let rows = vec![row(&[("isin", "NOTANISIN"), ("quantity", "1"), ("unit_price", "1")])];
        let outcome = ingest_positions(&rows).expect("ingest");
        assert_eq!(outcome.rows.len(), 0);
        assert_eq!(outcome.skipped[0].detail, "invalid_isin_shape");
    }

    #[test]
    fn rejects_negative_price() {
        let rows = vec![row(&[("isin", "US67066G1040"), ("quantity", "1"), ("unit_price", "-5")])];
        let outcome = ingest_positions(&rows).expect("ingest");
        assert_eq!(outcome.rows.len(), 0);
        assert_eq!(outcome.skipped[0].detail, "invalid_negative_price");
    }

    #[test]
    fn permits_negative_quantity_as_a_short_position() {
        let rows = vec![row(&[
            ("isin", "US67066G1040"),
            ("quantity", "-10"),
            ("unit_price", "159.84"),
        ])];
        let outcome = ingest_positions(&rows).expect("ingest");
        assert_eq!(outcome.rows.len(), 1);
        assert!(outcome.rows[0].is_short());
    }

    #[test]
    fn coerces_non_numeric_quantity_to_a_skip() {
        let rows = vec![row(&[("isin", "US67066G1040"), ("quantity", "ten"), ("unit_price", "1")])];
        let outcome = ingest_positions(&rows).expect("ingest");
        assert_eq!(outcome.skipped[0].detail, "invalid_numeric_quantity");
    }

    #[tokio::test]
    async fn ingest_metadata_upserts_into_the_cache() {
        let cache = LocalCache::open_in_memory().await.expect("open cache");
        let rows = vec![row(&[
            ("isin", "US67066G1040"),
            ("name", "Nvidia Corp"),
            ("asset_type", "stock"),
            ("base_currency", "usd"),
            ("sector", "Technology"),
        ])];
        let outcome = ingest_metadata(&cache, &rows).await.expect("ingest metadata");
        assert_eq!(outcome.rows.len(), 1);
        let stored = cache.get_asset("US67066G1040").await.unwrap().expect("stored asset");
        assert_eq!(stored.name, "Nvidia Corp");
        assert_eq!(stored.sector.as_deref(), Some("Technology"));
    }
}
