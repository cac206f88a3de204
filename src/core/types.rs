//! The data model shared across every component (§3 of the design).
//!
//! `CanonicalPosition` is the ingestion DTO; everything downstream of
//! ingestion works on the wider "holding row" shape, which in this crate is
//! a `polars::DataFrame` with the canonical + provenance columns described
//! here rather than a per-row struct, per the aggregator's vectorization
//! requirement. The structs in this module are the row-level view used at
//! the edges (ingestion input, single-resolve calls, cache entries).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What kind of instrument a position or asset represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Stock,
    Etf,
    Crypto,
    Cash,
}

/// How far along identity enrichment an `Asset` record is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Stub,
    Partial,
    Full,
}

/// Outcome of a resolve attempt, or of a cached/decomposed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStatus {
    Resolved,
    Unresolved,
    Skipped,
    /// Local negative-cache-only state; never surfaced outside `cache`.
    Pending,
}

/// What an alias actually is, e.g. a legal name vs. a Bloomberg-style
/// abbreviation vs. a name in the issuer's local language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasType {
    Name,
    Abbreviation,
    LocalName,
    /// Used only as the cache's lookup key discriminator — §4.2's
    /// `get_cached_resolution(alias, alias_type)` distinguishes ticker vs.
    /// name lookups, which is a narrower axis than `AliasType` above.
    Ticker,
}

/// Whether a currency attached to an alias/listing was given explicitly by
/// the source, or inferred (e.g. from an exchange suffix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrencySource {
    Explicit,
    Inferred,
}

/// Ingestion DTO: one raw position as reported by a broker or CSV import.
///
/// `market_value` is intentionally not a field — it is a derived property,
/// computed fresh every time, never stored, never settable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPosition {
    pub isin: String,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub currency: String,
    pub source: String,
    pub asset_type: AssetClass,
    pub timestamp: DateTime<Utc>,
}

impl CanonicalPosition {
    /// `quantity * unit_price`, computed on demand. Never cached on the
    /// struct so there is no risk of it drifting from its inputs.
    #[must_use]
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.unit_price
    }

    /// Structural ISIN shape: 12 chars, first two alphabetic, remainder
    /// alphanumeric. Does not check the trailing Luhn-style check digit —
    /// see [`crate::core::isin::is_checksum_valid`] for that.
    #[must_use]
    pub fn has_valid_isin_shape(&self) -> bool {
        crate::core::isin::has_valid_shape(&self.isin)
    }

    /// `unit_price` must never be negative; `quantity` may be negative
    /// (a short position) but the caller should flag it.
    #[must_use]
    pub fn is_short(&self) -> bool {
        self.quantity.is_sign_negative()
    }
}

/// A canonical identity record: one row per ISIN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub isin: String,
    pub name: String,
    pub asset_class: AssetClass,
    pub base_currency: String,
    pub sector: Option<String>,
    pub geography: Option<String>,
    pub enrichment_status: EnrichmentStatus,
    pub updated_at: DateTime<Utc>,
}

/// A ticker as listed on one exchange. Unique on `(ticker, exchange)`;
/// indexed on `ticker` alone since the resolver frequently looks up by
/// ticker without knowing the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub isin: String,
    pub ticker: String,
    pub exchange: String,
    pub currency: String,
}

/// A name/abbreviation/local-name alias pointing at an ISIN. Unique on
/// `(alias, isin)`; contribution upserts monotonically, never deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub alias: String,
    pub isin: String,
    pub alias_type: AliasType,
    pub language: Option<String>,
    pub source: String,
    pub confidence: f64,
    pub currency: Option<String>,
    pub exchange: Option<String>,
    pub currency_source: Option<CurrencySource>,
    pub contributor_hash: Option<String>,
    pub contributor_count: u32,
}

/// One edge in an ETF's holdings graph: `etf_isin` holds `weight` of
/// `holding_isin`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtfHoldingEdge {
    pub etf_isin: String,
    pub holding_isin: String,
    pub weight: f64,
    pub confidence: f64,
    pub last_updated: DateTime<Utc>,
}

/// A local-only cache row for one `(alias, alias_type)` resolution attempt.
/// Positive entries (`isin: Some(_)`) never expire on their own but may be
/// invalidated by a sync; negative entries (`isin: None`) carry a TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsinCacheEntry {
    pub alias: String,
    pub alias_type: AliasType,
    pub isin: Option<String>,
    pub confidence: f64,
    pub source: String,
    pub resolution_status: ResolutionStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Coarse shape of an alias/ticker string, used purely for observability —
/// the core never reorders cascade steps based on this (§4.4 "Format
/// observability").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    Bloomberg,
    Reuters,
    YahooDash,
    Numeric,
    Plain,
}

/// Append-only observability row recording one API resolve attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatLogEntry {
    pub alias_example: String,
    pub format_type: FormatType,
    pub api_source: String,
    pub success: bool,
    pub attempted_at: DateTime<Utc>,
}

/// Value object returned by every call into the Identity Resolver, and
/// carried through the Decomposer and Aggregator as provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub isin: Option<String>,
    pub status: ResolutionStatus,
    pub detail: String,
    pub source: Option<String>,
    pub confidence: f64,
}

impl ResolutionResult {
    #[must_use]
    pub fn resolved(isin: impl Into<String>, source: impl Into<String>, confidence: f64) -> Self {
        Self {
            isin: Some(isin.into()),
            status: ResolutionStatus::Resolved,
            detail: "existing".to_string(),
            source: Some(source.into()),
            confidence,
        }
    }

    #[must_use]
    pub fn unresolved(detail: impl Into<String>) -> Self {
        Self {
            isin: None,
            status: ResolutionStatus::Unresolved,
            detail: detail.into(),
            source: None,
            confidence: 0.0,
        }
    }

    #[must_use]
    pub fn skipped(detail: impl Into<String>) -> Self {
        Self {
            isin: None,
            status: ResolutionStatus::Skipped,
            detail: detail.into(),
            source: None,
            confidence: 0.0,
        }
    }
}
