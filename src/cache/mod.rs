//! The embedded local cache (§4.2): assets, listings, aliases, the
//! positive/negative ISIN cache, and format logs.
//!
//! Backed by a single `rusqlite` connection guarded by a `tokio::sync::Mutex`
//! — the single-writer-per-process invariant is therefore structural, not
//! just documented. Every method runs its SQL on the blocking thread pool via
//! `spawn_blocking`, since `rusqlite` is synchronous and this is the one
//! place in the engine allowed to block (§5 "Suspension points").

mod schema;

use std::{path::Path, sync::Arc};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

use crate::core::{
    error::EngineError,
    types::{Alias, AliasType, Asset, AssetClass, CurrencySource, EnrichmentStatus, EtfHoldingEdge,
        FormatType, IsinCacheEntry, ResolutionStatus},
};

/// Counts returned by a full sync from the community store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncCounts {
    pub assets: usize,
    pub listings: usize,
    pub aliases: usize,
}

/// The embedded transactional local cache.
#[derive(Clone)]
pub struct LocalCache {
    conn: Arc<Mutex<Connection>>,
}

impl LocalCache {
    /// Open (creating if absent) the SQLite file at `path` and apply
    /// forward-only migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, EngineError> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::Cache(format!("creating cache dir: {e}")))?;
            }
            let conn = Connection::open(&path)
                .map_err(|e| EngineError::Cache(format!("opening cache db: {e}")))?;
            schema::migrate(&conn).map_err(|e| EngineError::Cache(format!("migrating cache db: {e}")))?;
            Ok(conn)
        })
        .await
        .map_err(|e| EngineError::Cache(format!("cache open task panicked: {e}")))??;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// In-memory cache, useful for tests and for a first-run with no
    /// persisted state yet.
    pub async fn open_in_memory() -> Result<Self, EngineError> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection, EngineError> {
            let conn = Connection::open_in_memory()
                .map_err(|e| EngineError::Cache(format!("opening in-memory cache: {e}")))?;
            schema::migrate(&conn).map_err(|e| EngineError::Cache(format!("migrating cache db: {e}")))?;
            Ok(conn)
        })
        .await
        .map_err(|e| EngineError::Cache(format!("cache open task panicked: {e}")))??;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let guard = conn.lock_owned().await;
        tokio::task::spawn_blocking(move || f(&guard))
            .await
            .map_err(|e| EngineError::Cache(format!("cache task panicked: {e}")))?
            .map_err(|e| EngineError::Cache(e.to_string()))
    }

    // ---- assets -----------------------------------------------------

    pub async fn get_asset(&self, isin: &str) -> Result<Option<Asset>, EngineError> {
        let isin = isin.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT isin, name, asset_class, base_currency, sector, geography, \
                 enrichment_status, updated_at FROM assets WHERE isin = ?1",
                params![isin],
                row_to_asset,
            )
            .optional()
        })
        .await
    }

    pub async fn upsert_asset(&self, asset: &Asset) -> Result<(), EngineError> {
        let asset = asset.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO assets (isin, name, asset_class, base_currency, sector, geography, \
                     enrichment_status, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(isin) DO UPDATE SET \
                     name = excluded.name, asset_class = excluded.asset_class, \
                     base_currency = excluded.base_currency, sector = excluded.sector, \
                     geography = excluded.geography, enrichment_status = excluded.enrichment_status, \
                     updated_at = excluded.updated_at",
                params![
                    asset.isin,
                    asset.name,
                    asset_class_str(asset.asset_class),
                    asset.base_currency,
                    asset.sector,
                    asset.geography,
                    enrichment_status_str(asset.enrichment_status),
                    asset.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    // ---- listings -----------------------------------------------------

    /// Case-insensitive on the normalized ticker form. Resolves against any
    /// exchange if `exchange` is `None`, returning the first match.
    pub async fn get_isin_by_ticker(
        &self,
        ticker: &str,
        exchange: Option<&str>,
    ) -> Result<Option<String>, EngineError> {
        let ticker = ticker.to_uppercase();
        let exchange = exchange.map(str::to_uppercase);
        self.with_conn(move |conn| match &exchange {
            Some(exch) => conn
                .query_row(
                    "SELECT isin FROM listings WHERE UPPER(ticker) = ?1 AND UPPER(exchange) = ?2",
                    params![ticker, exch],
                    |row| row.get(0),
                )
                .optional(),
            None => conn
                .query_row(
                    "SELECT isin FROM listings WHERE UPPER(ticker) = ?1 LIMIT 1",
                    params![ticker],
                    |row| row.get(0),
                )
                .optional(),
        })
        .await
    }

    pub async fn upsert_listing(
        &self,
        ticker: &str,
        exchange: &str,
        isin: &str,
        currency: &str,
    ) -> Result<(), EngineError> {
        let (ticker, exchange, isin, currency) =
            (ticker.to_string(), exchange.to_string(), isin.to_string(), currency.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO listings (ticker, exchange, isin, currency) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(ticker, exchange) DO UPDATE SET isin = excluded.isin, currency = excluded.currency",
                params![ticker, exchange, isin, currency],
            )?;
            Ok(())
        })
        .await
    }

    // ---- aliases -----------------------------------------------------

    pub async fn get_isin_by_alias(&self, alias: &str) -> Result<Option<String>, EngineError> {
        let alias = alias.to_uppercase();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT isin FROM aliases WHERE UPPER(alias) = ?1 ORDER BY confidence DESC LIMIT 1",
                params![alias],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    /// Upsert-with-dominance: on conflict of `(alias, isin)`, bump
    /// `contributor_count` and keep the higher confidence and its source,
    /// never overwriting a higher-confidence row with a lower one (§3
    /// "aliases grow monotonically").
    pub async fn upsert_alias(&self, alias: &Alias) -> Result<(), EngineError> {
        let alias = alias.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO aliases (alias, isin, alias_type, language, source, confidence, \
                     currency, exchange, currency_source, contributor_hash, contributor_count, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11) \
                 ON CONFLICT(alias, isin) DO UPDATE SET \
                     contributor_count = contributor_count + 1, \
                     source = CASE WHEN excluded.confidence > aliases.confidence THEN excluded.source ELSE aliases.source END, \
                     confidence = MAX(aliases.confidence, excluded.confidence), \
                     currency = COALESCE(aliases.currency, excluded.currency), \
                     exchange = COALESCE(aliases.exchange, excluded.exchange), \
                     currency_source = COALESCE(aliases.currency_source, excluded.currency_source)",
                params![
                    alias.alias,
                    alias.isin,
                    alias_type_str(alias.alias_type),
                    alias.language,
                    alias.source,
                    alias.confidence,
                    alias.currency,
                    alias.exchange,
                    alias.currency_source.map(currency_source_str),
                    alias.contributor_hash,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    // ---- ISIN resolution cache ---------------------------------------

    pub async fn get_cached_resolution(
        &self,
        alias: &str,
        alias_type: AliasType,
    ) -> Result<Option<IsinCacheEntry>, EngineError> {
        let alias = alias.to_uppercase();
        let alias_type_s = alias_type_str(alias_type).to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT alias, alias_type, isin, confidence, source, resolution_status, \
                     expires_at, updated_at \
                 FROM isin_cache WHERE UPPER(alias) = ?1 AND alias_type = ?2",
                params![alias, alias_type_s],
                row_to_cache_entry,
            )
            .optional()
        })
        .await
    }

    pub async fn put_cached_resolution(&self, entry: &IsinCacheEntry) -> Result<(), EngineError> {
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO isin_cache (alias, alias_type, isin, confidence, source, \
                     resolution_status, expires_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(alias, alias_type) DO UPDATE SET \
                     isin = excluded.isin, confidence = excluded.confidence, source = excluded.source, \
                     resolution_status = excluded.resolution_status, expires_at = excluded.expires_at, \
                     updated_at = excluded.updated_at",
                params![
                    entry.alias,
                    alias_type_str(entry.alias_type),
                    entry.isin,
                    entry.confidence,
                    entry.source,
                    resolution_status_str(entry.resolution_status),
                    entry.expires_at.map(|t| t.to_rfc3339()),
                    entry.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Deletes negative cache rows past their `expires_at`. Run
    /// opportunistically, not on a timer (§5).
    pub async fn cleanup_expired_negative_cache(&self) -> Result<usize, EngineError> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            let affected = conn.execute(
                "DELETE FROM isin_cache WHERE isin IS NULL AND expires_at IS NOT NULL AND expires_at < ?1",
                params![now],
            )?;
            Ok(affected)
        })
        .await
    }

    // ---- ETF holdings cache --------------------------------------------

    pub async fn get_etf_holdings(
        &self,
        etf_isin: &str,
    ) -> Result<Option<(Vec<EtfHoldingEdge>, DateTime<Utc>)>, EngineError> {
        let etf_isin = etf_isin.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT etf_isin, holding_isin, weight, confidence, last_updated \
                 FROM etf_holdings WHERE etf_isin = ?1",
            )?;
            let rows = stmt
                .query_map(params![etf_isin], row_to_edge)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            if rows.is_empty() {
                return Ok(None);
            }
            let newest = rows.iter().map(|e| e.last_updated).max().unwrap_or_else(Utc::now);
            Ok(Some((rows, newest)))
        })
        .await
    }

    pub async fn put_etf_holdings(
        &self,
        etf_isin: &str,
        edges: &[EtfHoldingEdge],
    ) -> Result<(), EngineError> {
        let etf_isin = etf_isin.to_string();
        let edges = edges.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM etf_holdings WHERE etf_isin = ?1", params![etf_isin])?;
            for edge in &edges {
                tx.execute(
                    "INSERT INTO etf_holdings (etf_isin, holding_isin, weight, confidence, last_updated) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        edge.etf_isin,
                        edge.holding_isin,
                        edge.weight,
                        edge.confidence,
                        edge.last_updated.to_rfc3339(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    // ---- sync bookkeeping -----------------------------------------------

    pub async fn apply_sync(
        &self,
        assets: &[Asset],
        listings: &[(String, String, String, String)],
        aliases: &[Alias],
    ) -> Result<SyncCounts, EngineError> {
        let (assets, listings, aliases) = (assets.to_vec(), listings.to_vec(), aliases.to_vec());
        let counts = self
            .with_conn(move |conn| {
                let tx = conn.unchecked_transaction()?;
                for asset in &assets {
                    tx.execute(
                        "INSERT INTO assets (isin, name, asset_class, base_currency, sector, geography, \
                             enrichment_status, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                         ON CONFLICT(isin) DO UPDATE SET name = excluded.name, \
                             asset_class = excluded.asset_class, base_currency = excluded.base_currency, \
                             sector = excluded.sector, geography = excluded.geography, \
                             enrichment_status = excluded.enrichment_status, updated_at = excluded.updated_at",
                        params![
                            asset.isin,
                            asset.name,
                            asset_class_str(asset.asset_class),
                            asset.base_currency,
                            asset.sector,
                            asset.geography,
                            enrichment_status_str(asset.enrichment_status),
                            asset.updated_at.to_rfc3339(),
                        ],
                    )?;
                }
                for (ticker, exchange, isin, currency) in &listings {
                    tx.execute(
                        "INSERT INTO listings (ticker, exchange, isin, currency) VALUES (?1, ?2, ?3, ?4) \
                         ON CONFLICT(ticker, exchange) DO UPDATE SET isin = excluded.isin, \
                             currency = excluded.currency",
                        params![ticker, exchange, isin, currency],
                    )?;
                }
                for alias in &aliases {
                    tx.execute(
                        "INSERT INTO aliases (alias, isin, alias_type, language, source, confidence, \
                             currency, exchange, currency_source, contributor_hash, contributor_count, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11) \
                         ON CONFLICT(alias, isin) DO UPDATE SET \
                             contributor_count = contributor_count + 1, \
                             confidence = MAX(aliases.confidence, excluded.confidence)",
                        params![
                            alias.alias,
                            alias.isin,
                            alias_type_str(alias.alias_type),
                            alias.language,
                            alias.source,
                            alias.confidence,
                            alias.currency,
                            alias.exchange,
                            alias.currency_source.map(currency_source_str),
                            alias.contributor_hash,
                            Utc::now().to_rfc3339(),
                        ],
                    )?;
                }
                tx.execute(
                    "INSERT INTO sync_state (id, last_sync) VALUES (1, ?1) \
                     ON CONFLICT(id) DO UPDATE SET last_sync = excluded.last_sync",
                    params![Utc::now().to_rfc3339()],
                )?;
                tx.commit()?;
                Ok(SyncCounts { assets: assets.len(), listings: listings.len(), aliases: aliases.len() })
            })
            .await?;
        Ok(counts)
    }

    pub async fn last_sync(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT last_sync FROM sync_state WHERE id = 1", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()
        })
        .await
        .map(|opt| opt.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)))
    }

    pub async fn is_stale(&self, threshold: std::time::Duration) -> Result<bool, EngineError> {
        let threshold = ChronoDuration::from_std(threshold)
            .map_err(|e| EngineError::Fatal(format!("threshold too large: {e}")))?;
        Ok(match self.last_sync().await? {
            Some(last) => Utc::now() - last > threshold,
            None => true,
        })
    }

    /// Row counts across the three identity-domain tables, for `health_check`
    /// (§6).
    pub async fn counts(&self) -> Result<SyncCounts, EngineError> {
        self.with_conn(|conn| {
            let assets = conn.query_row("SELECT COUNT(*) FROM assets", [], |row| row.get::<_, i64>(0))?;
            let listings = conn.query_row("SELECT COUNT(*) FROM listings", [], |row| row.get::<_, i64>(0))?;
            let aliases = conn.query_row("SELECT COUNT(*) FROM aliases", [], |row| row.get::<_, i64>(0))?;
            Ok(SyncCounts {
                assets: assets as usize,
                listings: listings as usize,
                aliases: aliases as usize,
            })
        })
        .await
    }

    // ---- format logs ---------------------------------------------------

    pub async fn log_format_attempt(
        &self,
        alias_example: &str,
        format_type: FormatType,
        api_source: &str,
        success: bool,
    ) -> Result<(), EngineError> {
        let (alias_example, api_source) = (alias_example.to_string(), api_source.to_string());
        let format_type_s = format_type_str(format_type).to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO format_logs (alias_example, format_type, api_source, success, attempted_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![alias_example, format_type_s, api_source, success, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    /// `(total_attempts, successes)` for `api_source`, or over all sources
    /// if `None`.
    pub async fn get_format_stats(&self, api_source: Option<&str>) -> Result<(u64, u64), EngineError> {
        let api_source = api_source.map(str::to_string);
        self.with_conn(move |conn| match &api_source {
            Some(src) => conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM format_logs WHERE api_source = ?1",
                params![src],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
            ),
            None => conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM format_logs",
                [],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
            ),
        })
        .await
    }
}

fn row_to_asset(row: &rusqlite::Row) -> rusqlite::Result<Asset> {
    Ok(Asset {
        isin: row.get(0)?,
        name: row.get(1)?,
        asset_class: parse_asset_class(&row.get::<_, String>(2)?),
        base_currency: row.get(3)?,
        sector: row.get(4)?,
        geography: row.get(5)?,
        enrichment_status: parse_enrichment_status(&row.get::<_, String>(6)?),
        updated_at: parse_dt(&row.get::<_, String>(7)?),
    })
}

fn row_to_cache_entry(row: &rusqlite::Row) -> rusqlite::Result<IsinCacheEntry> {
    Ok(IsinCacheEntry {
        alias: row.get(0)?,
        alias_type: parse_alias_type(&row.get::<_, String>(1)?),
        isin: row.get(2)?,
        confidence: row.get(3)?,
        source: row.get(4)?,
        resolution_status: parse_resolution_status(&row.get::<_, String>(5)?),
        expires_at: row.get::<_, Option<String>>(6)?.map(|s| parse_dt(&s)),
        updated_at: parse_dt(&row.get::<_, String>(7)?),
    })
}

fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<EtfHoldingEdge> {
    Ok(EtfHoldingEdge {
        etf_isin: row.get(0)?,
        holding_isin: row.get(1)?,
        weight: row.get(2)?,
        confidence: row.get(3)?,
        last_updated: parse_dt(&row.get::<_, String>(4)?),
    })
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn asset_class_str(c: AssetClass) -> &'static str {
    match c {
        AssetClass::Stock => "stock",
        AssetClass::Etf => "etf",
        AssetClass::Crypto => "crypto",
        AssetClass::Cash => "cash",
    }
}
fn parse_asset_class(s: &str) -> AssetClass {
    match s {
        "etf" => AssetClass::Etf,
        "crypto" => AssetClass::Crypto,
        "cash" => AssetClass::Cash,
        _ => AssetClass::Stock,
    }
}

fn enrichment_status_str(s: EnrichmentStatus) -> &'static str {
    match s {
        EnrichmentStatus::Stub => "stub",
        EnrichmentStatus::Partial => "partial",
        EnrichmentStatus::Full => "full",
    }
}
fn parse_enrichment_status(s: &str) -> EnrichmentStatus {
    match s {
        "partial" => EnrichmentStatus::Partial,
        "full" => EnrichmentStatus::Full,
        _ => EnrichmentStatus::Stub,
    }
}

fn alias_type_str(t: AliasType) -> &'static str {
    match t {
        AliasType::Name => "name",
        AliasType::Abbreviation => "abbreviation",
        AliasType::LocalName => "local_name",
        AliasType::Ticker => "ticker",
    }
}
fn parse_alias_type(s: &str) -> AliasType {
    match s {
        "abbreviation" => AliasType::Abbreviation,
        "local_name" => AliasType::LocalName,
        "ticker" => AliasType::Ticker,
        _ => AliasType::Name,
    }
}

fn resolution_status_str(s: ResolutionStatus) -> &'static str {
    match s {
        ResolutionStatus::Resolved => "resolved",
        ResolutionStatus::Unresolved => "unresolved",
        ResolutionStatus::Skipped => "skipped",
        ResolutionStatus::Pending => "pending",
    }
}
fn parse_resolution_status(s: &str) -> ResolutionStatus {
    match s {
        "resolved" => ResolutionStatus::Resolved,
        "skipped" => ResolutionStatus::Skipped,
        "pending" => ResolutionStatus::Pending,
        _ => ResolutionStatus::Unresolved,
    }
}

fn currency_source_str(s: CurrencySource) -> &'static str {
    match s {
        CurrencySource::Explicit => "explicit",
        CurrencySource::Inferred => "inferred",
    }
}

fn format_type_str(t: FormatType) -> &'static str {
    match t {
        FormatType::Bloomberg => "bloomberg",
        FormatType::Reuters => "reuters",
        FormatType::YahooDash => "yahoo_dash",
        FormatType::Numeric => "numeric",
        FormatType::Plain => "plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResolutionStatus;

    async fn cache() -> LocalCache {
        LocalCache::open_in_memory().await.expect("open in-memory cache")
    }

    #[tokio::test]
    async fn upsert_listing_then_get_by_ticker_round_trips() {
        let cache = cache().await;
        cache.upsert_listing("NVDA", "US", "US67066G1040", "USD").await.unwrap();
        let isin = cache.get_isin_by_ticker("nvda", Some("us")).await.unwrap();
        assert_eq!(isin.as_deref(), Some("US67066G1040"));
    }

    #[tokio::test]
    async fn contributing_same_alias_increments_contributor_count() {
        let cache = cache().await;
        let alias = Alias {
            alias: "NVIDIA".to_string(),
            isin: "US67066G1040".to_string(),
            alias_type: AliasType::Name,
            language: None,
            source: "api_wikidata".to_string(),
            confidence: 0.80,
            currency: None,
            exchange: None,
            currency_source: None,
            contributor_hash: Some("abc".to_string()),
            contributor_count: 0,
        };
        for _ in 0..3 {
            cache.upsert_alias(&alias).await.unwrap();
        }
        let isin = cache.get_isin_by_alias("nvidia").await.unwrap();
        assert_eq!(isin.as_deref(), Some("US67066G1040"));
    }

    #[tokio::test]
    async fn negative_cache_entries_expire() {
        let cache = cache().await;
        let entry = IsinCacheEntry {
            alias: "UNKNOWNCO".to_string(),
            alias_type: AliasType::Name,
            isin: None,
            confidence: 0.0,
            source: "api_all_failed".to_string(),
            resolution_status: ResolutionStatus::Unresolved,
            expires_at: Some(Utc::now() - ChronoDuration::seconds(1)),
            updated_at: Utc::now(),
        };
        cache.put_cached_resolution(&entry).await.unwrap();
        let removed = cache.cleanup_expired_negative_cache().await.unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get_cached_resolution("UNKNOWNCO", AliasType::Name).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn etf_holdings_round_trip() {
        let cache = cache().await;
        let edges = vec![EtfHoldingEdge {
            etf_isin: "IE00B4L5Y983".to_string(),
            holding_isin: "US67066G1040".to_string(),
            weight: 0.05,
            confidence: 0.90,
            last_updated: Utc::now(),
        }];
        cache.put_etf_holdings("IE00B4L5Y983", &edges).await.unwrap();
        let (fetched, _) = cache.get_etf_holdings("IE00B4L5Y983").await.unwrap().expect("cached");
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].holding_isin, "US67066G1040");
    }

    #[tokio::test]
    async fn fresh_cache_reports_stale_with_no_sync_yet() {
        let cache = cache().await;
        assert!(cache.is_stale(std::time::Duration::from_secs(3600)).await.unwrap());
    }
}
