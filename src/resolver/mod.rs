//! The Identity Resolver (§4.4) — the cascade that turns a `(ticker, name,
//! provider_isin?, weight?)` tuple into a canonical ISIN, minimizing
//! rate-limited API calls while maximizing correctness.

pub mod finnhub;
pub mod wikidata;
pub mod yahoo;

use chrono::{Duration as ChronoDuration, Utc};

use crate::{
    cache::LocalCache,
    core::{
        client::HttpClient,
        config::EngineConfig,
        error::EngineError,
        isin,
        types::{Alias, AliasType, CurrencySource, IsinCacheEntry, ResolutionResult, ResolutionStatus},
    },
    hive::{self, HiveClient},
    normalize,
};

/// The fixed confidence ladder (§4.4). The resolver never emits a confidence
/// outside this set; the aggregator treats them as ordered.
pub mod confidence {
    pub const PROVIDER: f64 = 1.00;
    pub const LOCAL_CACHE: f64 = 0.95;
    pub const COMMUNITY: f64 = 0.90;
    pub const MANUAL: f64 = 0.85;
    pub const WIKIDATA: f64 = 0.80;
    pub const FINNHUB: f64 = 0.75;
    pub const YAHOO: f64 = 0.70;
}

/// Whether a holding is eligible for network resolution. Tier 2 holdings may
/// only consume cached data (§4.4 "primary rate-limit guard").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    One,
    Two,
}

/// A holding with no weight context (e.g. resolved outside a portfolio run)
/// defaults to Tier 1 — there is nothing to gate against.
#[must_use]
pub fn classify_tier(weight: Option<f64>, threshold: f64) -> Tier {
    match weight {
        Some(w) if w <= threshold => Tier::Two,
        _ => Tier::One,
    }
}

/// Input to one resolve call.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    pub ticker: Option<String>,
    pub name: Option<String>,
    pub provider_isin: Option<String>,
    /// Weight within the containing ETF or portfolio, used for the tier
    /// gate. `None` defaults to Tier 1.
    pub weight: Option<f64>,
}

/// The cascaded resolver. Cheap to clone: every field is either `Clone`-ably
/// cheap (`LocalCache`, `HiveClient`) or owned configuration.
pub struct IdentityResolver {
    cache: LocalCache,
    hive: HiveClient,
    wikidata: wikidata::WikidataClient,
    finnhub: Option<finnhub::FinnhubClient>,
    yahoo: yahoo::YahooClient,
    tier1_threshold: f64,
    negative_cache_ttl: ChronoDuration,
    install_salt: String,
}

impl IdentityResolver {
    pub fn new(
        config: &EngineConfig,
        cache: LocalCache,
        hive: HiveClient,
        http: HttpClient,
        install_salt: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let negative_cache_ttl = ChronoDuration::from_std(config.negative_cache_ttl)
            .map_err(|e| EngineError::Fatal(format!("negative_cache_ttl out of range: {e}")))?;
        let finnhub = config.finnhub_api_key.clone().map(|key| {
            finnhub::FinnhubClient::new(
                http.clone(),
                config.finnhub_base_url.clone(),
                key,
                config.timeouts.finnhub,
                config.finnhub_calls_per_minute,
            )
        });
        Ok(Self {
            cache,
            hive,
            wikidata: wikidata::WikidataClient::new(
                http.clone(),
                config.wikidata_sparql_url.clone(),
                config.timeouts.wikidata,
            ),
            finnhub,
            yahoo: yahoo::YahooClient::new(http, config.yahoo_base_url.clone(), config.timeouts.yahoo),
            tier1_threshold: config.tier1_weight_threshold,
            negative_cache_ttl,
            install_salt: install_salt.into(),
        })
    }

    /// Run the full cascade (§4.4, steps 1-9).
    pub async fn resolve(&self, req: &ResolveRequest) -> Result<ResolutionResult, EngineError> {
        // 1. provider ISIN, if structurally valid, wins outright.
        if let Some(provider_isin) = &req.provider_isin {
            if isin::has_valid_shape(provider_isin) {
                return Ok(ResolutionResult::resolved(
                    provider_isin.clone(),
                    "provider",
                    confidence::PROVIDER,
                ));
            }
            // malformed provider ISIN: fall through to normal resolution.
        }

        // 2. normalize.
        let ticker_variants = req
            .ticker
            .as_deref()
            .map(normalize::generate_variants)
            .unwrap_or_default();
        let name_variants = req.name.as_deref().map(normalize::name_variants).unwrap_or_default();

        if ticker_variants.is_empty() && name_variants.is_empty() {
            return Ok(ResolutionResult::unresolved("no_identifiers"));
        }

        // 3. local positive cache.
        for variant in &ticker_variants {
            if let Some(isin) = self.cache.get_isin_by_ticker(variant, None).await? {
                return Ok(ResolutionResult::resolved(isin, "local_cache_ticker", confidence::LOCAL_CACHE));
            }
        }
        for variant in &name_variants {
            if let Some(isin) = self.cache.get_isin_by_alias(variant).await? {
                return Ok(ResolutionResult::resolved(isin, "local_cache_alias", confidence::LOCAL_CACHE));
            }
        }

        // 4. local negative cache.
        let cache_key = ticker_variants
            .first()
            .map(|t| (t.clone(), AliasType::Ticker))
            .or_else(|| name_variants.first().map(|n| (n.clone(), AliasType::Name)));
        if let Some((alias, alias_type)) = &cache_key {
            if let Some(entry) = self.cache.get_cached_resolution(alias, *alias_type).await? {
                let expired = entry.expires_at.is_some_and(|exp| exp < Utc::now());
                if entry.isin.is_none() && !expired {
                    return Ok(ResolutionResult::unresolved("cached_negative"));
                }
            }
        }

        // 5. tier-2 gate.
        if classify_tier(req.weight, self.tier1_threshold) == Tier::Two {
            return Ok(ResolutionResult::skipped("tier2_skipped"));
        }

        // 6. community store.
        for variant in &ticker_variants {
            if let Some(isin) = self.hive.resolve_ticker(variant, None).await.unwrap_or(None) {
                self.write_back_and_return(&cache_key, &isin, "hive_ticker", confidence::COMMUNITY).await?;
                return Ok(ResolutionResult::resolved(isin, "hive_ticker", confidence::COMMUNITY));
            }
        }
        for variant in &name_variants {
            if let Some(hit) = self.hive.lookup_by_alias(variant).await.unwrap_or(None) {
                self.write_back_and_return(&cache_key, &hit.isin, "hive_alias", confidence::COMMUNITY).await?;
                return Ok(ResolutionResult::resolved(hit.isin, "hive_alias", confidence::COMMUNITY));
            }
        }

        // 7. API cascade.
        if let Some(isin) = self.try_wikidata(&name_variants).await {
            self.eager_contribute(&cache_key, &isin, "api_wikidata", confidence::WIKIDATA).await;
            return Ok(ResolutionResult::resolved(isin, "api_wikidata", confidence::WIKIDATA));
        }
        if let Some(isin) = self.try_finnhub(&ticker_variants).await {
            self.eager_contribute(&cache_key, &isin, "api_finnhub", confidence::FINNHUB).await;
            return Ok(ResolutionResult::resolved(isin, "api_finnhub", confidence::FINNHUB));
        }
        if let Some(isin) = self.try_yahoo(&ticker_variants).await {
            self.eager_contribute(&cache_key, &isin, "api_yahoo", confidence::YAHOO).await;
            return Ok(ResolutionResult::resolved(isin, "api_yahoo", confidence::YAHOO));
        }

        // 9. complete failure: negative-cache and report.
        if let Some((alias, alias_type)) = &cache_key {
            let entry = IsinCacheEntry {
                alias: alias.clone(),
                alias_type: *alias_type,
                isin: None,
                confidence: 0.0,
                source: "api_all_failed".to_string(),
                resolution_status: ResolutionStatus::Unresolved,
                expires_at: Some(Utc::now() + self.negative_cache_ttl),
                updated_at: Utc::now(),
            };
            // cache errors degrade: resolver still reports the miss.
            let _ = self.cache.put_cached_resolution(&entry).await;
        }
        Ok(ResolutionResult::unresolved("api_all_failed"))
    }

    async fn try_wikidata(&self, name_variants: &[String]) -> Option<String> {
        let safe_variants: Vec<String> =
            name_variants.iter().filter(|v| wikidata::is_safe_variant(v)).cloned().collect();
        if safe_variants.is_empty() {
            return None;
        }
        let result = self.wikidata.resolve(&safe_variants).await;
        let success = matches!(&result, Ok(Some(_)));
        if let Some(example) = safe_variants.first() {
            let _ = self
                .cache
                .log_format_attempt(example, normalize::detect_format(example), "api_wikidata", success)
                .await;
        }
        result.ok().flatten()
    }

    async fn try_finnhub(&self, ticker_variants: &[String]) -> Option<String> {
        let finnhub = self.finnhub.as_ref()?;
        let primary = ticker_variants.first()?;
        let result = finnhub.resolve(primary).await;
        let success = matches!(&result, Ok(Some(_)));
        let _ = self
            .cache
            .log_format_attempt(primary, normalize::detect_format(primary), "api_finnhub", success)
            .await;
        result.ok().flatten()
    }

    async fn try_yahoo(&self, ticker_variants: &[String]) -> Option<String> {
        if ticker_variants.is_empty() {
            return None;
        }
        let top_two: Vec<String> = ticker_variants.iter().take(2).cloned().collect();
        let result = self.yahoo.resolve(&top_two).await;
        let success = matches!(&result, Ok(Some(_)));
        if let Some(example) = top_two.first() {
            let _ = self
                .cache
                .log_format_attempt(example, normalize::detect_format(example), "api_yahoo", success)
                .await;
        }
        result.ok().flatten()
    }

    async fn write_back_and_return(
        &self,
        cache_key: &Option<(String, AliasType)>,
        isin: &str,
        source: &str,
        confidence: f64,
    ) -> Result<(), EngineError> {
        if let Some((alias, alias_type)) = cache_key {
            let entry = IsinCacheEntry {
                alias: alias.clone(),
                alias_type: *alias_type,
                isin: Some(isin.to_string()),
                confidence,
                source: source.to_string(),
                resolution_status: ResolutionStatus::Resolved,
                expires_at: None,
                updated_at: Utc::now(),
            };
            // cache errors degrade: the resolution still succeeds this call.
            let _ = self.cache.put_cached_resolution(&entry).await;
        }
        Ok(())
    }

    /// Upsert into the local cache immediately, then push to the community
    /// store on a detached task so the contribution never blocks the
    /// cascade (§4.4 step 8, §9 "message passing").
    async fn eager_contribute(
        &self,
        cache_key: &Option<(String, AliasType)>,
        isin: &str,
        source: &str,
        confidence: f64,
    ) {
        let Some((alias, alias_type)) = cache_key else { return };
        let _ = self.write_back_and_return(cache_key, isin, source, confidence).await;

        let currency_source = CurrencySource::Inferred;
        let contributor_hash = hive::contributor_hash(&self.install_salt, alias, isin);
        let alias_record = Alias {
            alias: alias.clone(),
            isin: isin.to_string(),
            alias_type: *alias_type,
            language: None,
            source: source.to_string(),
            confidence,
            currency: None,
            exchange: None,
            currency_source: Some(currency_source),
            contributor_hash: Some(contributor_hash.clone()),
            contributor_count: 1,
        };
        let _ = self.cache.upsert_alias(&alias_record).await;

        let hive = self.hive.clone();
        let (alias, isin, alias_type, source, confidence) =
            (alias.clone(), isin.to_string(), *alias_type, source.to_string(), confidence);
        tokio::spawn(async move {
            let _ = hive
                .contribute_alias(
                    &alias,
                    &isin,
                    alias_type,
                    None,
                    &source,
                    confidence,
                    None,
                    None,
                    Some(currency_source),
                    Some(&contributor_hash),
                )
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_classification_follows_threshold() {
        assert_eq!(classify_tier(Some(0.01), 0.005), Tier::One);
        assert_eq!(classify_tier(Some(0.001), 0.005), Tier::Two);
        assert_eq!(classify_tier(Some(0.005), 0.005), Tier::Two);
        assert_eq!(classify_tier(None, 0.005), Tier::One);
    }

    async fn resolver_with_empty_cache() -> (IdentityResolver, LocalCache) {
        let cache = LocalCache::open_in_memory().await.expect("open cache");
        let config = EngineConfig::default();
        let http = HttpClient::new(&config.user_agent);
        let hive = HiveClient::new(http.clone(), &config.hive_base_url);
        let resolver =
            IdentityResolver::new(&config, cache.clone(), hive, http, "test-salt").expect("build resolver");
        (resolver, cache)
    }

    #[tokio::test]
    async fn valid_provider_isin_resolves_outright() {
        let (resolver, _cache) = resolver_with_empty_cache().await;
        let req = ResolveRequest {
            provider_isin: Some("US67066G1040".to_string()),
            ..Default::default()
        };
        let result = resolver.resolve(&req).await.expect("resolve");
        assert_eq!(result.isin.as_deref(), Some("US67066G1040"));
        assert_eq!(result.source.as_deref(), Some("provider"));
        assert_eq!(result.confidence, confidence::PROVIDER);
        assert_eq!(result.status, ResolutionStatus::Resolved);
    }

    #[tokio::test]
    async fn tier2_holding_with_no_cache_hit_is_skipped_without_network() {
        let (resolver, _cache) = resolver_with_empty_cache().await;
        let req = ResolveRequest {
            ticker: Some("SOMEOBSCURETHING".to_string()),
            weight: Some(0.0001),
            ..Default::default()
        };
        let result = resolver.resolve(&req).await.expect("resolve");
        assert_eq!(result.status, ResolutionStatus::Skipped);
        assert_eq!(result.detail, "tier2_skipped");
    }

    #[tokio::test]
    async fn local_positive_cache_hit_short_circuits_the_cascade() {
        let (resolver, cache) = resolver_with_empty_cache().await;
        cache.upsert_listing("NVDA", "US", "US67066G1040", "USD").await.unwrap();
        let req = ResolveRequest {
            ticker: Some("NVDA US".to_string()),
            weight: Some(1.0),
            ..Default::default()
        };
        let result = resolver.resolve(&req).await.expect("resolve");
        assert_eq!(result.isin.as_deref(), Some("US67066G1040"));
        assert!(result.source.as_deref().unwrap().starts_with("local_cache"));
        assert_eq!(result.confidence, confidence::LOCAL_CACHE);
    }

    #[tokio::test]
    async fn no_identifiers_is_unresolved_without_touching_the_cache() {
        let (resolver, _cache) = resolver_with_empty_cache().await;
        let result = resolver.resolve(&ResolveRequest::default()).await.expect("resolve");
        assert_eq!(result.status, ResolutionStatus::Unresolved);
        assert_eq!(result.detail, "no_identifiers");
    }
}
