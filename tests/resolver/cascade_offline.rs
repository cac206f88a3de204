//! Exercises the Identity Resolver's API cascade (§4.4 steps 6-9) against a
//! mocked Wikidata/Finnhub/Yahoo/Hive surface — the offline counterpart to
//! the teacher's `history::retry_synthetic` style of test.

use httpmock::Method::GET;
use httpmock::MockServer;

use true_exposure::cache::LocalCache;
use true_exposure::core::client::HttpClient;
use true_exposure::core::types::ResolutionStatus;
use true_exposure::hive::HiveClient;
use true_exposure::resolver::{confidence, IdentityResolver, ResolveRequest};

use crate::common::offline_config;

fn wikidata_response(isin: &str) -> serde_json::Value {
    serde_json::json!({
        "results": { "bindings": [ { "isin": { "value": isin } } ] }
    })
}

fn finnhub_response(symbol: &str, isin: &str) -> serde_json::Value {
    serde_json::json!({ "result": [ { "symbol": symbol, "isin": isin } ] })
}

fn yahoo_response(symbol: &str, isin: &str) -> serde_json::Value {
    serde_json::json!({ "quotes": [ { "symbol": symbol, "isin": isin } ] })
}

async fn build_resolver(server: &MockServer) -> (IdentityResolver, LocalCache) {
    let config = offline_config(server);
    let cache = LocalCache::open_in_memory().await.expect("open cache");
    let http = HttpClient::new(&config.user_agent);
    let hive = HiveClient::new(http.clone(), &config.hive_base_url);
    let resolver = IdentityResolver::new(&config, cache.clone(), hive, http, "test-salt").expect("build resolver");
    (resolver, cache)
}

#[tokio::test]
async fn wikidata_hit_is_cached_locally_and_not_queried_again() {
    let server = MockServer::start();

    let hive_miss = server.mock(|when, then| {
        when.method(GET).path("/hive/aliases/lookup");
        then.status(404);
    });
    let wikidata_hit = server.mock(|when, then| {
        when.method(GET).path("/wikidata/sparql");
        then.status(200)
            .header("content-type", "application/json")
            .body(wikidata_response("US67066G1040").to_string());
    });

    let (resolver, cache) = build_resolver(&server).await;
    let req = ResolveRequest {
        name: Some("NVIDIA Corp".to_string()),
        weight: Some(1.0),
        ..Default::default()
    };

    let first = resolver.resolve(&req).await.expect("first resolve");
    assert_eq!(first.isin.as_deref(), Some("US67066G1040"));
    assert_eq!(first.source.as_deref(), Some("api_wikidata"));
    assert_eq!(first.confidence, confidence::WIKIDATA);
    wikidata_hit.assert_hits(1);

    // Second resolve for the same company should short-circuit at the local
    // alias cache (step 3), never touching Wikidata again.
    let second = resolver.resolve(&req).await.expect("second resolve");
    assert_eq!(second.isin.as_deref(), Some("US67066G1040"));
    assert!(second.source.as_deref().unwrap().starts_with("local_cache"));
    assert_eq!(second.confidence, confidence::LOCAL_CACHE);
    wikidata_hit.assert_hits(1);

    assert_eq!(cache.get_isin_by_alias("NVIDIA CORP").await.unwrap().as_deref(), Some("US67066G1040"));
    let _ = hive_miss;
}

#[tokio::test]
async fn finnhub_miss_falls_through_to_yahoo() {
    let server = MockServer::start();

    let hive_miss = server.mock(|when, then| {
        when.method(GET).path("/hive/listings/resolve");
        then.status(404);
    });
    let wikidata_empty = server.mock(|when, then| {
        when.method(GET).path("/wikidata/sparql");
        then.status(200)
            .header("content-type", "application/json")
            .body(serde_json::json!({ "results": { "bindings": [] } }).to_string());
    });
    let finnhub_miss = server.mock(|when, then| {
        when.method(GET).path("/finnhub/search");
        then.status(200)
            .header("content-type", "application/json")
            .body(serde_json::json!({ "result": [] }).to_string());
    });
    let yahoo_hit = server.mock(|when, then| {
        when.method(GET).path("/yahoo/v1/finance/search");
        then.status(200)
            .header("content-type", "application/json")
            .body(yahoo_response("NVDA", "US67066G1040").to_string());
    });

    let (resolver, _cache) = build_resolver(&server).await;
    let req = ResolveRequest {
        ticker: Some("NVDA".to_string()),
        name: Some("NVIDIA Corp".to_string()),
        weight: Some(1.0),
        ..Default::default()
    };

    let result = resolver.resolve(&req).await.expect("resolve");
    assert_eq!(result.isin.as_deref(), Some("US67066G1040"));
    assert_eq!(result.source.as_deref(), Some("api_yahoo"));
    assert_eq!(result.confidence, confidence::YAHOO);
    assert_eq!(result.status, ResolutionStatus::Resolved);

    wikidata_empty.assert_hits(1);
    finnhub_miss.assert_hits(1);
    yahoo_hit.assert_hits(1);
    let _ = hive_miss;
}

#[tokio::test]
async fn exhausted_finnhub_bucket_degrades_to_yahoo_without_an_error() {
    let server = MockServer::start();

    let hive_miss = server.mock(|when, then| {
        when.method(GET).path("/hive/listings/resolve");
        then.status(404);
    });
    let finnhub_hit_nvda = server.mock(|when, then| {
        when.method(GET).path("/finnhub/search").query_param("q", "NVDA");
        then.status(200)
            .header("content-type", "application/json")
            .body(finnhub_response("NVDA", "US67066G1040").to_string());
    });
    let finnhub_aapl = server.mock(|when, then| {
        when.method(GET).path("/finnhub/search").query_param("q", "AAPL");
        then.status(200)
            .header("content-type", "application/json")
            .body(finnhub_response("AAPL", "US0378331005").to_string());
    });
    let yahoo_hit_aapl = server.mock(|when, then| {
        when.method(GET).path("/yahoo/v1/finance/search").query_param("q", "AAPL");
        then.status(200)
            .header("content-type", "application/json")
            .body(yahoo_response("AAPL", "US0378331005").to_string());
    });

    let mut config = offline_config(&server);
    config.finnhub_calls_per_minute = 1;
    let cache = LocalCache::open_in_memory().await.expect("open cache");
    let http = HttpClient::new(&config.user_agent);
    let hive = HiveClient::new(http.clone(), &config.hive_base_url);
    let resolver = IdentityResolver::new(&config, cache, hive, http, "test-salt").expect("build resolver");

    // First call consumes the single token in the bucket.
    let first = resolver
        .resolve(&ResolveRequest { ticker: Some("NVDA".to_string()), weight: Some(1.0), ..Default::default() })
        .await
        .expect("first resolve");
    assert_eq!(first.source.as_deref(), Some("api_finnhub"));
    finnhub_hit_nvda.assert_hits(1);

    // Second call's bucket is exhausted: Finnhub is skipped entirely (never
    // hit) and the cascade degrades to Yahoo instead of erroring (§8
    // scenario 6, "Rate-limited Finnhub").
    let second = resolver
        .resolve(&ResolveRequest { ticker: Some("AAPL".to_string()), weight: Some(1.0), ..Default::default() })
        .await
        .expect("second resolve");
    assert_eq!(second.isin.as_deref(), Some("US0378331005"));
    assert_eq!(second.source.as_deref(), Some("api_yahoo"));
    assert_eq!(second.status, ResolutionStatus::Resolved);

    finnhub_aapl.assert_hits(0);
    yahoo_hit_aapl.assert_hits(1);
    let _ = hive_miss;
}

#[tokio::test]
async fn name_with_no_safe_variant_never_reaches_wikidata_http() {
    let server = MockServer::start();
    let wikidata_mock = server.mock(|when, then| {
        when.method(GET).path("/wikidata/sparql");
        then.status(200).body(serde_json::json!({ "results": { "bindings": [] } }).to_string());
    });
    let hive_miss = server.mock(|when, then| {
        when.method(GET).path("/hive/aliases/lookup");
        then.status(404);
    });

    let (resolver, _cache) = build_resolver(&server).await;
    // Punctuation-only: `canonicalize_name` strips it down to the empty
    // string, so the only surviving variant is the raw (unsafe) original,
    // which `try_wikidata` filters out before ever building a query.
    let req = ResolveRequest {
        name: Some("\" . }} ; {{".to_string()),
        weight: Some(1.0),
        ..Default::default()
    };

    let result = resolver.resolve(&req).await.expect("resolve");
    assert_eq!(result.status, ResolutionStatus::Unresolved);
    wikidata_mock.assert_hits(0);
    let _ = hive_miss;
}
