//! End-to-end Decomposer scenarios (§4.6, §8) wiring the cache, a mocked
//! Hive, a configured adapter, and the real resolver together — the level
//! below a full `Orchestrator` run, which needs a real on-disk app data dir.

use std::collections::HashSet;

use httpmock::Method::GET;
use httpmock::MockServer;

use true_exposure::adapters::{AdapterRegistry, Issuer, IssuerEndpoints};
use true_exposure::adapters::manual::ManualFileStore;
use true_exposure::cache::LocalCache;
use true_exposure::core::client::HttpClient;
use true_exposure::decompose::{Decomposer, EtfStatus};
use true_exposure::hive::HiveClient;
use true_exposure::resolver::IdentityResolver;

use crate::common::offline_config;

async fn build_decomposer(server: &MockServer, manual_dir: &std::path::Path) -> (Decomposer, LocalCache) {
    let config = offline_config(server);
    let cache = LocalCache::open_in_memory().await.expect("open cache");
    let http = HttpClient::new(&config.user_agent);
    let hive = HiveClient::new(http.clone(), &config.hive_base_url);
    let resolver =
        IdentityResolver::new(&config, cache.clone(), hive.clone(), http.clone(), "test-salt").expect("resolver");
    let manual_store = ManualFileStore::new(manual_dir);
    let mut adapters = AdapterRegistry::new(manual_store, http, config.timeouts.adapter);
    adapters.configure(
        Issuer::Ishares,
        IssuerEndpoints {
            json_url_template: Some(format!("{}/etf/{{isin}}.json", server.base_url())),
            ..Default::default()
        },
    );
    let decomposer = Decomposer::new(&config, cache.clone(), hive, adapters, resolver).expect("decomposer");
    (decomposer, cache)
}

#[tokio::test]
async fn etf_decomposes_into_resolved_underlying_rows_via_configured_adapter() {
    let server = MockServer::start();
    let etf_isin = "IE00B4L5Y983";

    let hive_miss = server.mock(|when, then| {
        when.method(GET).path(format!("/hive/etf-holdings/{etf_isin}"));
        then.status(404);
    });
    let adapter_hit = server.mock(|when, then| {
        when.method(GET).path(format!("/etf/{etf_isin}.json"));
        then.status(200).body(
            serde_json::json!({
                "holdings": [
                    { "ticker": "NVDA", "name": "Nvidia Corp", "weight": 0.05 },
                    { "ticker": "AAPL", "name": "Apple Inc", "weight": 0.03 },
                ]
            })
            .to_string(),
        );
    });

    let tmp = tempfile::tempdir().expect("tempdir");
    let (decomposer, cache) = build_decomposer(&server, tmp.path()).await;
    cache.upsert_listing("NVDA", "US", "US67066G1040", "USD").await.unwrap();
    cache.upsert_listing("AAPL", "US", "US0378331005", "USD").await.unwrap();

    let mut visited = HashSet::new();
    let outcome = decomposer
        .decompose_etf(etf_isin, "iShares Core S&P 500", 0.20, &mut visited)
        .await
        .expect("decompose");

    adapter_hit.assert_hits(1);
    let _ = hive_miss;

    assert_eq!(outcome.rows.len(), 2);
    assert!(outcome.manual_upload_required.is_none());
    let nvda = outcome.rows.iter().find(|r| r.isin.as_deref() == Some("US67066G1040")).expect("nvda row");
    assert!((nvda.weight_within_etf - 0.05).abs() < 1e-9);
    assert!((nvda.effective_weight - 0.01).abs() < 1e-9); // 0.05 * 0.20 portfolio weight

    let summary = outcome.summaries.iter().find(|s| s.isin == etf_isin).expect("summary");
    assert_eq!(summary.status, EtfStatus::Success);
    assert_eq!(summary.holdings_count, 2);

    // The freshly-decomposed edges are cached locally for the next run.
    let (cached_edges, _) = cache.get_etf_holdings(etf_isin).await.unwrap().expect("cached");
    assert_eq!(cached_edges.len(), 2);
}

#[tokio::test]
async fn issuer_with_no_endpoints_and_no_manual_file_surfaces_manual_upload_required() {
    let server = MockServer::start();
    let etf_isin = "ZZ00000000ZZ"; // no ISIN-prefix match: detect_issuer -> Unknown

    let hive_miss = server.mock(|when, then| {
        when.method(GET).path(format!("/hive/etf-holdings/{etf_isin}"));
        then.status(404);
    });

    let tmp = tempfile::tempdir().expect("tempdir");
    let (decomposer, _cache) = build_decomposer(&server, tmp.path()).await;

    let mut visited = HashSet::new();
    let outcome = decomposer
        .decompose_etf(etf_isin, "Some Obscure Fund", 0.10, &mut visited)
        .await
        .expect("decompose returns Ok with a failure recorded, not an Err");

    let _ = hive_miss;
    assert!(outcome.rows.is_empty());
    let failure = outcome.manual_upload_required.expect("manual upload required");
    assert_eq!(failure.isin, etf_isin);
    assert_eq!(failure.provider, "unknown");

    let summary = outcome.summaries.iter().find(|s| s.isin == etf_isin).expect("summary");
    assert_eq!(summary.status, EtfStatus::Failed);
    assert_eq!(summary.source, "manual_upload_required");
}

#[tokio::test]
async fn re_entrant_etf_is_treated_as_an_opaque_leaf_not_infinite_recursion() {
    let server = MockServer::start();
    let tmp = tempfile::tempdir().expect("tempdir");
    let (decomposer, _cache) = build_decomposer(&server, tmp.path()).await;

    let etf_isin = "IE00B4L5Y983";
    let mut visited = HashSet::new();
    visited.insert(etf_isin.to_string());

    let outcome = decomposer
        .decompose_etf(etf_isin, "iShares Core S&P 500", 0.5, &mut visited)
        .await
        .expect("decompose");

    assert_eq!(outcome.rows.len(), 1);
    assert_eq!(outcome.rows[0].resolution_detail, "cyclic_etf_leaf");
    assert_eq!(outcome.rows[0].effective_weight, 0.5);
    assert!(outcome.summaries.is_empty());
}
