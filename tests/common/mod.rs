use httpmock::MockServer;
use true_exposure::core::config::EngineConfig;

/// An `EngineConfig` with every external base URL rewired onto `server`, so a
/// resolve/decompose call never reaches the real Wikidata/Finnhub/Yahoo/Hive
/// endpoints. Each base URL gets its own path segment so mocks for different
/// providers never collide on the same `MockServer`.
pub fn offline_config(server: &MockServer) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.wikidata_sparql_url = format!("{}/wikidata/sparql", server.base_url());
    config.finnhub_base_url = format!("{}/finnhub", server.base_url());
    config.finnhub_api_key = Some("test-key".to_string());
    config.yahoo_base_url = format!("{}/yahoo", server.base_url());
    config.hive_base_url = format!("{}/hive", server.base_url());
    config
}
