//! Wikidata SPARQL lookups (§4.4 step 7a): one query per resolve call,
//! binding all name variants in a single `VALUES` block.
//!
//! The block is built from a fixed allow-list of characters rather than
//! interpolating caller input directly — there is no parameterized-query
//! mechanism over HTTP SPARQL endpoints, so the "positional parameter
//! mechanism that disallows raw interpolation" the spec calls for is
//! implemented as a strict allow-list filter applied before any variant is
//! placed in the query text.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::core::{client::HttpClient, error::EngineError, net};

static SAFE_VARIANT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9 .&\-]+$").expect("static regex"));

/// `true` if `variant` contains only characters from the allow-list
/// `[A-Za-z0-9 .&-]`. Anything else is rejected rather than escaped, per the
/// testable property: "SPARQL builder rejects any variant containing
/// characters outside [...] rather than interpolating them".
#[must_use]
pub fn is_safe_variant(variant: &str) -> bool {
    !variant.is_empty() && SAFE_VARIANT.is_match(variant)
}

/// Build the SPARQL query for a set of name variants. Returns
/// `Err(UnsafeSparqlInput)` naming the first offending variant instead of
/// silently dropping or escaping it, so callers can log and skip.
pub fn build_query(name_variants: &[String]) -> Result<String, EngineError> {
    for variant in name_variants {
        if !is_safe_variant(variant) {
            return Err(EngineError::UnsafeSparqlInput(variant.clone()));
        }
    }
    let values = name_variants
        .iter()
        .map(|v| format!("\"{v}\"@en"))
        .collect::<Vec<_>>()
        .join(" ");
    Ok(format!(
        "SELECT ?item ?itemLabel ?isin WHERE {{\n\
           VALUES ?label {{ {values} }}\n\
           ?item rdfs:label ?label.\n\
           ?item wdt:P946 ?isin.\n\
           SERVICE wikibase:label {{ bd:serviceParam wikibase:language \"en\". }}\n\
         }} LIMIT 1"
    ))
}

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}
#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<SparqlBinding>,
}
#[derive(Debug, Deserialize)]
struct SparqlBinding {
    isin: SparqlValue,
}
#[derive(Debug, Deserialize)]
struct SparqlValue {
    value: String,
}

/// Thin client over a Wikidata-compatible SPARQL endpoint.
pub struct WikidataClient {
    http: HttpClient,
    endpoint: String,
    timeout: std::time::Duration,
}

impl WikidataClient {
    #[must_use]
    pub fn new(http: HttpClient, endpoint: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self { http, endpoint: endpoint.into(), timeout }
    }

    /// Run one query against all `name_variants`, returning the first ISIN
    /// bound by the endpoint, if any.
    pub async fn resolve(&self, name_variants: &[String]) -> Result<Option<String>, EngineError> {
        if name_variants.is_empty() {
            return Ok(None);
        }
        let query = build_query(name_variants)?;
        let req = self
            .http
            .raw()
            .get(&self.endpoint)
            .query(&[("query", query.as_str()), ("format", "json")])
            .header("Accept", "application/sparql-results+json");
        let resp = net::with_soft_timeout("wikidata", self.timeout, async {
            self.http.send_with_retry(req, None).await
        })
        .await?;
        let body = net::get_text(resp, "wikidata").await?;
        let parsed: SparqlResponse =
            serde_json::from_str(&body).map_err(|e| EngineError::Data(e.to_string()))?;
        Ok(parsed
            .results
            .bindings
            .into_iter()
            .next()
            .map(|b| b.isin.value)
            .filter(|isin| crate::core::isin::has_valid_shape(isin)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_variants_pass_the_allow_list() {
        assert!(is_safe_variant("NVIDIA"));
        assert!(is_safe_variant("AT&T"));
        assert!(is_safe_variant("Vanguard S&P 500"));
    }

    #[test]
    fn unsafe_variants_are_rejected_not_escaped() {
        assert!(!is_safe_variant("NVIDIA\" . }} DROP ALL ; {{"));
        assert!(!is_safe_variant(""));
        assert!(!is_safe_variant("NVIDIA{curly}"));
    }

    #[test]
    fn build_query_rejects_first_unsafe_variant() {
        let err = build_query(&["NVIDIA".to_string(), "bad\"quote".to_string()]).unwrap_err();
        assert!(matches!(err, EngineError::UnsafeSparqlInput(v) if v == "bad\"quote"));
    }

    #[test]
    fn build_query_embeds_every_safe_variant() {
        let query = build_query(&["NVIDIA".to_string(), "NVIDIA CORP".to_string()]).unwrap();
        assert!(query.contains("\"NVIDIA\"@en"));
        assert!(query.contains("\"NVIDIA CORP\"@en"));
        assert!(query.contains("VALUES ?label"));
    }
}
