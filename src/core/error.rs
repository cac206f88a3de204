use thiserror::Error;

/// Tagged error variants for the engine. These are never used for ordinary
/// control flow inside the resolver cascade — degrade-and-continue there is
/// modeled by returning `Ok` with a lower-confidence `ResolutionResult`, not
/// by propagating an `Err`. `EngineError` is for faults that a caller above
/// the resolver (decomposer, orchestrator, ingestion) must decide how to
/// handle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("unexpected response status {status} at {url}")]
    Status { status: u16, url: String },

    #[error("request to {endpoint} timed out after {elapsed_ms}ms")]
    Timeout { endpoint: String, elapsed_ms: u128 },

    #[error("rate limited by {endpoint}")]
    RateLimited { endpoint: String },

    #[error("local cache error: {0}")]
    Cache(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{alias} ({alias_type}) could not be resolved by any source")]
    NotFound { alias: String, alias_type: String },

    #[error("ETF {isin} ({provider}) requires a manually uploaded holdings file")]
    ManualUploadRequired {
        isin: String,
        provider: String,
        download_url: Option<String>,
    },

    #[error("data format unexpected or missing field: {0}")]
    Data(String),

    #[error("SPARQL variant rejected, contains disallowed characters: {0:?}")]
    UnsafeSparqlInput(String),

    #[error("invalid date range: start must be before end")]
    InvalidDates,

    #[error("no positions supplied to the pipeline")]
    EmptyPortfolio,

    #[error("programmer error / invariant violation: {0}")]
    Fatal(String),
}

impl EngineError {
    /// True for faults that the resolver cascade treats as "move to the next
    /// step" rather than a reason to abort the whole resolve call.
    #[must_use]
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::Status { .. }
                | Self::Cache(_)
                | Self::Data(_)
                | Self::Url(_)
        )
    }
}
