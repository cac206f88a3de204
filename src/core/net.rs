//! Shared helpers for turning an HTTP response into the `EngineError`
//! variants the resolver cascade and adapters degrade on.

use std::time::Duration;

use super::error::EngineError;

/// Read the response body as text, mapping a non-success status to the
/// right tagged variant. `endpoint` is a short tag like `"wikidata"` used
/// only for error messages and metrics, never interpolated into a request.
pub(crate) async fn get_text(
    resp: reqwest::Response,
    endpoint: &str,
) -> Result<String, EngineError> {
    let status = resp.status();
    let url = resp.url().to_string();
    if !status.is_success() {
        return Err(match status.as_u16() {
            429 => EngineError::RateLimited {
                endpoint: endpoint.to_string(),
            },
            code => EngineError::Status { status: code, url },
        });
    }
    Ok(resp.text().await?)
}

/// Run a future against a soft per-step timeout (§5: every external call
/// carries one). Timing out is degradable, not fatal — the caller treats it
/// like any other cascade-step failure and moves on.
pub(crate) async fn with_soft_timeout<F, T>(
    endpoint: &str,
    timeout: Duration,
    fut: F,
) -> Result<T, EngineError>
where
    F: std::future::Future<Output = Result<T, EngineError>>,
{
    let started = std::time::Instant::now();
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout {
            endpoint: endpoint.to_string(),
            elapsed_ms: started.elapsed().as_millis(),
        }),
    }
}
