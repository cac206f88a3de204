//! External interfaces (§6): the JSON command/response envelope the shell
//! drives the (headless) engine through, plus the event shapes streamed
//! during `run_pipeline`.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::{
    aggregate::AggregatedRow,
    cache::SyncCounts,
    core::{config::EngineConfig, error::EngineError, types::CanonicalPosition},
    ingest,
    pipeline::{Orchestrator, Phase, PipelineOutcome, ProgressEvent},
};

/// `{id, command, payload}` request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct IpcRequest {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Top-level outcome of an [`IpcResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// `{code, message}`, present on [`IpcResponse`] iff `status` is `error`.
#[derive(Debug, Clone, Serialize)]
pub struct IpcErrorBody {
    pub code: String,
    pub message: String,
}

/// `{id, status, data?, error?}` response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct IpcResponse {
    pub id: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcErrorBody>,
}

impl IpcResponse {
    fn ok(id: &str, data: serde_json::Value) -> Self {
        Self { id: id.to_string(), status: Status::Ok, data: Some(data), error: None }
    }

    fn err(id: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            status: Status::Error,
            data: None,
            error: Some(IpcErrorBody { code: code.to_string(), message: message.into() }),
        }
    }
}

fn error_code(err: &EngineError) -> &'static str {
    match err {
        EngineError::Http(_) | EngineError::Timeout { .. } | EngineError::RateLimited { .. } => "network_error",
        EngineError::Url(_) | EngineError::Status { .. } => "network_error",
        EngineError::Cache(_) => "cache_error",
        EngineError::Validation(_) => "validation_error",
        EngineError::NotFound { .. } => "not_found",
        EngineError::ManualUploadRequired { .. } => "manual_upload_required",
        EngineError::Data(_) => "data_error",
        EngineError::UnsafeSparqlInput(_) => "data_error",
        EngineError::InvalidDates => "validation_error",
        EngineError::EmptyPortfolio => "empty_portfolio",
        EngineError::Fatal(_) => "fatal",
    }
}

/// Streamed during `run_pipeline`: progress ticks, then a terminal
/// `pipeline_summary`, or an `error` event on fatal failure (§6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcEvent {
    Progress { phase: Phase, progress: u8, message: String },
    PipelineSummary { data: serde_json::Value },
    Error { message: String },
}

impl From<ProgressEvent> for IpcEvent {
    fn from(e: ProgressEvent) -> Self {
        Self::Progress { phase: e.phase, progress: e.progress, message: e.message }
    }
}

/// The headless engine: owns the orchestrator and the small bit of
/// between-command state the IPC surface needs (the last ingested
/// positions, the last pipeline outcome).
pub struct Engine {
    config: EngineConfig,
    orchestrator: Orchestrator,
    pending_positions: Mutex<Option<Vec<CanonicalPosition>>>,
    last_outcome: Mutex<Option<PipelineOutcome>>,
}

impl Engine {
    /// Build every subsystem and open the local cache. `install_salt` seeds
    /// the anonymous contributor hash used for Hive writes.
    pub async fn bootstrap(config: EngineConfig, install_salt: impl Into<String>) -> Result<Self, EngineError> {
        let orchestrator = Orchestrator::bootstrap(&config, install_salt).await?;
        Ok(Self {
            config,
            orchestrator,
            pending_positions: Mutex::new(None),
            last_outcome: Mutex::new(None),
        })
    }

    /// Dispatch one IPC request. `events` receives progress/summary/error
    /// events for `run_pipeline`; other commands never use it.
    pub async fn handle(self: &Arc<Self>, req: IpcRequest, events: mpsc::UnboundedSender<IpcEvent>) -> IpcResponse {
        let result = match req.command.as_str() {
            "health_check" => self.health_check().await,
            "sync_portfolio" => self.sync_portfolio(&req.payload).await,
            "run_pipeline" => self.run_pipeline(events).await,
            "get_true_holdings" => self.get_true_holdings().await,
            "get_pipeline_report" => self.get_pipeline_report(),
            "upload_holdings_file" => self.upload_holdings_file(&req.payload),
            "contribute_holdings_to_hive" => self.contribute_holdings_to_hive(&req.payload).await,
            other => Err(EngineError::Validation(format!("unknown command: {other}"))),
        };
        match result {
            Ok(data) => IpcResponse::ok(&req.id, data),
            Err(err) => IpcResponse::err(&req.id, error_code(&err), err.to_string()),
        }
    }

    async fn health_check(&self) -> Result<serde_json::Value, EngineError> {
        let last_sync = self.orchestrator.cache().last_sync().await?;
        let counts = self.orchestrator.cache().counts().await.unwrap_or_default();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "last_sync": last_sync,
            "cache_sizes": counts_json(counts),
        }))
    }

    /// Ingests positions from the payload into `pending_positions`. Per §6,
    /// this command MUST NOT run the pipeline.
    async fn sync_portfolio(&self, payload: &serde_json::Value) -> Result<serde_json::Value, EngineError> {
        let rows: Vec<HashMap<String, String>> =
            serde_json::from_value(payload.get("positions").cloned().unwrap_or_default())
                .map_err(|e| EngineError::Validation(format!("invalid positions payload: {e}")))?;
        let outcome = ingest::ingest_positions(&rows)?;
        let ingested = outcome.rows.len();
        let skipped = outcome.skipped.len();
        *self.pending_positions.lock().await = Some(outcome.rows);
        Ok(serde_json::json!({ "ingested": ingested, "skipped": skipped }))
    }

    async fn run_pipeline(&self, events: mpsc::UnboundedSender<IpcEvent>) -> Result<serde_json::Value, EngineError> {
        let positions = self
            .pending_positions
            .lock()
            .await
            .take()
            .ok_or_else(|| EngineError::Validation("no positions synced; call sync_portfolio first".to_string()))?;

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let relay_events = events.clone();
        let relay = tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                let _ = relay_events.send(event.into());
            }
        });

        let result = self.orchestrator.run(positions, Some(progress_tx)).await;
        let _ = relay.await;

        match result {
            Ok(outcome) => {
                let data = serde_json::to_value(&outcome.report).map_err(|e| EngineError::Data(e.to_string()))?;
                let _ = events.send(IpcEvent::PipelineSummary { data: data.clone() });
                *self.last_outcome.lock().await = Some(outcome);
                Ok(data)
            }
            Err(err) => {
                let _ = events.send(IpcEvent::Error { message: err.to_string() });
                Err(err)
            }
        }
    }

    async fn get_true_holdings(&self) -> Result<serde_json::Value, EngineError> {
        let guard = self.last_outcome.lock().await;
        let rows: &[AggregatedRow] = guard.as_ref().map(|o| o.resolved.as_slice()).unwrap_or(&[]);
        serde_json::to_value(rows).map_err(|e| EngineError::Data(e.to_string()))
    }

    fn get_pipeline_report(&self) -> Result<serde_json::Value, EngineError> {
        match self.orchestrator.read_health_report()? {
            Some(report) => serde_json::to_value(report).map_err(|e| EngineError::Data(e.to_string())),
            None => Ok(serde_json::Value::Null),
        }
    }

    fn upload_holdings_file(&self, payload: &serde_json::Value) -> Result<serde_json::Value, EngineError> {
        #[derive(Deserialize)]
        struct Payload {
            etf_isin: String,
            ext: String,
            bytes_base64: String,
        }
        let payload: Payload =
            serde_json::from_value(payload.clone()).map_err(|e| EngineError::Validation(e.to_string()))?;
        if !["xlsx", "csv", "pdf"].contains(&payload.ext.as_str()) {
            return Err(EngineError::Validation(format!(
                "unsupported manual holdings file extension {:?}, expected one of xlsx/csv/pdf",
                payload.ext
            )));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.bytes_base64.as_bytes())
            .map_err(|e| EngineError::Validation(format!("invalid base64 payload: {e}")))?;
        self.orchestrator.manual_store().store(&payload.etf_isin, &payload.ext, &bytes)?;
        Ok(serde_json::json!({ "stored": true }))
    }

    async fn contribute_holdings_to_hive(&self, payload: &serde_json::Value) -> Result<serde_json::Value, EngineError> {
        #[derive(Deserialize)]
        struct Edge {
            holding_isin: String,
            weight: f64,
            confidence: f64,
        }
        #[derive(Deserialize)]
        struct Payload {
            etf_isin: String,
            holdings: Vec<Edge>,
        }
        let payload: Payload =
            serde_json::from_value(payload.clone()).map_err(|e| EngineError::Validation(e.to_string()))?;
        let edges: Vec<crate::core::types::EtfHoldingEdge> = payload
            .holdings
            .into_iter()
            .map(|h| crate::core::types::EtfHoldingEdge {
                etf_isin: payload.etf_isin.clone(),
                holding_isin: h.holding_isin,
                weight: h.weight,
                confidence: h.confidence,
                last_updated: Utc::now(),
            })
            .collect();
        self.orchestrator.cache().put_etf_holdings(&payload.etf_isin, &edges).await?;
        // best-effort: never block the caller's response on the remote write.
        let hive = self.orchestrator.hive().clone();
        let etf_isin = payload.etf_isin.clone();
        tokio::spawn(async move {
            let _ = hive.contribute_etf_holdings(&etf_isin, &edges).await;
        });
        Ok(serde_json::json!({ "contributed": true }))
    }

    /// The configuration this engine was bootstrapped with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

fn counts_json(counts: SyncCounts) -> serde_json::Value {
    serde_json::json!({ "assets": counts.assets, "listings": counts.listings, "aliases": counts.aliases })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_maps_empty_portfolio() {
        assert_eq!(error_code(&EngineError::EmptyPortfolio), "empty_portfolio");
    }

    #[test]
    fn ipc_response_serializes_without_null_data_on_error() {
        let resp = IpcResponse::err("1", "validation_error", "bad input");
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["error"]["code"], "validation_error");
    }
}
