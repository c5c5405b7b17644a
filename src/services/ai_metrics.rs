//! Best-effort sink for per-call AI metrics.
//!
//! Records go through a bounded channel to a background writer. A full
//! channel or a failed write is logged and dropped; it never reaches the job.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::db::Store;
use crate::services::classifier::ErrorCode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AiOperation {
    AnalyzePhoto,
    DetectRoom,
}

/// One AI call, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiCallRecord {
    pub provider: String,
    pub model: String,
    pub operation: AiOperation,
    pub latency_ms: u64,
    pub success: bool,
    pub error_type: Option<ErrorCode>,
    /// Attempts made before this one.
    pub retries: u32,
    pub meta: serde_json::Value,
}

#[derive(Clone)]
pub struct AiMetricsSink {
    tx: mpsc::Sender<AiCallRecord>,
}

impl AiMetricsSink {
    /// Start the background writer. It exits once every sink clone is dropped.
    pub fn spawn(store: Arc<dyn Store>, buffer: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AiCallRecord>(buffer.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = store.record_ai_call(&record).await {
                    warn!(error = %e, operation = %record.operation, "Failed to persist AI call metric");
                }
            }
            debug!("AI metrics writer stopped");
        });

        (Self { tx }, handle)
    }

    /// Queue a record. Never blocks and never fails the caller.
    pub fn record(&self, record: AiCallRecord) {
        let operation = record.operation.to_string();
        let outcome = if record.success { "success" } else { "failure" };
        metrics::histogram!("ai_call_latency_seconds", "operation" => operation.clone())
            .record(record.latency_ms as f64 / 1000.0);
        metrics::counter!("ai_calls_total", "operation" => operation, "outcome" => outcome).increment(1);

        if let Err(e) = self.tx.try_send(record) {
            warn!(error = %e, "Dropping AI call metric");
        }
    }
}
