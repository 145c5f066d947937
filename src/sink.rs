//! Result sinks
//!
//! The pipeline hands every successful record batch to the primary ingestion
//! sink, and (when both the global flag and the per-check flag allow it) to a
//! secondary analytics sink, one wrapped message per record. Both sinks are
//! external collaborators; only their interface is this crate's business.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

/// Primary time-series ingestion sink.
///
/// The core guarantees `json_records` is a well-formed JSON array of flat
/// records with a field named `time_generated_field` holding an
/// ISO-8601-comparable timestamp.
#[async_trait]
pub trait IngestionSink: Send + Sync {
    async fn ingest(
        &self,
        log_category: &str,
        json_records: &str,
        time_generated_field: &str,
    ) -> anyhow::Result<()>;
}

/// Secondary analytics sink; receives one wrapper object per record.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn emit(&self, log_category: &str, record: &Value) -> anyhow::Result<()>;
}

const SINK_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP implementation of the ingestion sink: POSTs the record batch to the
/// collector endpoint, authenticated by workspace id and shared key.
pub struct HttpIngestionSink {
    client: Client,
    endpoint: String,
    workspace_id: String,
    shared_key: String,
}

impl HttpIngestionSink {
    pub fn new(endpoint: &str, workspace_id: &str, shared_key: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(SINK_TIMEOUT).build()?,
            endpoint: endpoint.to_string(),
            workspace_id: workspace_id.to_string(),
            shared_key: shared_key.to_string(),
        })
    }
}

#[async_trait]
impl IngestionSink for HttpIngestionSink {
    async fn ingest(
        &self,
        log_category: &str,
        json_records: &str,
        time_generated_field: &str,
    ) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Log-Type", log_category)
            .header("x-ms-workspace-id", &self.workspace_id)
            .header("x-ms-shared-key", &self.shared_key)
            .header("time-generated-field", time_generated_field)
            .body(json_records.to_string())
            .send()
            .await?;
        response.error_for_status()?;
        debug!(log_category, "record batch ingested");
        Ok(())
    }
}

/// HTTP implementation of the analytics sink: one POST per wrapped record.
pub struct HttpAnalyticsSink {
    client: Client,
    endpoint: String,
}

impl HttpAnalyticsSink {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(SINK_TIMEOUT).build()?,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl AnalyticsSink for HttpAnalyticsSink {
    async fn emit(&self, log_category: &str, record: &Value) -> anyhow::Result<()> {
        let message = json!({
            "Type": log_category,
            "Data": record,
        });
        let response = self.client.post(&self.endpoint).json(&message).send().await?;
        response.error_for_status()?;
        Ok(())
    }
}
