//! Bulk export client implementation split into focused submodules.
//!
//! The `BulkExportClient` struct and its methods are organized by export
//! phase:
//! - [`capability`] - Best-effort server metadata probe
//! - [`kickoff`] - Export-start request and response classification
//! - [`status`] - Status polling until the manifest arrives
//! - [`orchestrator`] - Download queue and worker scheduling
//! - [`worker`] - Per-file download, validation and sink pipeline

mod capability;
mod kickoff;
mod orchestrator;
mod status;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;

use crate::config::ExportConfig;
use crate::error::Result;
use crate::events::{ExportEvent, LogEvent};
use crate::sink::{ByteSink, NullSink};
use crate::types::{ExportStats, KickoffOutcome};

/// Content type requested from every endpoint
pub(crate) const FHIR_JSON: &str = "application/fhir+json";

/// Client for one or more bulk export jobs against a single server.
///
/// Cloneable - all fields are cheaply shareable. Events are broadcast to
/// every subscriber; the cancellation token aborts in-flight work across
/// clones.
#[derive(Clone)]
pub struct BulkExportClient {
    /// HTTP client. Transport-level auto-decompression is never enabled;
    /// response bodies are decoded explicitly by the download layer.
    pub(crate) http: reqwest::Client,
    /// Job configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<ExportConfig>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<LogEvent>,
    /// Destination for downloaded bytes
    pub(crate) sink: Arc<dyn ByteSink>,
    /// Cancellation token covering the whole export
    pub(crate) cancel: CancellationToken,
}

impl BulkExportClient {
    /// Create a new client.
    ///
    /// Validates the configuration and sets up the event broadcast channel.
    /// Downloaded bytes are discarded until a sink is attached with
    /// [`with_sink`](Self::with_sink).
    pub fn new(config: ExportConfig) -> Result<Self> {
        config.validate()?;

        // Buffer size of 1000 events; slow subscribers see RecvError::Lagged
        // rather than blocking the export.
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        Ok(Self {
            http: reqwest::Client::builder().build()?,
            config: Arc::new(config),
            event_tx,
            sink: Arc::new(NullSink),
            cancel: CancellationToken::new(),
        })
    }

    /// Attach a byte sink that receives every downloaded file's decompressed
    /// bytes
    pub fn with_sink(mut self, sink: Arc<dyn ByteSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Subscribe to export lifecycle events.
    ///
    /// Multiple subscribers are supported; each receives all events
    /// independently. Serializing each received record with
    /// [`LogEvent::to_json_line`] reproduces the export's NDJSON log.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use bulk_export_client::{BulkExportClient, ExportConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = BulkExportClient::new(ExportConfig {
    ///         fhir_url: "https://bulk.example.com/fhir".to_string(),
    ///         ..Default::default()
    ///     })?;
    ///
    ///     let mut events = client.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(record) = events.recv().await {
    ///             println!("{}", record.to_json_line()?);
    ///         }
    ///         Ok::<_, serde_json::Error>(())
    ///     });
    ///
    ///     let stats = client.run().await?;
    ///     println!("downloaded {} files", stats.files);
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LogEvent> {
        self.event_tx.subscribe()
    }

    /// Token that cancels this export when triggered.
    ///
    /// Cancellation stops scheduling, aborts in-flight downloads, and makes
    /// [`run`](Self::run) return `Error::Cancelled`. Cancelled downloads emit
    /// no `download_error` events.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one export end to end.
    ///
    /// Probes the server's capability statement, sends the kickoff request,
    /// polls the status endpoint until the manifest arrives (unless the
    /// server answered with an immediate manifest), then downloads and
    /// validates every referenced file. Returns the final totals; the same
    /// numbers are emitted as the terminal `export_complete` event.
    pub async fn run(&self) -> Result<ExportStats> {
        let started = Instant::now();

        let capabilities = self.probe_capabilities().await;
        let manifest = match self.kickoff(&capabilities).await? {
            KickoffOutcome::Accepted { status_url } => self.poll_status(&status_url).await?,
            KickoffOutcome::Immediate(manifest) => manifest,
        };

        self.emit(ExportEvent::StatusComplete {
            transaction_time: manifest.transaction_time.clone(),
            output_file_count: manifest.output.len(),
            deleted_file_count: manifest.deleted.len(),
            error_file_count: manifest.error.len(),
        });

        self.download_all(&manifest, started).await
    }

    /// Emit an event to all subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// the export never depends on anyone listening.
    pub(crate) fn emit(&self, event: ExportEvent) {
        let record = LogEvent::now(event);
        tracing::debug!(event_id = record.event.event_id(), "export event");
        self.event_tx.send(record).ok();
    }

    /// Headers attached to every outgoing request: configured extras plus the
    /// bearer token. Malformed configured headers are skipped with a warning
    /// rather than failing the export.
    pub(crate) fn request_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.config.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "skipping malformed configured header"),
            }
        }
        if let Some(token) = &self.config.access_token {
            match HeaderValue::from_str(&format!("Bearer {token}")) {
                Ok(value) => {
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => tracing::warn!("skipping malformed access token"),
            }
        }
        headers
    }
}
