//! Per-file download pipeline.
//!
//! A worker takes one task end to end: emit `download_request`, fetch the
//! file, stream each decompressed chunk through the NDJSON validator and into
//! the byte sink, then report the outcome to the orchestrator. Manifest files
//! are validated against their declared resource type and count; attachments
//! are arbitrary payloads and skip validation entirely.

use futures::StreamExt;
use tokio::sync::mpsc;

use super::BulkExportClient;
use crate::download::FileDownload;
use crate::error::DownloadError;
use crate::events::ExportEvent;
use crate::ndjson::{NdjsonValidator, ValidationResult};
use crate::types::{DownloadTask, ItemType};

/// What one worker reports back to the orchestrator
pub(crate) enum TaskOutcome {
    /// Downloaded and validated; counts feed the export totals and any
    /// discovered attachments go back on the queue
    Success {
        /// The completed task
        task: DownloadTask,
        /// Validated records (0 for attachments)
        resources: u64,
        /// Attachment tasks discovered inside the records
        attachments: Vec<DownloadTask>,
        /// Wire-level bytes received
        wire_bytes: u64,
    },
    /// Failed; the `download_error` event was already emitted
    Failure,
    /// Cancelled; no event was emitted and none will be
    Cancelled,
}

impl BulkExportClient {
    /// Run one download task to completion and report the outcome.
    ///
    /// Never panics and never returns an error: failures become
    /// `download_error` events plus a `Failure` outcome, and cancellation is
    /// reported silently. A closed outcome channel means the orchestrator is
    /// gone, which only happens after cancellation.
    pub(crate) async fn run_task(
        self,
        task: DownloadTask,
        outcomes: mpsc::UnboundedSender<TaskOutcome>,
    ) {
        let outcome = match self.execute_task(&task).await {
            Ok((result, wire_bytes)) => {
                self.emit(ExportEvent::DownloadComplete {
                    file_url: task.url.clone(),
                });
                TaskOutcome::Success {
                    task,
                    resources: result.resources,
                    attachments: result.attachments,
                    wire_bytes,
                }
            }
            Err(e) if e.is_cancelled() => TaskOutcome::Cancelled,
            Err(e) => {
                tracing::warn!(url = %task.url, error = %e, "download failed");
                self.emit(ExportEvent::DownloadError {
                    file_url: task.url.clone(),
                    body: e.body(),
                    message: e.to_string(),
                });
                TaskOutcome::Failure
            }
        };
        outcomes.send(outcome).ok();
    }

    async fn execute_task(
        &self,
        task: &DownloadTask,
    ) -> Result<(ValidationResult, u64), DownloadError> {
        self.emit(ExportEvent::DownloadRequest {
            file_url: task.url.clone(),
            item_type: task.item_type,
            resource_type: task.expected_type.clone(),
        });

        let download = FileDownload::new(&task.url);
        let mut stream = download
            .fetch(&self.http, self.request_headers(), self.cancel.child_token())
            .await?;

        let mut validator = (task.item_type != ItemType::Attachment)
            .then(|| NdjsonValidator::new(task.expected_type.clone(), task.expected_count));

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if self.cancel.is_cancelled() {
                    DownloadError::Cancelled {
                        url: task.url.clone(),
                    }
                } else {
                    DownloadError::Transport {
                        url: task.url.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

            if let Some(validator) = validator.as_mut() {
                validator.push(&chunk)?;
            }
            self.sink
                .write(task, chunk)
                .await
                .map_err(|e| DownloadError::Sink {
                    url: task.url.clone(),
                    message: e.to_string(),
                })?;
        }
        self.sink
            .finish(task)
            .await
            .map_err(|e| DownloadError::Sink {
                url: task.url.clone(),
                message: e.to_string(),
            })?;

        let result = match validator {
            Some(validator) => validator.finish()?,
            None => ValidationResult::default(),
        };

        Ok((result, download.state().downloaded_bytes))
    }
}
