//! Status polling until the export manifest arrives.

use std::time::Instant;

use reqwest::header::ACCEPT;

use super::BulkExportClient;
use crate::error::{Error, Result};
use crate::events::ExportEvent;
use crate::types::Manifest;
use crate::utils::parse_retry_after;

impl BulkExportClient {
    /// Poll the job status URL until the server hands over the manifest.
    ///
    /// Each 202 response emits one `status_progress` event carrying the
    /// verbatim `x-progress` header, then waits for the server's
    /// `retry-after` delta (or the configured default). Polling is strictly
    /// sequential; there is never more than one status request in flight.
    ///
    /// A success response must carry a structurally valid manifest; an
    /// invalid one is as fatal as an HTTP error, and both emit a
    /// `status_error` event before rejecting. The whole loop is bounded by
    /// the configured poll timeout.
    pub(crate) async fn poll_status(&self, status_url: &str) -> Result<Manifest> {
        let deadline = Instant::now() + self.config.poll_timeout;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let response = self
                .http
                .get(status_url)
                .headers(self.request_headers())
                .header(ACCEPT, "application/json")
                .send()
                .await?;

            let status = response.status();
            if status == reqwest::StatusCode::ACCEPTED {
                let wait = parse_retry_after(
                    response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok()),
                    self.config.default_poll_interval,
                );
                let x_progress = response
                    .headers()
                    .get("x-progress")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                tracing::debug!(progress = ?x_progress, wait = ?wait, "export still in progress");
                self.emit(ExportEvent::StatusProgress { x_progress });

                if Instant::now() + wait > deadline {
                    return Err(Error::PollTimeout(self.config.poll_timeout));
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            if !status.is_success() {
                self.emit(ExportEvent::StatusError {
                    code: status.as_u16(),
                    body: body.clone(),
                    message: None,
                });
                return Err(Error::StatusHttp {
                    code: status.as_u16(),
                    body,
                });
            }

            return match Manifest::from_json_text(&body) {
                Ok(manifest) => Ok(manifest),
                Err(e) => {
                    self.emit(ExportEvent::StatusError {
                        code: status.as_u16(),
                        body,
                        message: Some(e.to_string()),
                    });
                    Err(Error::Manifest(e))
                }
            };
        }
    }
}
