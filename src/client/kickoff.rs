//! Export kickoff request and response classification.

use reqwest::header::{ACCEPT, HeaderValue};

use super::{BulkExportClient, FHIR_JSON};
use crate::error::{Error, Result};
use crate::events::ExportEvent;
use crate::types::{CapabilityInfo, KickoffOutcome, Manifest};
use crate::utils::{append_query_params, body_or_reason};

/// Reported when a 202 arrives without the header that names the status URL
const MISSING_CONTENT_LOCATION: &str =
    "The kick-off response did not include the expected content-location header";

impl BulkExportClient {
    /// Send the export-start request and classify the server's answer.
    ///
    /// The kickoff URL is the configured export endpoint with the request
    /// parameters appended in insertion order. Exactly one `kickoff` event is
    /// emitted per export, on every branch, always carrying the capability
    /// probe's fields (null when the probe failed).
    ///
    /// Classification:
    /// - status >= 400 rejects the export, with the body (or reason phrase)
    ///   in both the event and the error
    /// - 202 with a `content-location` header means the job was accepted;
    ///   poll that URL
    /// - any other success status must carry the manifest in its body
    pub(crate) async fn kickoff(
        &self,
        capabilities: &CapabilityInfo,
    ) -> Result<KickoffOutcome> {
        let export_url = append_query_params(
            &self.config.kickoff_url(),
            self.config
                .request_parameters
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        )?;

        tracing::info!(url = %export_url, "starting export");
        let sent = self
            .http
            .get(&export_url)
            .headers(self.request_headers())
            .header(ACCEPT, FHIR_JSON)
            .header("prefer", "respond-async")
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                self.emit_kickoff(&export_url, capabilities, None, Some(e.to_string()));
                return Err(Error::Network(e));
            }
        };

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = body_or_reason(response.text().await.unwrap_or_default(), status);
            self.emit_kickoff(
                &export_url,
                capabilities,
                Some(status.as_u16()),
                Some(body.clone()),
            );
            return Err(Error::Kickoff {
                code: status.as_u16(),
                body,
            });
        }

        if status == reqwest::StatusCode::ACCEPTED {
            let status_url = response
                .headers()
                .get("content-location")
                .and_then(|v: &HeaderValue| v.to_str().ok())
                .map(str::to_string);

            return match status_url {
                Some(status_url) => {
                    self.emit_kickoff(&export_url, capabilities, None, None);
                    tracing::debug!(status_url = %status_url, "export accepted");
                    Ok(KickoffOutcome::Accepted { status_url })
                }
                None => {
                    self.emit_kickoff(
                        &export_url,
                        capabilities,
                        Some(202),
                        Some(MISSING_CONTENT_LOCATION.to_string()),
                    );
                    Err(Error::Kickoff {
                        code: 202,
                        body: MISSING_CONTENT_LOCATION.to_string(),
                    })
                }
            };
        }

        // Some servers skip the async handshake and answer with the manifest
        // directly.
        let body = response.text().await.unwrap_or_default();
        self.emit_kickoff(&export_url, capabilities, None, None);
        match Manifest::from_json_text(&body) {
            Ok(manifest) => {
                tracing::debug!("kickoff answered with an immediate manifest");
                Ok(KickoffOutcome::Immediate(manifest))
            }
            Err(e) => {
                // A manifest was expected here; its shape failure is reported
                // the same way as one received through polling.
                self.emit(ExportEvent::StatusError {
                    code: status.as_u16(),
                    body,
                    message: Some(e.to_string()),
                });
                Err(Error::Manifest(e))
            }
        }
    }

    fn emit_kickoff(
        &self,
        export_url: &str,
        capabilities: &CapabilityInfo,
        error_code: Option<u16>,
        error_body: Option<String>,
    ) {
        self.emit(ExportEvent::Kickoff {
            export_url: export_url.to_string(),
            error_code,
            error_body,
            software_name: capabilities.software_name.clone(),
            software_version: capabilities.software_version.clone(),
            software_release_date: capabilities.software_release_date.clone(),
            fhir_version: capabilities.fhir_version.clone(),
            request_parameters: self.config.request_parameters.clone(),
        });
    }
}
