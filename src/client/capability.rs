//! Best-effort capability statement probe.

use reqwest::header::ACCEPT;
use serde_json::Value;

use super::{BulkExportClient, FHIR_JSON};
use crate::types::CapabilityInfo;

impl BulkExportClient {
    /// Fetch the server's capability statement from `{fhir_url}/metadata`.
    ///
    /// Purely informational: the result only enriches the kickoff event.
    /// Any failure (connection refused, error status, unparsable body) maps
    /// to all-`None`, and fields absent from an otherwise valid statement are
    /// individually `None`. This never delays or fails the export.
    pub(crate) async fn probe_capabilities(&self) -> CapabilityInfo {
        let url = self.config.metadata_url();
        let response = match self
            .http
            .get(&url)
            .headers(self.request_headers())
            .header(ACCEPT, FHIR_JSON)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "capability probe failed");
                return CapabilityInfo::default();
            }
        };

        if !response.status().is_success() {
            tracing::debug!(url = %url, status = %response.status(), "capability probe rejected");
            return CapabilityInfo::default();
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "capability statement unparsable");
                return CapabilityInfo::default();
            }
        };

        CapabilityInfo {
            // Servers emit both strings and numbers here; keep the raw value.
            fhir_version: body.get("fhirVersion").filter(|v| !v.is_null()).cloned(),
            software_name: string_at(&body, "/software/name"),
            software_version: string_at(&body, "/software/version"),
            software_release_date: string_at(&body, "/software/releaseDate"),
        }
    }
}

fn string_at(body: &Value, pointer: &str) -> Option<String> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}
