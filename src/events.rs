//! Export lifecycle events.
//!
//! Every observable step of an export emits exactly one [`ExportEvent`].
//! Events are broadcast over a `tokio::sync::broadcast` channel as immutable
//! [`LogEvent`] records; consumers subscribe through
//! [`BulkExportClient::subscribe`](crate::client::BulkExportClient::subscribe)
//! and decide what to do with them (write an NDJSON log, drive a UI, assert
//! in tests). The serialized shape —
//! `{"eventId": ..., "eventDetail": {...}, "timestamp": ...}` — is a contract:
//! field names, null-ness and message texts are stable.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ItemType;

/// One export lifecycle event.
///
/// Serialized adjacently tagged, so `eventId` carries the variant name and
/// `eventDetail` the payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventId", content = "eventDetail", rename_all = "snake_case")]
pub enum ExportEvent {
    /// The export-start request was sent and classified.
    ///
    /// Emitted exactly once per export, on every branch (accepted, immediate
    /// manifest, error), and always carries the capability-probe fields even
    /// when the probe itself failed (they are null then).
    #[serde(rename_all = "camelCase")]
    Kickoff {
        /// Full kickoff URL including the query string
        export_url: String,
        /// HTTP status code when the kickoff failed, null on success
        error_code: Option<u16>,
        /// Error response body (or reason phrase), null on success
        error_body: Option<String>,
        /// Server software name from the capability probe
        software_name: Option<String>,
        /// Server software version from the capability probe
        software_version: Option<String>,
        /// Server software release date from the capability probe
        software_release_date: Option<String>,
        /// Declared FHIR version from the capability probe
        fhir_version: Option<Value>,
        /// Request parameters appended to the kickoff URL, in order
        request_parameters: IndexMap<String, String>,
    },

    /// The status endpoint reported the job still in progress (202)
    #[serde(rename_all = "camelCase")]
    StatusProgress {
        /// Verbatim `x-progress` header value, null when the server sent none
        x_progress: Option<String>,
    },

    /// Status polling ended in an error (HTTP failure or invalid manifest)
    #[serde(rename_all = "camelCase")]
    StatusError {
        /// HTTP status code of the final status response
        code: u16,
        /// Raw response body text
        body: String,
        /// Shape-validation message, present when the body parsed but was invalid
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A well-formed manifest was received; the job is complete server-side
    #[serde(rename_all = "camelCase")]
    StatusComplete {
        /// Server-reported transaction time
        transaction_time: String,
        /// Number of entries in the manifest `output` array
        output_file_count: usize,
        /// Number of entries in the manifest `deleted` array
        deleted_file_count: usize,
        /// Number of entries in the manifest `error` array
        error_file_count: usize,
    },

    /// A download worker picked up a file
    #[serde(rename_all = "camelCase")]
    DownloadRequest {
        /// The file URL
        file_url: String,
        /// Which queue the file came from
        item_type: ItemType,
        /// Declared resource type, null for attachments
        resource_type: Option<String>,
    },

    /// A file downloaded and validated successfully
    #[serde(rename_all = "camelCase")]
    DownloadComplete {
        /// The file URL
        file_url: String,
    },

    /// A file failed to download or validate
    #[serde(rename_all = "camelCase")]
    DownloadError {
        /// The file URL
        file_url: String,
        /// Raw HTTP error body when the failure was at the HTTP layer, null otherwise
        body: Option<String>,
        /// Human-readable failure cause (stable message text)
        message: String,
    },

    /// The download queue drained; the export is finished
    #[serde(rename_all = "camelCase")]
    ExportComplete {
        /// Output/deleted/error files completed
        files: u64,
        /// Validated records across output/deleted/error files
        resources: u64,
        /// Attachment downloads completed
        attachments: u64,
        /// Wire bytes across all downloads
        bytes: u64,
        /// Milliseconds from kickoff to drain
        duration: u64,
    },
}

impl ExportEvent {
    /// The `eventId` string for this event
    pub fn event_id(&self) -> &'static str {
        match self {
            ExportEvent::Kickoff { .. } => "kickoff",
            ExportEvent::StatusProgress { .. } => "status_progress",
            ExportEvent::StatusError { .. } => "status_error",
            ExportEvent::StatusComplete { .. } => "status_complete",
            ExportEvent::DownloadRequest { .. } => "download_request",
            ExportEvent::DownloadComplete { .. } => "download_complete",
            ExportEvent::DownloadError { .. } => "download_error",
            ExportEvent::ExportComplete { .. } => "export_complete",
        }
    }
}

/// A timestamped event record, as handed to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
    /// The event itself (flattened into `eventId`/`eventDetail`)
    #[serde(flatten)]
    pub event: ExportEvent,
}

impl LogEvent {
    /// Stamp an event with the current time
    pub fn now(event: ExportEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }

    /// Render this record as one NDJSON log line (no trailing newline)
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
