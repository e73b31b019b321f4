//! Error types for bulk-export-client
//!
//! Two layers of errors exist:
//! - [`Error`] is the top-level type returned by client operations. Kickoff
//!   and manifest errors are fatal to the whole export.
//! - [`DownloadError`] covers a single download task. These are recoverable:
//!   one failed file never aborts its siblings, it is only reported through a
//!   `download_error` event.
//!
//! The `Display` strings of [`DownloadError`] and [`ManifestError`] are part
//! of the observable contract (they appear verbatim in emitted events), so
//! they live here rather than being formatted ad hoc at call sites.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for bulk-export-client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bulk-export-client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fhir_url")
        key: Option<String>,
    },

    /// Network error (connection-level failure, no response received)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The kickoff request was rejected by the server
    #[error("kickoff failed with HTTP status {code}: {body}")]
    Kickoff {
        /// HTTP status code of the kickoff response
        code: u16,
        /// Response body (or reason phrase when the body was empty)
        body: String,
    },

    /// The status endpoint returned an error response
    #[error("status polling failed with HTTP status {code}")]
    StatusHttp {
        /// HTTP status code of the status response
        code: u16,
        /// Raw response body text
        body: String,
    },

    /// The export manifest was missing or structurally invalid
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A download task failed (also reported per-file as a `download_error` event)
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Status polling exceeded the configured overall timeout
    #[error("export timed out after {0:?} while waiting for the manifest")]
    PollTimeout(Duration),

    /// The export was cancelled through the cancellation token
    #[error("export cancelled")]
    Cancelled,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structural problems with an export manifest.
///
/// Reported as a `status_error` event and fatal to the job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// A required top-level field is absent or not a JSON array.
    ///
    /// The message names the first invalid field, in output → deleted → error
    /// order.
    #[error("The export manifest {field} is not an array")]
    NotAnArray {
        /// The manifest field that failed validation
        field: &'static str,
    },

    /// The manifest body could not be parsed as JSON at all
    #[error("The export manifest could not be parsed as JSON: {0}")]
    Unparsable(String),

    /// A file entry inside one of the manifest arrays has the wrong shape
    #[error("The export manifest entry {field}[{index}] is invalid: {cause}")]
    InvalidEntry {
        /// Which manifest array the entry came from
        field: &'static str,
        /// Zero-based index of the entry within that array
        index: usize,
        /// Underlying deserialization error
        cause: String,
    },
}

/// Per-file download failures.
///
/// The `Display` output of these variants is emitted verbatim in the
/// `message` field of `download_error` events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// The file endpoint answered with an error status
    #[error("Downloading the file from {url} returned HTTP status code {code}.")]
    HttpStatus {
        /// The file URL
        url: String,
        /// HTTP status code
        code: u16,
        /// Raw error response body; `None` when the body was empty
        body: Option<String>,
    },

    /// A line of the file body is not valid JSON
    #[error("Error parsing NDJSON on line {line}: {cause}")]
    NdjsonParse {
        /// 1-indexed line number
        line: u64,
        /// Underlying JSON parse error
        cause: String,
    },

    /// A record declared a different resource type than the manifest promised
    #[error(
        "Error parsing NDJSON on line {line}: Expected each resource to have a \
         \"{expected}\" resourceType but found \"{found}\""
    )]
    ResourceType {
        /// 1-indexed line number of the offending record
        line: u64,
        /// Resource type declared in the manifest entry
        expected: String,
        /// Resource type actually found on the record
        found: String,
    },

    /// The file held a different number of records than the manifest declared
    #[error("Expected {expected} resources but found {found}")]
    ResourceCount {
        /// Count declared in the manifest entry
        expected: u64,
        /// Number of records actually parsed
        found: u64,
    },

    /// The byte sink refused the downloaded data
    #[error("Error forwarding the file from {url} to the byte sink: {message}")]
    Sink {
        /// The file URL
        url: String,
        /// Description of the sink failure
        message: String,
    },

    /// Connection-level failure while fetching the file
    #[error("Transport error while downloading {url}: {message}")]
    Transport {
        /// The file URL
        url: String,
        /// Description of the transport failure
        message: String,
    },

    /// The download was cancelled.
    ///
    /// Never reported as a `download_error` event; the task simply vanishes.
    #[error("Download of {url} was cancelled")]
    Cancelled {
        /// The file URL
        url: String,
    },
}

impl DownloadError {
    /// Raw HTTP error body, when this failure originated at the HTTP layer.
    ///
    /// This feeds the `body` field of `download_error` events: HTTP status
    /// failures carry the server's body, every other failure reports null.
    pub fn body(&self) -> Option<String> {
        match self {
            DownloadError::HttpStatus { body, .. } => body.clone(),
            _ => None,
        }
    }

    /// Whether this error came from cancellation rather than a real failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled { .. })
    }
}
