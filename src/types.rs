//! Core types for bulk-export-client

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ManifestError;

/// Kind of file a download task refers to.
///
/// Output, deleted and error files come straight from the manifest;
/// attachments are discovered inside already-downloaded NDJSON records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    /// Listed in the manifest `output` array
    Output,
    /// Listed in the manifest `deleted` array
    Deleted,
    /// Listed in the manifest `error` array
    Error,
    /// Discovered inside another file's records
    Attachment,
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ItemType::Output => "output",
            ItemType::Deleted => "deleted",
            ItemType::Error => "error",
            ItemType::Attachment => "attachment",
        };
        write!(f, "{label}")
    }
}

/// One file reference inside a manifest array.
///
/// Immutable once parsed. Entries are deliberately lenient: servers have been
/// observed emitting entries without a `url` or `type`, and the status phase
/// must still succeed — such entries only fail later, at download time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Absolute URL of the file
    #[serde(default)]
    pub url: String,

    /// Resource type the server declares for every record in the file
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,

    /// Expected number of records in the file, when the server declares one
    #[serde(default)]
    pub count: Option<u64>,
}

/// The completed-export manifest returned by the status endpoint.
///
/// Construct through [`Manifest::from_json_text`], which enforces the shape
/// invariants (`output`, `deleted` and `error` must each be arrays).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Server-reported transaction time of the export
    pub transaction_time: String,
    /// Bulk data files produced by the export
    pub output: Vec<ManifestEntry>,
    /// Files describing resources deleted since the `_since` point
    pub deleted: Vec<ManifestEntry>,
    /// OperationOutcome files describing per-resource errors
    pub error: Vec<ManifestEntry>,
}

impl Manifest {
    /// Parse and validate a manifest from a raw response body.
    ///
    /// Validation stops at the first structurally invalid field, checked in
    /// `output`, `deleted`, `error` order, so the resulting error always
    /// names the first offender.
    pub fn from_json_text(body: &str) -> Result<Self, ManifestError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| ManifestError::Unparsable(e.to_string()))?;

        let transaction_time = value
            .get("transactionTime")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            transaction_time,
            output: Self::entries(&value, "output")?,
            deleted: Self::entries(&value, "deleted")?,
            error: Self::entries(&value, "error")?,
        })
    }

    fn entries(value: &Value, field: &'static str) -> Result<Vec<ManifestEntry>, ManifestError> {
        let Some(Value::Array(items)) = value.get(field) else {
            return Err(ManifestError::NotAnArray { field });
        };

        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value(item.clone()).map_err(|e| ManifestError::InvalidEntry {
                    field,
                    index,
                    cause: e.to_string(),
                })
            })
            .collect()
    }

    /// Total number of files referenced across all three arrays
    pub fn file_count(&self) -> usize {
        self.output.len() + self.deleted.len() + self.error.len()
    }
}

/// One unit of work for the download pool.
///
/// Created when enqueued, consumed exactly once by a worker, never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadTask {
    /// Absolute URL to fetch
    pub url: String,
    /// Where the task came from
    pub item_type: ItemType,
    /// Declared resource type to enforce; `None` for attachments
    pub expected_type: Option<String>,
    /// Declared record count to enforce; `None` when the server said nothing
    pub expected_count: Option<u64>,
}

impl DownloadTask {
    /// Build a task from a manifest entry
    pub fn from_entry(entry: &ManifestEntry, item_type: ItemType) -> Self {
        Self {
            url: entry.url.clone(),
            item_type,
            expected_type: entry.resource_type.clone(),
            expected_count: entry.count,
        }
    }

    /// Build a task for a discovered attachment URL.
    ///
    /// Attachments carry no type or count expectations and are never
    /// NDJSON-validated.
    pub fn attachment(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            item_type: ItemType::Attachment,
            expected_type: None,
            expected_count: None,
        }
    }
}

/// Running totals for a whole export job.
///
/// Mutated only inside the orchestrator's single accumulation point; workers
/// report outcomes over a channel instead of touching these directly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    /// Output/deleted/error files downloaded and validated successfully
    pub files: u64,
    /// Validated records across output/deleted/error files (attachments excluded)
    pub resources: u64,
    /// Attachment downloads completed
    pub attachments: u64,
    /// Wire-level (compressed) bytes across all completed downloads
    pub bytes: u64,
    /// Wall-clock milliseconds from kickoff to queue drain
    pub duration_millis: u64,
}

/// Server metadata captured by the capability probe.
///
/// Every field is independently optional: the probe is best-effort enrichment
/// and a missing or broken metadata endpoint maps to all-`None`, never to a
/// failed export.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    /// Declared FHIR version (kept as raw JSON; servers emit both strings and numbers)
    pub fhir_version: Option<Value>,
    /// Server software name
    pub software_name: Option<String>,
    /// Server software version
    pub software_version: Option<String>,
    /// Server software release date
    pub software_release_date: Option<String>,
}

/// How the server answered the kickoff request
#[derive(Clone, Debug, PartialEq)]
pub enum KickoffOutcome {
    /// 202 with a `content-location` header: poll this URL for the manifest
    Accepted {
        /// Job status URL to poll
        status_url: String,
    },
    /// Another 2xx whose body already was a valid manifest
    Immediate(Manifest),
}
