//! NDJSON content validation and attachment discovery.
//!
//! Files declared in the manifest carry one JSON resource per line. The
//! validator checks each record against the manifest's declared resource type
//! and count, and scans every record for embedded attachment references
//! (`content[*].attachment.url`), which become new download tasks.
//!
//! The core is incremental ([`NdjsonValidator::push`] / [`finish`]) so the
//! orchestrator can tee each decompressed chunk to the byte sink while
//! validating it, without buffering whole files. [`NdjsonValidator::validate`]
//! wraps the same core for callers that hold a complete byte stream.
//!
//! [`finish`]: NdjsonValidator::finish

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::DownloadError;
use crate::types::DownloadTask;

/// Outcome of validating one file
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationResult {
    /// Number of records parsed
    pub resources: u64,
    /// Attachment download tasks discovered inside the records
    pub attachments: Vec<DownloadTask>,
}

/// Validates one NDJSON byte stream against the manifest's expectations.
pub struct NdjsonValidator {
    expected_type: Option<String>,
    expected_count: Option<u64>,
    buffer: Vec<u8>,
    line: u64,
    resources: u64,
    attachments: Vec<DownloadTask>,
}

impl NdjsonValidator {
    /// Create a validator.
    ///
    /// `expected_type` enforces the resource type of every record;
    /// `expected_count` enforces the total record count after the stream ends.
    pub fn new(expected_type: Option<String>, expected_count: Option<u64>) -> Self {
        Self {
            expected_type,
            expected_count,
            buffer: Vec::new(),
            line: 0,
            resources: 0,
            attachments: Vec::new(),
        }
    }

    /// Feed one chunk of decompressed bytes.
    ///
    /// Complete lines are validated immediately; a trailing partial line is
    /// buffered until the next chunk or [`finish`](Self::finish).
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), DownloadError> {
        let mut rest = chunk;
        while let Some(newline) = rest.iter().position(|&b| b == b'\n') {
            self.buffer.extend_from_slice(&rest[..newline]);
            rest = &rest[newline + 1..];
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line)?;
        }
        self.buffer.extend_from_slice(rest);
        Ok(())
    }

    /// Flush the final line and run the count check.
    pub fn finish(mut self) -> Result<ValidationResult, DownloadError> {
        let line = std::mem::take(&mut self.buffer);
        self.process_line(&line)?;

        if let Some(expected) = self.expected_count
            && expected != self.resources
        {
            return Err(DownloadError::ResourceCount {
                expected,
                found: self.resources,
            });
        }

        Ok(ValidationResult {
            resources: self.resources,
            attachments: self.attachments,
        })
    }

    /// Consume a whole byte stream and validate it.
    pub async fn validate<S>(mut self, stream: S) -> Result<ValidationResult, DownloadError>
    where
        S: Stream<Item = std::io::Result<Bytes>>,
    {
        let mut stream = std::pin::pin!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::Transport {
                url: String::new(),
                message: e.to_string(),
            })?;
            self.push(&chunk)?;
        }
        self.finish()
    }

    fn process_line(&mut self, line: &[u8]) -> Result<(), DownloadError> {
        // Blank lines advance the line counter but are not records.
        self.line += 1;
        let text = String::from_utf8_lossy(line);
        if text.trim().is_empty() {
            return Ok(());
        }

        let record: Value =
            serde_json::from_str(&text).map_err(|e| DownloadError::NdjsonParse {
                line: self.line,
                cause: e.to_string(),
            })?;

        if let Some(expected) = &self.expected_type {
            let found = record
                .get("resourceType")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if found != expected {
                return Err(DownloadError::ResourceType {
                    line: self.line,
                    expected: expected.clone(),
                    found: found.to_string(),
                });
            }
        }

        self.discover_attachments(&record);
        self.resources += 1;
        Ok(())
    }

    /// Collect `content[*].attachment.url` references as new download tasks.
    ///
    /// Discovery never fails the record; malformed content entries are
    /// silently skipped.
    fn discover_attachments(&mut self, record: &Value) {
        let Some(content) = record.get("content").and_then(Value::as_array) else {
            return;
        };
        for entry in content {
            if let Some(url) = entry
                .get("attachment")
                .and_then(|a| a.get("url"))
                .and_then(Value::as_str)
            {
                tracing::debug!(url, "discovered attachment reference");
                self.attachments.push(DownloadTask::attachment(url));
            }
        }
    }
}
