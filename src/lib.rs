//! # bulk-export-client
//!
//! Async client library for FHIR-style asynchronous bulk data exports.
//!
//! ## Design Philosophy
//!
//! bulk-export-client is designed to be:
//! - **Event-driven** - Every observable step emits a structured event;
//!   serializing the stream reproduces the export's NDJSON log exactly
//! - **Streaming** - Files are decompressed, validated and forwarded to a
//!   byte sink chunk by chunk, never buffered whole
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Resilient** - One broken file never aborts its siblings; the
//!   capability probe is best-effort and cannot fail an export
//!
//! ## Quick Start
//!
//! ```no_run
//! use bulk_export_client::{BulkExportClient, ExportConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = BulkExportClient::new(ExportConfig {
//!         fhir_url: "https://bulk.example.com/fhir".to_string(),
//!         ..Default::default()
//!     })?;
//!
//!     // Subscribe to lifecycle events
//!     let mut events = client.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(record) = events.recv().await {
//!             if let Ok(line) = record.to_json_line() {
//!                 println!("{line}");
//!             }
//!         }
//!     });
//!
//!     let stats = client.run().await?;
//!     println!("{} files, {} resources", stats.files, stats.resources);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Export client (decomposed into per-phase submodules)
pub mod client;
/// Configuration types
pub mod config;
/// Streaming downloads with explicit decompression
pub mod download;
/// Error types
pub mod error;
/// Export lifecycle events
pub mod events;
/// NDJSON validation and attachment discovery
pub mod ndjson;
/// Byte sink trait and the discarding default
pub mod sink;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use client::BulkExportClient;
pub use config::ExportConfig;
pub use download::{ByteStream, DownloadPhase, FileDownload, FileDownloadState};
pub use error::{DownloadError, Error, ManifestError, Result};
pub use events::{ExportEvent, LogEvent};
pub use ndjson::{NdjsonValidator, ValidationResult};
pub use sink::{ByteSink, NullSink};
pub use types::{
    CapabilityInfo, DownloadTask, ExportStats, ItemType, KickoffOutcome, Manifest, ManifestEntry,
};
