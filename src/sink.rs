//! Destination for downloaded bytes.
//!
//! The client streams every downloaded file's decompressed bytes into a
//! [`ByteSink`]. Implementations decide what storage means: write to disk,
//! upload elsewhere, hash, or drop the data entirely. The default client uses
//! [`NullSink`], which keeps the export side-effect free while the event
//! stream still records everything that happened.

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::DownloadTask;

/// Receives the decompressed bytes of each downloaded file.
///
/// Workers call [`write`](ByteSink::write) once per chunk in file order, then
/// [`finish`](ByteSink::finish) exactly once after the last chunk. Chunks of
/// different files may interleave, so implementations key any per-file state
/// on the task's URL. Returning an error fails the task, which surfaces as a
/// `download_error` event; it never aborts sibling downloads.
#[async_trait]
pub trait ByteSink: Send + Sync {
    /// Accept one chunk of decompressed file data
    async fn write(&self, task: &DownloadTask, chunk: Bytes) -> std::io::Result<()>;

    /// The file finished downloading; flush any per-file state
    async fn finish(&self, task: &DownloadTask) -> std::io::Result<()>;
}

/// A sink that discards everything it receives.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

#[async_trait]
impl ByteSink for NullSink {
    async fn write(&self, _task: &DownloadTask, _chunk: Bytes) -> std::io::Result<()> {
        Ok(())
    }

    async fn finish(&self, _task: &DownloadTask) -> std::io::Result<()> {
        Ok(())
    }
}
