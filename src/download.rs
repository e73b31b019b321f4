//! Streaming file downloads with explicit decompression.
//!
//! [`FileDownload`] performs one HTTP GET and hands back a pull-based byte
//! stream of the *decompressed* body. The request always advertises
//! `accept-encoding: gzip, deflate, br, identity` and decodes the response
//! itself based on `content-encoding` — transport-level auto-decompression is
//! never enabled on the HTTP client, so wire bytes and decompressed bytes can
//! be counted separately.
//!
//! Nothing flows until the caller consumes the returned stream, which lets
//! the orchestrator wire up validation and the byte sink before the first
//! chunk moves (the stream *is* the pause).

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use async_compression::tokio::bufread::{BrotliDecoder, GzipDecoder, ZlibDecoder};
use bytes::Bytes;
use futures::{Future, Stream, StreamExt};
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, HeaderMap};
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::DownloadError;
use crate::utils::non_empty;

/// Decompressed body bytes, one chunk at a time
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Read buffer for the decompressed stream
const STREAM_CHUNK_CAPACITY: usize = 64 * 1024;

/// Lifecycle phase of one file download
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DownloadPhase {
    /// The request is about to be sent
    #[default]
    Start,
    /// A decompressed chunk was produced
    Progress,
    /// The body was fully consumed
    Complete,
}

/// Snapshot of one download's byte counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileDownloadState {
    /// Current lifecycle phase
    pub phase: DownloadPhase,
    /// Wire-level chunks received so far
    pub downloaded_chunks: u64,
    /// Wire-level (compressed) bytes received so far
    pub downloaded_bytes: u64,
    /// Bytes produced after decompression so far
    pub uncompressed_bytes: u64,
}

#[derive(Default)]
struct Counters {
    chunks: AtomicU64,
    bytes: AtomicU64,
    uncompressed: AtomicU64,
}

impl Counters {
    fn snapshot(&self, phase: DownloadPhase) -> FileDownloadState {
        FileDownloadState {
            phase,
            downloaded_chunks: self.chunks.load(Ordering::Relaxed),
            downloaded_bytes: self.bytes.load(Ordering::Relaxed),
            uncompressed_bytes: self.uncompressed.load(Ordering::Relaxed),
        }
    }
}

/// One streaming HTTP file download.
///
/// Progress snapshots are published on a watch channel: one `Start` before
/// the request goes out, one `Progress` per decompressed chunk, one
/// `Complete` when the body ends cleanly.
pub struct FileDownload {
    url: String,
    counters: Arc<Counters>,
    progress_tx: watch::Sender<FileDownloadState>,
}

impl FileDownload {
    /// Create a download for the given URL
    pub fn new(url: impl Into<String>) -> Self {
        let (progress_tx, _) = watch::channel(FileDownloadState::default());
        Self {
            url: url.into(),
            counters: Arc::new(Counters::default()),
            progress_tx,
        }
    }

    /// The URL this download fetches
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current counter snapshot
    pub fn state(&self) -> FileDownloadState {
        let phase = self.progress_tx.borrow().phase;
        self.counters.snapshot(phase)
    }

    /// Subscribe to progress snapshots
    pub fn progress(&self) -> watch::Receiver<FileDownloadState> {
        self.progress_tx.subscribe()
    }

    /// Send the request and resolve once response headers arrive.
    ///
    /// The returned stream yields decompressed chunks and drives the byte
    /// counters as a side effect. An error status (≥ 400) rejects before any
    /// decompression is attempted, carrying the response body. Cancelling the
    /// token aborts the header wait immediately and makes an already-running
    /// stream yield one final error before ending.
    pub async fn fetch(
        &self,
        client: &reqwest::Client,
        headers: HeaderMap,
        cancel: CancellationToken,
    ) -> Result<ByteStream, DownloadError> {
        let request = client
            .get(&self.url)
            .headers(headers)
            .header(ACCEPT_ENCODING, "gzip, deflate, br, identity");

        let _ = self.progress_tx.send(self.counters.snapshot(DownloadPhase::Start));
        tracing::debug!(url = %self.url, "sending download request");

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(DownloadError::Cancelled { url: self.url.clone() });
            }
            result = request.send() => result.map_err(|e| DownloadError::Transport {
                url: self.url.clone(),
                message: e.to_string(),
            })?,
        };

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(DownloadError::HttpStatus {
                url: self.url.clone(),
                code: status.as_u16(),
                body: non_empty(body),
            });
        }

        let encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("identity")
            .to_ascii_lowercase();

        // Count wire-level chunks and bytes as they arrive, before decoding.
        let counters = Arc::clone(&self.counters);
        let wire = response.bytes_stream().map(move |chunk| match chunk {
            Ok(bytes) => {
                counters.chunks.fetch_add(1, Ordering::Relaxed);
                counters.bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                Ok(bytes)
            }
            Err(e) => Err(io::Error::other(e)),
        });
        let reader = StreamReader::new(wire);

        let decoded: Pin<Box<dyn AsyncRead + Send>> = match encoding.as_str() {
            "gzip" | "x-gzip" => Box::pin(GzipDecoder::new(reader)),
            "deflate" => Box::pin(ZlibDecoder::new(reader)),
            "br" => Box::pin(BrotliDecoder::new(reader)),
            // identity, or anything unrecognized, passes through untouched
            _ => Box::pin(reader),
        };

        Ok(Box::pin(Monitored {
            inner: ReaderStream::with_capacity(decoded, STREAM_CHUNK_CAPACITY),
            url: self.url.clone(),
            counters: Arc::clone(&self.counters),
            progress_tx: self.progress_tx.clone(),
            cancelled: Box::pin(cancel.cancelled_owned()),
            done: false,
        }))
    }
}

/// Wraps the decompressed stream to count bytes, publish progress snapshots,
/// and honor cancellation mid-body.
struct Monitored<S> {
    inner: S,
    url: String,
    counters: Arc<Counters>,
    progress_tx: watch::Sender<FileDownloadState>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    done: bool,
}

impl<S> Stream for Monitored<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.done = true;
            tracing::debug!(url = %this.url, "download cancelled mid-stream");
            return Poll::Ready(Some(Err(io::Error::other(format!(
                "download of {} was cancelled",
                this.url
            )))));
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                this.counters
                    .uncompressed
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                let _ = this
                    .progress_tx
                    .send(this.counters.snapshot(DownloadPhase::Progress));
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.done = true;
                let _ = this
                    .progress_tx
                    .send(this.counters.snapshot(DownloadPhase::Complete));
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(mut stream: ByteStream) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn identity_body_passes_through_and_counts_bytes() {
        let server = MockServer::start().await;
        let body = b"{\"resourceType\":\"Patient\"}\n".repeat(10);
        Mock::given(method("GET"))
            .and(path("/file1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let download = FileDownload::new(format!("{}/file1", server.uri()));
        let client = reqwest::Client::new();
        let stream = download
            .fetch(&client, HeaderMap::new(), CancellationToken::new())
            .await
            .unwrap();

        let received = collect(stream).await.unwrap();
        assert_eq!(received, body);

        let state = download.state();
        assert_eq!(state.phase, DownloadPhase::Complete);
        assert_eq!(state.downloaded_bytes, body.len() as u64);
        assert_eq!(state.uncompressed_bytes, body.len() as u64);
        assert!(state.downloaded_chunks >= 1);

        // The request advertised the full encoding list as one header value.
        let requests = server.received_requests().await.unwrap();
        assert_eq!(
            requests[0]
                .headers
                .get("accept-encoding")
                .and_then(|v| v.to_str().ok()),
            Some("gzip, deflate, br, identity")
        );
    }

    #[tokio::test]
    async fn gzip_body_is_decompressed_with_separate_counters() {
        let server = MockServer::start().await;
        let plain = b"{\"resourceType\":\"Patient\"}\n".repeat(100);
        let compressed = gzip(&plain);
        Mock::given(method("GET"))
            .and(path("/file.gz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-encoding", "gzip")
                    .set_body_bytes(compressed.clone()),
            )
            .mount(&server)
            .await;

        let download = FileDownload::new(format!("{}/file.gz", server.uri()));
        let client = reqwest::Client::new();
        let stream = download
            .fetch(&client, HeaderMap::new(), CancellationToken::new())
            .await
            .unwrap();

        let received = collect(stream).await.unwrap();
        assert_eq!(received, plain);

        let state = download.state();
        assert_eq!(state.downloaded_bytes, compressed.len() as u64);
        assert_eq!(state.uncompressed_bytes, plain.len() as u64);
        assert!(state.downloaded_bytes < state.uncompressed_bytes);
    }

    #[tokio::test]
    async fn deflate_body_is_decompressed() {
        let server = MockServer::start().await;
        let plain = b"hello deflate world".repeat(50);
        Mock::given(method("GET"))
            .and(path("/file.z"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-encoding", "deflate")
                    .set_body_bytes(zlib(&plain)),
            )
            .mount(&server)
            .await;

        let download = FileDownload::new(format!("{}/file.z", server.uri()));
        let client = reqwest::Client::new();
        let stream = download
            .fetch(&client, HeaderMap::new(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(collect(stream).await.unwrap(), plain);
    }

    #[tokio::test]
    async fn error_status_rejects_with_body_before_decompression() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such file"))
            .mount(&server)
            .await;

        let url = format!("{}/missing", server.uri());
        let download = FileDownload::new(url.clone());
        let client = reqwest::Client::new();
        let err = download
            .fetch(&client, HeaderMap::new(), CancellationToken::new())
            .await
            .map(|_| ())
            .unwrap_err();

        assert_eq!(
            err,
            DownloadError::HttpStatus {
                url: url.clone(),
                code: 404,
                body: Some("no such file".into()),
            }
        );
        assert_eq!(
            err.to_string(),
            format!("Downloading the file from {url} returned HTTP status code 404.")
        );
    }

    #[tokio::test]
    async fn empty_error_body_maps_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let download = FileDownload::new(format!("{}/gone", server.uri()));
        let client = reqwest::Client::new();
        let err = download
            .fetch(&client, HeaderMap::new(), CancellationToken::new())
            .await
            .map(|_| ())
            .unwrap_err();

        match err {
            DownloadError::HttpStatus { code, body, .. } => {
                assert_eq!(code, 500);
                assert_eq!(body, None);
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_is_pull_based_until_consumed() {
        let server = MockServer::start().await;
        let body = b"0123456789".repeat(100);
        Mock::given(method("GET"))
            .and(path("/lazy"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let download = FileDownload::new(format!("{}/lazy", server.uri()));
        let client = reqwest::Client::new();
        let stream = download
            .fetch(&client, HeaderMap::new(), CancellationToken::new())
            .await
            .unwrap();

        // Headers received, body not yet consumed: no decompressed bytes counted.
        assert_eq!(download.state().uncompressed_bytes, 0);

        let received = collect(stream).await.unwrap();
        assert_eq!(received.len(), body.len());
        assert_eq!(download.state().uncompressed_bytes, body.len() as u64);
    }

    #[tokio::test]
    async fn cancellation_before_fetch_rejects_without_request() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let download = FileDownload::new("http://127.0.0.1:9/never");
        let client = reqwest::Client::new();
        let err = download
            .fetch(&client, HeaderMap::new(), cancel)
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_mid_stream_yields_an_error() {
        let server = MockServer::start().await;
        let body = vec![b'x'; 256 * 1024];
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let download = FileDownload::new(format!("{}/big", server.uri()));
        let client = reqwest::Client::new();
        let cancel = CancellationToken::new();
        let mut stream = download
            .fetch(&client, HeaderMap::new(), cancel.clone())
            .await
            .unwrap();

        cancel.cancel();

        let mut saw_error = false;
        while let Some(chunk) = stream.next().await {
            if chunk.is_err() {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error, "cancelled stream must end with an error");
    }

    #[tokio::test]
    async fn progress_snapshots_walk_through_phases() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/phased"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'y'; 4096]))
            .mount(&server)
            .await;

        let download = FileDownload::new(format!("{}/phased", server.uri()));
        let mut progress = download.progress();
        let client = reqwest::Client::new();
        let stream = download
            .fetch(&client, HeaderMap::new(), CancellationToken::new())
            .await
            .unwrap();

        collect(stream).await.unwrap();

        // The watch channel coalesces, but the terminal snapshot must be Complete
        // with the full byte count.
        progress.mark_changed();
        let last = *progress.borrow_and_update();
        assert_eq!(last.phase, DownloadPhase::Complete);
        assert_eq!(last.uncompressed_bytes, 4096);
    }
}
