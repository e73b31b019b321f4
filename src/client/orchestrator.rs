//! Download queue orchestration.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::mpsc;

use super::BulkExportClient;
use super::worker::TaskOutcome;
use crate::error::{Error, Result};
use crate::events::ExportEvent;
use crate::types::{DownloadTask, ExportStats, ItemType, Manifest};

impl BulkExportClient {
    /// Download every file the manifest references, plus every attachment
    /// discovered along the way.
    ///
    /// A single control loop owns the FIFO queue and all running totals;
    /// workers only report outcomes over a channel. The queue is seeded from
    /// the manifest in `output`, `deleted`, `error` order, and discovered
    /// attachments are appended to the back, so attachments of earlier files
    /// download before attachments of later ones. At most
    /// `parallel_downloads` workers run at once.
    ///
    /// The export is complete when the queue is empty and no worker is in
    /// flight. One failed file never aborts its siblings: it is counted out
    /// of the totals and reported through its `download_error` event only.
    pub(crate) async fn download_all(
        &self,
        manifest: &Manifest,
        started: Instant,
    ) -> Result<ExportStats> {
        let mut queue: VecDeque<DownloadTask> = [
            (&manifest.output, ItemType::Output),
            (&manifest.deleted, ItemType::Deleted),
            (&manifest.error, ItemType::Error),
        ]
        .into_iter()
        .flat_map(|(entries, item_type)| {
            entries
                .iter()
                .map(move |entry| DownloadTask::from_entry(entry, item_type))
        })
        .collect();

        tracing::info!(files = queue.len(), "manifest queued for download");

        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let mut in_flight = 0usize;
        let mut stats = ExportStats::default();

        loop {
            if self.cancel.is_cancelled() {
                queue.clear();
            }

            while in_flight < self.config.parallel_downloads {
                let Some(task) = queue.pop_front() else { break };
                in_flight += 1;
                tokio::spawn(self.clone().run_task(task, outcome_tx.clone()));
            }

            if in_flight == 0 {
                break;
            }

            // Workers always report, even on cancellation, so this cannot
            // hang while anything is in flight.
            let Some(outcome) = outcome_rx.recv().await else { break };
            in_flight -= 1;

            if let TaskOutcome::Success {
                task,
                resources,
                attachments,
                wire_bytes,
            } = outcome
            {
                stats.bytes += wire_bytes;
                if task.item_type == ItemType::Attachment {
                    stats.attachments += 1;
                } else {
                    stats.files += 1;
                    stats.resources += resources;
                }
                queue.extend(attachments);
            }
        }

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        stats.duration_millis = started.elapsed().as_millis() as u64;
        tracing::info!(
            files = stats.files,
            resources = stats.resources,
            attachments = stats.attachments,
            bytes = stats.bytes,
            duration_millis = stats.duration_millis,
            "export complete"
        );
        self.emit(ExportEvent::ExportComplete {
            files: stats.files,
            resources: stats.resources,
            attachments: stats.attachments,
            bytes: stats.bytes,
            duration: stats.duration_millis,
        });

        Ok(stats)
    }
}
