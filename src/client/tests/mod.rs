//! Wiremock-backed tests for the export client, organized by phase.


use tokio::sync::broadcast;

use crate::client::BulkExportClient;
use crate::config::ExportConfig;
use crate::events::{ExportEvent, LogEvent};

/// Client pointed at a mock server, with fast polling for tests
pub(crate) fn test_client(fhir_url: &str) -> BulkExportClient {
    let config = ExportConfig {
        fhir_url: fhir_url.to_string(),
        default_poll_interval: std::time::Duration::from_millis(0),
        ..Default::default()
    };
    BulkExportClient::new(config).unwrap()
}

/// Collect every event buffered so far
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<LogEvent>) -> Vec<ExportEvent> {
    let mut events = Vec::new();
    while let Ok(record) = rx.try_recv() {
        events.push(record.event);
    }
    events
}

/// The `eventId` sequence of the collected events
pub(crate) fn event_ids(events: &[ExportEvent]) -> Vec<&'static str> {
    events.iter().map(ExportEvent::event_id).collect()
}
