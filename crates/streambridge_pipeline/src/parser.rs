#![forbid(unsafe_code)]

//! Parser worker: drains the raw queue off the consumer thread.
//!
//! All adapter-specific field probing runs here, never on the host
//! tick thread. The worker observes the cancellation flag and exits on
//! its own; the orchestrator bounds how long it waits for that.

use streambridge_backend::ParsedEventTx;
use streambridge_backend::fallback::host::RawPayloadRx;
use streambridge_backend::fallback::probe::chat_event_from_payload;
use streambridge_domain::{PipelineEvent, validate_event};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawn the parser worker on the pipeline runtime.
pub fn spawn_parser_worker(
	mut raw_rx: RawPayloadRx,
	parsed_tx: ParsedEventTx,
	mut cancel_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		info!("parser worker started");

		loop {
			tokio::select! {
				payload = raw_rx.recv() => {
					let Some(payload) = payload else {
						debug!("raw queue closed; parser worker exiting");
						break;
					};

					// Empty text is the only reason to drop mid-parse;
					// every other malformation degrades to defaults.
					let Some(chat) = chat_event_from_payload(&payload.message) else {
						debug!("dropping fallback payload with empty message text");
						metrics::counter!("streambridge_events_dropped_total", "backend" => "fallback").increment(1);
						continue;
					};

					let ev = PipelineEvent::Chat(chat);
					if let Err(e) = validate_event(&ev) {
						debug!(error = %e, "dropping invalid fallback event");
						metrics::counter!("streambridge_events_dropped_total", "backend" => "fallback").increment(1);
						continue;
					}

					metrics::counter!("streambridge_events_ingested_total", "backend" => "fallback").increment(1);
					if parsed_tx.send(ev).is_err() {
						debug!("parsed queue consumer dropped; parser worker exiting");
						break;
					}
				}

				changed = cancel_rx.changed() => {
					if changed.is_err() || *cancel_rx.borrow() {
						info!("parser worker observed cancellation");
						break;
					}
				}
			}
		}
	})
}
