#![forbid(unsafe_code)]

use std::sync::Arc;

use streambridge_domain::{BackendKind, ChatEvent, PipelineEvent, SenderRoles, validate_event};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Credentials, ParsedEventTx};

/// Events delivered by the primary transport's own network context.
#[derive(Debug, Clone)]
pub enum PrimaryEvent {
	Chat {
		sender: String,
		text: String,
		roles: SenderRoles,
		bits: u64,
		from_redemption: bool,
		/// Transport-native payload kept for reply routing.
		native: Option<serde_json::Value>,
	},

	Follow {
		user: String,
	},

	Subscription {
		user: String,
		tier: String,
	},

	Raid {
		raider: String,
		viewers: u64,
	},
}

/// The external EventSub-like client the pipeline connects through.
///
/// The wire protocol behind this seam is owned by the collaborator;
/// `connect` applies the transport's own internal timeout and yields a
/// receiver that stays open for the life of the connection.
#[async_trait::async_trait]
pub trait EventSubTransport: Send + Sync + 'static {
	async fn connect(&self, creds: &Credentials) -> anyhow::Result<mpsc::UnboundedReceiver<PrimaryEvent>>;

	fn is_connected(&self) -> bool;

	async fn send_chat(&self, text: &str) -> anyhow::Result<()>;

	/// Close the connection. Must be safe to call at any time.
	async fn shutdown(&self);
}

/// Running primary backend: a connected transport plus the forwarder
/// task that maps transport events into the parsed queue.
pub struct PrimaryBackend {
	transport: Arc<dyn EventSubTransport>,
	forwarder: JoinHandle<()>,
}

impl PrimaryBackend {
	/// Connect and start forwarding. A connect failure is returned to
	/// the orchestrator, which decides whether to try the fallback.
	pub async fn start(transport: Arc<dyn EventSubTransport>, creds: &Credentials, parsed_tx: ParsedEventTx) -> anyhow::Result<Self> {
		let events_rx = transport.connect(creds).await?;
		info!("primary transport connected");
		metrics::gauge!("streambridge_backend_connected", "backend" => "primary").set(1.0);

		let forwarder = spawn_primary_forwarder(events_rx, parsed_tx);
		Ok(Self { transport, forwarder })
	}

	pub fn is_connected(&self) -> bool {
		self.transport.is_connected()
	}

	/// Hand the text to the transport's async send path. The caller
	/// never blocks; completion is logged.
	pub fn send_chat(&self, text: String) {
		let transport = Arc::clone(&self.transport);
		tokio::spawn(async move {
			match transport.send_chat(&text).await {
				Ok(()) => debug!(len = text.len(), "primary send completed"),
				Err(e) => warn!(error = %e, "primary send failed"),
			}
		});
	}

	pub async fn shutdown(self) {
		self.transport.shutdown().await;
		self.forwarder.abort();
		metrics::gauge!("streambridge_backend_connected", "backend" => "primary").set(0.0);
		info!("primary backend shut down");
	}
}

fn spawn_primary_forwarder(mut events_rx: mpsc::UnboundedReceiver<PrimaryEvent>, parsed_tx: ParsedEventTx) -> JoinHandle<()> {
	tokio::spawn(async move {
		while let Some(ev) = events_rx.recv().await {
			let Some(parsed) = map_primary_event(ev) else {
				continue;
			};

			if let Err(e) = validate_event(&parsed) {
				debug!(error = %e, "dropping invalid primary event");
				metrics::counter!("streambridge_events_dropped_total", "backend" => "primary").increment(1);
				continue;
			}

			metrics::counter!("streambridge_events_ingested_total", "backend" => "primary").increment(1);
			if parsed_tx.send(parsed).is_err() {
				debug!("parsed queue consumer dropped; primary forwarder exiting");
				break;
			}
		}
		debug!("primary event stream closed; forwarder exiting");
	})
}

fn map_primary_event(ev: PrimaryEvent) -> Option<PipelineEvent> {
	match ev {
		PrimaryEvent::Chat {
			sender,
			text,
			roles,
			bits,
			from_redemption,
			native,
		} => {
			// Empty-text events never reach the parsed queue.
			if text.trim().is_empty() {
				metrics::counter!("streambridge_events_dropped_total", "backend" => "primary").increment(1);
				return None;
			}
			Some(PipelineEvent::Chat(ChatEvent {
				origin: BackendKind::Primary,
				sender,
				text,
				roles,
				bits,
				from_redemption,
				native,
			}))
		}
		PrimaryEvent::Follow { user } => Some(PipelineEvent::Follow {
			origin: BackendKind::Primary,
			user,
		}),
		PrimaryEvent::Subscription { user, tier } => Some(PipelineEvent::Subscription {
			origin: BackendKind::Primary,
			user,
			tier,
		}),
		PrimaryEvent::Raid { raider, viewers } => Some(PipelineEvent::Raid {
			origin: BackendKind::Primary,
			raider,
			viewers,
		}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_chat_text_is_dropped_at_the_boundary() {
		let ev = PrimaryEvent::Chat {
			sender: "viewer".to_string(),
			text: "   ".to_string(),
			roles: SenderRoles::default(),
			bits: 0,
			from_redemption: false,
			native: None,
		};
		assert!(map_primary_event(ev).is_none());
	}

	#[test]
	fn chat_event_keeps_roles_and_bits() {
		let ev = PrimaryEvent::Chat {
			sender: "mod".to_string(),
			text: "hello".to_string(),
			roles: SenderRoles {
				moderator: true,
				..SenderRoles::default()
			},
			bits: 250,
			from_redemption: true,
			native: None,
		};

		let Some(PipelineEvent::Chat(chat)) = map_primary_event(ev) else {
			panic!("expected chat event");
		};
		assert_eq!(chat.origin, BackendKind::Primary);
		assert!(chat.roles.moderator);
		assert_eq!(chat.bits, 250);
		assert!(chat.from_redemption);
	}

	#[test]
	fn social_events_map_through() {
		let Some(PipelineEvent::Raid { raider, viewers, .. }) = map_primary_event(PrimaryEvent::Raid {
			raider: "raider".to_string(),
			viewers: 42,
		}) else {
			panic!("expected raid event");
		};
		assert_eq!(raider, "raider");
		assert_eq!(viewers, 42);
	}
}
