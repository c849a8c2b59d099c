#![forbid(unsafe_code)]

//! Demo host: runs the pipeline against an in-process companion
//! component that feeds synthetic chat, with the primary transport
//! permanently offline so the fallback path is exercised end to end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use streambridge_backend::fallback::host::{
	CapabilityError, ComponentHost, ComponentModule, ListenerFn, ListenerGuard, ServiceSurface,
};
use streambridge_backend::fallback::{COMPONENT_ID, LOADING_EVENT, MESSAGE_EVENT, SEND_MEMBER, SERVICE_TYPE};
use streambridge_backend::primary::{EventSubTransport, PrimaryEvent};
use streambridge_backend::{CredentialProvider, Credentials};
use streambridge_domain::{BackendState, ChatEvent};
use streambridge_pipeline::config::{default_config_path, load_pipeline_config_from_path};
use streambridge_pipeline::{ChatPipeline, CommandRouter, EventListener};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,streambridge_pipeline=debug".to_string());

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.init();
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

/// Provider backed by whatever the config file holds; usually empty in
/// a demo run, which sends arbitration down the fallback path.
struct ConfigCredentials {
	creds: Credentials,
}

#[async_trait::async_trait]
impl CredentialProvider for ConfigCredentials {
	fn is_ready(&self) -> bool {
		self.creds.is_complete()
	}

	async fn ensure_ready(&self) -> anyhow::Result<()> {
		Ok(())
	}

	fn snapshot(&self) -> Credentials {
		self.creds.clone()
	}
}

/// Transport with no network behind it.
struct OfflineTransport;

#[async_trait::async_trait]
impl EventSubTransport for OfflineTransport {
	async fn connect(&self, _creds: &Credentials) -> anyhow::Result<mpsc::UnboundedReceiver<PrimaryEvent>> {
		anyhow::bail!("demo transport is offline")
	}

	fn is_connected(&self) -> bool {
		false
	}

	async fn send_chat(&self, _text: &str) -> anyhow::Result<()> {
		anyhow::bail!("demo transport is offline")
	}

	async fn shutdown(&self) {}
}

/// In-process companion service emitting synthetic chat payloads with
/// deliberately varied field names.
struct DemoService {
	listeners: Mutex<Vec<(String, ListenerFn)>>,
}

impl DemoService {
	fn new() -> Self {
		Self {
			listeners: Mutex::new(Vec::new()),
		}
	}

	fn emit(&self, event: &str, payload: serde_json::Value) {
		for (name, listener) in self.listeners.lock().iter() {
			if name == event {
				listener(payload.clone());
			}
		}
	}

	fn emit_demo_message(&self, seq: u32) {
		let payload = match seq % 4 {
			0 => json!({
				"DisplayName": "demo_viewer",
				"Message": format!("hello from the companion ({seq})"),
			}),
			1 => json!({
				"UserName": "demo_mod",
				"Text": format!("alternate field names still parse ({seq})"),
				"IsMod": true,
			}),
			2 => json!({
				"Name": "demo_cheerer",
				"Content": format!("cheer ({seq})"),
				"BitsAmount": 100,
				"IsSubscriber": "true",
			}),
			_ => json!({
				"UserName": "demo_commander",
				"Message": "!ping",
			}),
		};
		self.emit(MESSAGE_EVENT, payload);
	}
}

impl ServiceSurface for DemoService {
	fn has_member(&self, name: &str) -> bool {
		matches!(name, MESSAGE_EVENT | SEND_MEMBER | LOADING_EVENT)
	}

	fn invoke(&self, member: &str, args: serde_json::Value) -> Result<serde_json::Value, CapabilityError> {
		if !self.has_member(member) {
			return Err(CapabilityError::MemberNotFound(member.to_string()));
		}
		info!(member, args = %args, "companion invoked");
		Ok(serde_json::Value::Null)
	}

	fn attach_listener(&self, event: &str, listener: ListenerFn) -> Result<ListenerGuard, CapabilityError> {
		if !self.has_member(event) {
			return Err(CapabilityError::AttachFailed {
				event: event.to_string(),
				detail: "unknown event".to_string(),
			});
		}
		self.listeners.lock().push((event.to_string(), listener));
		Ok(ListenerGuard::noop())
	}
}

struct DemoModule {
	service: Arc<DemoService>,
}

impl ComponentModule for DemoModule {
	fn service(&self, type_name: &str) -> Option<Arc<dyn ServiceSurface>> {
		(type_name == SERVICE_TYPE).then(|| Arc::clone(&self.service) as Arc<dyn ServiceSurface>)
	}
}

/// Host whose companion module "finishes loading" after a delay, so
/// the readiness polling loop is visible in the logs.
struct DemoHost {
	service: Arc<DemoService>,
	ready_at: Instant,
}

impl ComponentHost for DemoHost {
	fn module(&self, logical_id: &str) -> Option<Arc<dyn ComponentModule>> {
		if logical_id != COMPONENT_ID || Instant::now() < self.ready_at {
			return None;
		}
		Some(Arc::new(DemoModule {
			service: Arc::clone(&self.service),
		}))
	}
}

struct LogListener;

impl EventListener for LogListener {
	fn on_chat(&mut self, ev: &ChatEvent) {
		info!(origin = %ev.origin, sender = %ev.sender, bits = ev.bits, "chat: {}", ev.text);
	}

	fn on_follow(&mut self, user: &str) {
		info!(user, "new follower");
	}

	fn on_subscription(&mut self, user: &str, tier: &str) {
		info!(user, tier, "new subscription");
	}

	fn on_raid(&mut self, raider: &str, viewers: u64) {
		info!(raider, viewers, "incoming raid");
	}
}

struct LogRouter;

impl CommandRouter for LogRouter {
	fn process_command(&mut self, text: &str, ev: &ChatEvent) {
		info!(sender = %ev.sender, command = text, "command routed");
	}
}

fn main() -> anyhow::Result<()> {
	init_tracing();

	let config_path = default_config_path()?;
	let cfg = load_pipeline_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded pipeline config (toml + env overrides)");

	init_metrics(cfg.metrics_bind.as_deref());

	let provider = Arc::new(ConfigCredentials {
		creds: cfg.primary.credentials(),
	});
	let transport = Arc::new(OfflineTransport);
	let service = Arc::new(DemoService::new());
	let host = Arc::new(DemoHost {
		service: Arc::clone(&service),
		ready_at: Instant::now() + Duration::from_secs(2),
	});

	let mut pipeline = ChatPipeline::new(provider, transport, host, cfg);
	pipeline.add_listener(Box::new(LogListener));
	pipeline.set_command_router(Box::new(LogRouter));
	pipeline.initialize();

	// Tick like a host loop for ~30 seconds, feeding the companion a
	// synthetic message every couple of ticks once the fallback binds.
	let mut seq = 0u32;
	for tick in 0..60u32 {
		if pipeline.backend_state() == BackendState::Fallback && tick % 2 == 0 {
			service.emit_demo_message(seq);
			seq += 1;
		}
		pipeline.tick(&|| true);
		std::thread::sleep(Duration::from_millis(500));
	}

	pipeline.send_chat_message("demo run complete");
	pipeline.shutdown();
	Ok(())
}
