#![forbid(unsafe_code)]

//! Backend arbitration: primary first, fallback second, idle last.
//!
//! Arbitration runs on a dedicated pipeline thread with its own
//! runtime. The caller's thread only talks to it through channels and
//! drives dispatch via [`ChatPipeline::tick`].

use std::sync::Arc;
use std::time::Duration;

use streambridge_backend::fallback::host::{ComponentHost, ServiceSurface, raw_payload_channel};
use streambridge_backend::fallback::{DiscoveryError, FallbackBinding, bind, probe_ready};
use streambridge_backend::primary::{EventSubTransport, PrimaryBackend};
use streambridge_backend::{CredentialProvider, ParsedEventTx, parsed_event_channel};
use streambridge_domain::BackendState;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::dispatch::{CommandRouter, DispatchScheduler, EventListener};
use crate::parser::spawn_parser_worker;

/// Timing knobs for the arbitration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorTimings {
	/// Interval between credential readiness checks.
	pub credential_poll_interval: Duration,
	/// Max credential checks before giving up on the primary.
	pub credential_poll_budget: u32,
	/// Interval between fallback readiness probes.
	pub fallback_poll_interval: Duration,
	/// Max fallback probes before declaring the pipeline unavailable.
	pub fallback_poll_attempts: u32,
	/// Bounded wait for the parser worker to observe cancellation.
	pub parser_shutdown_wait: Duration,
}

impl Default for OrchestratorTimings {
	fn default() -> Self {
		Self {
			credential_poll_interval: Duration::from_millis(500),
			credential_poll_budget: 20,
			fallback_poll_interval: Duration::from_secs(1),
			fallback_poll_attempts: 30,
			parser_shutdown_wait: Duration::from_millis(500),
		}
	}
}

#[derive(Debug)]
enum PipelineCommand {
	SendChat(String),
}

enum ActiveBackend {
	Primary(PrimaryBackend),
	Fallback(FallbackBinding),
}

struct PipelineHandle {
	cmd_tx: mpsc::UnboundedSender<PipelineCommand>,
	shutdown_tx: oneshot::Sender<()>,
	join_handle: std::thread::JoinHandle<()>,
}

/// The chat ingestion pipeline.
///
/// Owns the dispatch scheduler on the caller's thread and the
/// arbitration worker on its own thread. `initialize` and `shutdown`
/// are both idempotent; outbound sends before `initialize` are logged
/// no-ops.
pub struct ChatPipeline {
	provider: Arc<dyn CredentialProvider>,
	transport: Arc<dyn EventSubTransport>,
	host: Arc<dyn ComponentHost>,
	cfg: PipelineConfig,

	dispatcher: DispatchScheduler,
	parsed_tx: ParsedEventTx,

	state_tx: Arc<watch::Sender<BackendState>>,
	state_rx: watch::Receiver<BackendState>,

	running: Option<PipelineHandle>,
}

impl ChatPipeline {
	pub fn new(
		provider: Arc<dyn CredentialProvider>,
		transport: Arc<dyn EventSubTransport>,
		host: Arc<dyn ComponentHost>,
		cfg: PipelineConfig,
	) -> Self {
		let (parsed_tx, parsed_rx) = parsed_event_channel();
		let dispatcher = DispatchScheduler::new(parsed_rx, cfg.dispatch());
		let (state_tx, state_rx) = watch::channel(BackendState::None);

		Self {
			provider,
			transport,
			host,
			cfg,
			dispatcher,
			parsed_tx,
			state_tx: Arc::new(state_tx),
			state_rx,
			running: None,
		}
	}

	/// Register a fan-out listener for dispatched events.
	pub fn add_listener(&mut self, listener: Box<dyn EventListener>) {
		self.dispatcher.add_listener(listener);
	}

	/// Install the external command router.
	pub fn set_command_router(&mut self, router: Box<dyn CommandRouter>) {
		self.dispatcher.set_command_router(router);
	}

	/// Spawn the arbitration worker. Calling again while running is a
	/// logged no-op; the first worker keeps its backend.
	pub fn initialize(&mut self) {
		if self.running.is_some() {
			warn!("pipeline already initialized; ignoring");
			return;
		}

		let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<PipelineCommand>();
		let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

		let provider = Arc::clone(&self.provider);
		let transport = Arc::clone(&self.transport);
		let host = Arc::clone(&self.host);
		let cfg = self.cfg.clone();
		let parsed_tx = self.parsed_tx.clone();
		let state_tx = Arc::clone(&self.state_tx);

		let join_handle = std::thread::Builder::new()
			.name("streambridge-pipeline".to_string())
			.spawn(move || {
				let rt = tokio::runtime::Builder::new_current_thread()
					.enable_all()
					.build()
					.expect("failed to build tokio runtime for pipeline");
				rt.block_on(run_pipeline(
					provider, transport, host, cfg, parsed_tx, state_tx, cmd_rx, shutdown_rx,
				));
			})
			.expect("failed to spawn pipeline thread");

		self.running = Some(PipelineHandle {
			cmd_tx,
			shutdown_tx,
			join_handle,
		});
		info!("pipeline initialized");
	}

	/// Stop the worker and join it. Safe to call at any time, any
	/// number of times, initialized or not.
	pub fn shutdown(&mut self) {
		let Some(handle) = self.running.take() else {
			debug!("shutdown with no running pipeline");
			return;
		};

		let _ = handle.shutdown_tx.send(());
		if handle.join_handle.join().is_err() {
			warn!("pipeline thread panicked during shutdown");
		}
		info!("pipeline shut down");
	}

	/// Route an outbound message through whichever backend is active.
	pub fn send_chat_message(&self, text: impl Into<String>) {
		let Some(handle) = self.running.as_ref() else {
			warn!("pipeline not initialized; dropping outbound message");
			return;
		};
		if handle.cmd_tx.send(PipelineCommand::SendChat(text.into())).is_err() {
			warn!("pipeline worker gone; dropping outbound message");
		}
	}

	/// Which backend is currently feeding the pipeline.
	pub fn backend_state(&self) -> BackendState {
		*self.state_rx.borrow()
	}

	/// Events buffered and awaiting dispatch.
	pub fn pending_events(&self) -> usize {
		self.dispatcher.pending_len()
	}

	/// Drive dispatch for one host tick. See [`DispatchScheduler::tick`].
	pub fn tick(&mut self, live: &dyn Fn() -> bool) -> usize {
		self.dispatcher.tick(live)
	}
}

impl Drop for ChatPipeline {
	fn drop(&mut self) {
		self.shutdown();
	}
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
	provider: Arc<dyn CredentialProvider>,
	transport: Arc<dyn EventSubTransport>,
	host: Arc<dyn ComponentHost>,
	cfg: PipelineConfig,
	parsed_tx: ParsedEventTx,
	state_tx: Arc<watch::Sender<BackendState>>,
	mut cmd_rx: mpsc::UnboundedReceiver<PipelineCommand>,
	mut shutdown_rx: oneshot::Receiver<()>,
) {
	let timings = cfg.timings;

	// Arbitration must never delay shutdown: a shutdown issued while
	// the polling loops are still running cancels them mid-sleep.
	let mut shutdown_requested = false;
	let (mut backend, mut parser) = tokio::select! {
		picked = arbitrate(&provider, &transport, &host, &cfg, &parsed_tx, &state_tx) => picked,
		_ = &mut shutdown_rx => {
			info!("shutdown requested during arbitration");
			shutdown_requested = true;
			(None, None)
		}
	};

	if backend.is_none() && !shutdown_requested {
		warn!("no chat backend available; pipeline idle until shutdown");
	}

	while !shutdown_requested {
		tokio::select! {
			cmd = cmd_rx.recv() => match cmd {
				Some(PipelineCommand::SendChat(text)) => match backend.as_ref() {
					Some(ActiveBackend::Primary(primary)) => {
						if !primary.is_connected() {
							warn!("primary transport reports disconnected; attempting send anyway");
						}
						primary.send_chat(text);
					}
					Some(ActiveBackend::Fallback(binding)) => binding.send_chat(&text),
					None => warn!("no backend active; dropping outbound message"),
				},
				None => shutdown_requested = true,
			},

			_ = &mut shutdown_rx => shutdown_requested = true,
		}
	}

	// Teardown: stop reporting a backend, stop the producer, then give
	// the parser a bounded window to observe cancellation.
	let _ = state_tx.send(BackendState::None);

	match backend.take() {
		Some(ActiveBackend::Primary(primary)) => primary.shutdown().await,
		Some(ActiveBackend::Fallback(binding)) => drop(binding),
		// A connect cancelled mid-arbitration may have left the
		// transport half-open; its shutdown is safe at any time.
		None => transport.shutdown().await,
	}

	if let Some((cancel_tx, handle)) = parser.take() {
		let _ = cancel_tx.send(true);
		match tokio::time::timeout(timings.parser_shutdown_wait, handle).await {
			Ok(Err(e)) => warn!(error = %e, "parser worker join failed"),
			Err(_) => warn!(
				wait_ms = timings.parser_shutdown_wait.as_millis() as u64,
				"parser worker did not exit within shutdown wait; detaching"
			),
			Ok(Ok(())) => {}
		}
	}

	info!("pipeline worker exiting");
}

/// Pick a backend: primary first when credentials allow, fallback
/// second when enabled. Returns the active backend and, for the
/// fallback, its parser worker.
async fn arbitrate(
	provider: &Arc<dyn CredentialProvider>,
	transport: &Arc<dyn EventSubTransport>,
	host: &Arc<dyn ComponentHost>,
	cfg: &PipelineConfig,
	parsed_tx: &ParsedEventTx,
	state_tx: &watch::Sender<BackendState>,
) -> (Option<ActiveBackend>, Option<(watch::Sender<bool>, JoinHandle<()>)>) {
	let timings = cfg.timings;

	if await_credentials(provider.as_ref(), &timings).await {
		match PrimaryBackend::start(Arc::clone(transport), &provider.snapshot(), parsed_tx.clone()).await {
			Ok(primary) => {
				let _ = state_tx.send(BackendState::Primary);
				info!("primary backend active");
				return (Some(ActiveBackend::Primary(primary)), None);
			}
			Err(e) => warn!(error = %e, "primary backend failed to start"),
		}
	} else {
		warn!("credentials not ready within poll budget; skipping primary");
	}

	if cfg.fallback_enabled {
		match probe_fallback(host.as_ref(), &timings).await {
			Ok(service) => {
				let (raw_tx, raw_rx) = raw_payload_channel();
				match bind(service, raw_tx) {
					Ok(binding) => {
						let (cancel_tx, cancel_rx) = watch::channel(false);
						let worker = spawn_parser_worker(raw_rx, parsed_tx.clone(), cancel_rx);
						let _ = state_tx.send(BackendState::Fallback);
						info!("fallback backend active");
						return (Some(ActiveBackend::Fallback(binding)), Some((cancel_tx, worker)));
					}
					Err(e) => warn!(error = %e, "fallback binding failed"),
				}
			}
			Err(e) => warn!(error = %e, "fallback never became ready"),
		}
	}

	(None, None)
}

/// Bounded wait for a complete credential set.
///
/// A failed refresh counts as not-ready and the loop continues. When
/// the budget runs out the caller still proceeds with whatever fields
/// are populated; an incomplete set just skips the primary. The sleep
/// sits between attempts, so an exhausted budget moves on immediately
/// after the last check.
async fn await_credentials(provider: &dyn CredentialProvider, timings: &OrchestratorTimings) -> bool {
	for attempt in 0..timings.credential_poll_budget {
		if attempt > 0 {
			tokio::time::sleep(timings.credential_poll_interval).await;
		}
		if let Err(e) = provider.ensure_ready().await {
			debug!(attempt, error = %e, "credential refresh failed");
		}
		if provider.is_ready() && provider.snapshot().is_complete() {
			return true;
		}
		debug!(attempt, "credentials not ready yet");
	}
	provider.snapshot().is_complete()
}

/// Poll the component host until the companion service is ready.
///
/// Transient probe failures retry up to the attempt budget; a hard
/// failure aborts the fallback immediately.
async fn probe_fallback(host: &dyn ComponentHost, timings: &OrchestratorTimings) -> Result<Arc<dyn ServiceSurface>, DiscoveryError> {
	let mut last = DiscoveryError::ComponentNotLoaded(streambridge_backend::fallback::COMPONENT_ID.to_string());

	for attempt in 1..=timings.fallback_poll_attempts {
		if attempt > 1 {
			tokio::time::sleep(timings.fallback_poll_interval).await;
		}
		match probe_ready(host) {
			Ok(service) => {
				info!(attempt, "companion service ready");
				return Ok(service);
			}
			Err(e) if e.is_transient() => {
				debug!(attempt, error = %e, "companion service not ready");
				last = e;
			}
			Err(e) => return Err(e),
		}
	}
	Err(last)
}
