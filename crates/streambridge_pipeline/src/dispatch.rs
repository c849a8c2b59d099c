#![forbid(unsafe_code)]

//! Dispatch scheduler: the single-threaded, frame-sliced consumer.
//!
//! Runs once per host tick. The per-tick budget bounds latency added
//! to a frame regardless of burst size; bursts smooth out across
//! subsequent ticks in order.

use std::collections::VecDeque;

use streambridge_backend::ParsedEventRx;
use streambridge_domain::{ChatEvent, PipelineEvent};
use tracing::trace;

/// Default number of events drained per tick.
pub const DEFAULT_EVENTS_PER_TICK: usize = 10;

/// Default command prefix. A doubled prefix escapes command handling.
pub const DEFAULT_COMMAND_PREFIX: char = '!';

/// Listener fan-out target for dispatched events.
pub trait EventListener: Send {
	fn on_chat(&mut self, _ev: &ChatEvent) {}
	fn on_follow(&mut self, _user: &str) {}
	fn on_subscription(&mut self, _user: &str, _tier: &str) {}
	fn on_raid(&mut self, _raider: &str, _viewers: u64) {}
}

/// External command router, invoked only for command-prefixed chat.
pub trait CommandRouter: Send {
	fn process_command(&mut self, text: &str, ev: &ChatEvent);
}

/// Dispatch settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
	pub events_per_tick: usize,
	pub command_prefix: char,
}

impl Default for DispatchConfig {
	fn default() -> Self {
		Self {
			events_per_tick: DEFAULT_EVENTS_PER_TICK,
			command_prefix: DEFAULT_COMMAND_PREFIX,
		}
	}
}

/// The single consumer of the parsed queue.
pub struct DispatchScheduler {
	parsed_rx: ParsedEventRx,

	/// Events dequeued but not dispatched because the liveness signal
	/// dropped mid-drain. Served before the channel, preserving order.
	held: VecDeque<PipelineEvent>,

	listeners: Vec<Box<dyn EventListener>>,
	router: Option<Box<dyn CommandRouter>>,
	cfg: DispatchConfig,
}

impl DispatchScheduler {
	pub fn new(parsed_rx: ParsedEventRx, cfg: DispatchConfig) -> Self {
		Self {
			parsed_rx,
			held: VecDeque::new(),
			listeners: Vec::new(),
			router: None,
			cfg,
		}
	}

	/// Register a fan-out listener.
	pub fn add_listener(&mut self, listener: Box<dyn EventListener>) {
		self.listeners.push(listener);
	}

	/// Install the external command router.
	pub fn set_command_router(&mut self, router: Box<dyn CommandRouter>) {
		self.router = Some(router);
	}

	/// Events currently buffered and awaiting dispatch.
	pub fn pending_len(&self) -> usize {
		self.held.len() + self.parsed_rx.len()
	}

	/// Drain up to the per-tick budget, gated by the liveness signal.
	///
	/// The signal is read before the drain and again before each
	/// event; an unhealthy read pushes any already-dequeued event back
	/// to the front and stops the tick. Nothing is dispatched while
	/// unhealthy, nothing is lost. Returns the dispatch count.
	pub fn tick(&mut self, live: &dyn Fn() -> bool) -> usize {
		if !live() {
			return 0;
		}

		let mut dispatched = 0;
		while dispatched < self.cfg.events_per_tick {
			let Some(ev) = self.next_event() else {
				break;
			};

			if !live() {
				self.held.push_front(ev);
				break;
			}

			self.dispatch_one(&ev);
			dispatched += 1;
		}

		if dispatched > 0 {
			metrics::counter!("streambridge_events_dispatched_total").increment(dispatched as u64);
			trace!(dispatched, "tick drained events");
		}
		dispatched
	}

	fn next_event(&mut self) -> Option<PipelineEvent> {
		if let Some(ev) = self.held.pop_front() {
			return Some(ev);
		}
		self.parsed_rx.try_recv().ok()
	}

	fn dispatch_one(&mut self, ev: &PipelineEvent) {
		match ev {
			PipelineEvent::Chat(chat) => {
				for listener in self.listeners.iter_mut() {
					listener.on_chat(chat);
				}
				if chat.is_command(self.cfg.command_prefix)
					&& let Some(router) = self.router.as_mut()
				{
					router.process_command(&chat.text, chat);
				}
			}
			PipelineEvent::Follow { user, .. } => {
				for listener in self.listeners.iter_mut() {
					listener.on_follow(user);
				}
			}
			PipelineEvent::Subscription { user, tier, .. } => {
				for listener in self.listeners.iter_mut() {
					listener.on_subscription(user, tier);
				}
			}
			PipelineEvent::Raid { raider, viewers, .. } => {
				for listener in self.listeners.iter_mut() {
					listener.on_raid(raider, *viewers);
				}
			}
		}
	}
}
