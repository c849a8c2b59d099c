#![forbid(unsafe_code)]

//! Dynamic fallback adapter.
//!
//! The companion component is treated as untyped: located by logical
//! id, its service type by fully-qualified name, and every capability
//! by member-name probing. Any subset of the optional capabilities may
//! be absent; only the message subscription is required.

pub mod host;
pub mod probe;

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fallback::host::{CapabilityError, ComponentHost, ListenerGuard, RawPayload, RawPayloadTx, ServiceSurface};

/// Logical id of the companion component within the host.
pub const COMPONENT_ID: &str = "companion.chat";

/// Fully-qualified name of the chat relay service type.
pub const SERVICE_TYPE: &str = "Companion.Chat.ChatRelayService";

/// Required: incoming text message event.
pub const MESSAGE_EVENT: &str = "MessageReceived";

/// Optional: outbound broadcast/send method.
pub const SEND_MEMBER: &str = "BroadcastMessage";

/// Optional: loading-state-changed event.
pub const LOADING_EVENT: &str = "LoadingStateChanged";

/// Discovery and binding failures.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("component not loaded: {0}")]
	ComponentNotLoaded(String),

	#[error("service type not found: {0}")]
	ServiceTypeNotFound(String),

	#[error("required capability missing: {0}")]
	CapabilityMissing(String),

	#[error("required listener attach failed")]
	Attach(#[source] CapabilityError),
}

impl DiscoveryError {
	/// Transient failures are retried by the orchestrator's readiness
	/// polling loop; attach failures abort the fallback attempt.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			DiscoveryError::ComponentNotLoaded(_)
				| DiscoveryError::ServiceTypeNotFound(_)
				| DiscoveryError::CapabilityMissing(_)
		)
	}
}

/// Readiness probe: module loaded, service type located, and the
/// required message-subscription member present.
///
/// The send and loading-state capabilities are optional and only
/// probed at bind time.
pub fn probe_ready(host: &dyn ComponentHost) -> Result<Arc<dyn ServiceSurface>, DiscoveryError> {
	let module = host
		.module(COMPONENT_ID)
		.ok_or_else(|| DiscoveryError::ComponentNotLoaded(COMPONENT_ID.to_string()))?;

	let service = module
		.service(SERVICE_TYPE)
		.ok_or_else(|| DiscoveryError::ServiceTypeNotFound(SERVICE_TYPE.to_string()))?;

	if !service.has_member(MESSAGE_EVENT) {
		return Err(DiscoveryError::CapabilityMissing(MESSAGE_EVENT.to_string()));
	}

	Ok(service)
}

/// Cached result of member discovery against the companion service.
///
/// Written once during the fallback probe, read-only afterwards. Each
/// dependent operation checks its own handle; none assumes another
/// capability resolved.
pub struct FallbackBinding {
	service: Arc<dyn ServiceSurface>,
	send_bound: bool,
	_message_guard: ListenerGuard,
	_loading_guard: Option<ListenerGuard>,
}

impl std::fmt::Debug for FallbackBinding {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FallbackBinding")
			.field("send_bound", &self.send_bound)
			.finish_non_exhaustive()
	}
}

/// Full binding: resolve the optional send member, attach the required
/// message listener, and best-effort attach the loading-state listener.
pub fn bind(service: Arc<dyn ServiceSurface>, raw_tx: RawPayloadTx) -> Result<FallbackBinding, DiscoveryError> {
	let send_bound = service.has_member(SEND_MEMBER);
	if !send_bound {
		// Degraded: outbound send becomes a logged no-op.
		debug!(member = SEND_MEMBER, "companion service has no send member; outbound send disabled");
	}

	let message_guard = {
		let callback_service = Arc::clone(&service);
		let listener: host::ListenerFn = Box::new(move |message| {
			// Runs on the component's callback thread; only enqueue.
			let payload = RawPayload {
				service: Arc::clone(&callback_service),
				message,
			};
			if raw_tx.send(payload).is_err() {
				debug!("raw queue consumer dropped; fallback message discarded");
			}
		});
		service.attach_listener(MESSAGE_EVENT, listener).map_err(DiscoveryError::Attach)?
	};

	let loading_guard = match service.attach_listener(
		LOADING_EVENT,
		Box::new(|state| {
			debug!(state = %state, "companion loading state changed");
		}),
	) {
		Ok(guard) => Some(guard),
		Err(e) => {
			debug!(error = %e, "loading-state listener not attached");
			None
		}
	};

	info!(send_bound, "fallback binding complete");
	metrics::gauge!("streambridge_backend_connected", "backend" => "fallback").set(1.0);

	Ok(FallbackBinding {
		service,
		send_bound,
		_message_guard: message_guard,
		_loading_guard: loading_guard,
	})
}

impl FallbackBinding {
	/// Whether outbound send resolved at bind time.
	pub fn can_send(&self) -> bool {
		self.send_bound
	}

	/// Route an outbound message through the companion's send member.
	/// No-op with a logged warning when the capability is unbound.
	pub fn send_chat(&self, text: &str) {
		if !self.send_bound {
			warn!("fallback send capability not bound; dropping outbound message");
			return;
		}

		match self.service.invoke(SEND_MEMBER, json!({ "Message": text })) {
			Ok(_) => debug!(len = text.len(), "fallback send completed"),
			Err(e) => warn!(error = %e, "fallback send failed"),
		}
	}
}

impl Drop for FallbackBinding {
	fn drop(&mut self) {
		metrics::gauge!("streambridge_backend_connected", "backend" => "fallback").set(0.0);
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use parking_lot::Mutex;
	use serde_json::json;

	use super::host::{
		CapabilityError, ComponentHost, ComponentModule, ListenerFn, ListenerGuard, ServiceSurface, raw_payload_channel,
	};
	use super::*;

	/// In-memory companion service with a configurable member set.
	struct FakeService {
		members: Vec<&'static str>,
		fail_attach: bool,
		listeners: Mutex<Vec<(String, ListenerFn)>>,
		sends: AtomicUsize,
	}

	impl FakeService {
		fn new(members: &[&'static str]) -> Self {
			Self {
				members: members.to_vec(),
				fail_attach: false,
				listeners: Mutex::new(Vec::new()),
				sends: AtomicUsize::new(0),
			}
		}

		fn emit(&self, event: &str, payload: serde_json::Value) {
			for (name, listener) in self.listeners.lock().iter() {
				if name == event {
					listener(payload.clone());
				}
			}
		}
	}

	impl ServiceSurface for FakeService {
		fn has_member(&self, name: &str) -> bool {
			self.members.contains(&name)
		}

		fn invoke(&self, member: &str, _args: serde_json::Value) -> Result<serde_json::Value, CapabilityError> {
			if !self.has_member(member) {
				return Err(CapabilityError::MemberNotFound(member.to_string()));
			}
			self.sends.fetch_add(1, Ordering::SeqCst);
			Ok(serde_json::Value::Null)
		}

		fn attach_listener(&self, event: &str, listener: ListenerFn) -> Result<ListenerGuard, CapabilityError> {
			if self.fail_attach || !self.has_member(event) {
				return Err(CapabilityError::AttachFailed {
					event: event.to_string(),
					detail: "unavailable".to_string(),
				});
			}
			self.listeners.lock().push((event.to_string(), listener));
			Ok(ListenerGuard::noop())
		}
	}

	struct FakeModule {
		service: Option<Arc<FakeService>>,
	}

	impl ComponentModule for FakeModule {
		fn service(&self, type_name: &str) -> Option<Arc<dyn ServiceSurface>> {
			if type_name != SERVICE_TYPE {
				return None;
			}
			self.service.clone().map(|s| s as Arc<dyn ServiceSurface>)
		}
	}

	struct FakeHost {
		module: Option<Arc<FakeModule>>,
	}

	impl ComponentHost for FakeHost {
		fn module(&self, logical_id: &str) -> Option<Arc<dyn ComponentModule>> {
			if logical_id != COMPONENT_ID {
				return None;
			}
			self.module.clone().map(|m| m as Arc<dyn ComponentModule>)
		}
	}

	#[test]
	fn probe_fails_while_component_not_loaded() {
		let host = FakeHost { module: None };
		let err = probe_ready(&host).unwrap_err();
		assert!(matches!(err, DiscoveryError::ComponentNotLoaded(_)));
		assert!(err.is_transient());
	}

	#[test]
	fn send_only_service_is_not_ready() {
		let service = Arc::new(FakeService::new(&[SEND_MEMBER]));
		let host = FakeHost {
			module: Some(Arc::new(FakeModule { service: Some(service) })),
		};
		let err = probe_ready(&host).unwrap_err();
		assert!(matches!(err, DiscoveryError::CapabilityMissing(_)));
	}

	#[test]
	fn binding_without_send_member_degrades() {
		let service = Arc::new(FakeService::new(&[MESSAGE_EVENT]));
		let (raw_tx, _raw_rx) = raw_payload_channel();

		let binding = bind(Arc::clone(&service) as Arc<dyn ServiceSurface>, raw_tx).expect("bind");
		assert!(!binding.can_send());

		// Unbound send is a logged no-op, not an invoke.
		binding.send_chat("hello");
		assert_eq!(service.sends.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn required_attach_failure_is_hard() {
		let mut service = FakeService::new(&[MESSAGE_EVENT, SEND_MEMBER]);
		service.fail_attach = true;
		let (raw_tx, _raw_rx) = raw_payload_channel();

		let err = bind(Arc::new(service) as Arc<dyn ServiceSurface>, raw_tx).unwrap_err();
		assert!(matches!(err, DiscoveryError::Attach(_)));
		assert!(!err.is_transient());
	}

	#[test]
	fn message_callback_enqueues_raw_payload() {
		let service = Arc::new(FakeService::new(&[MESSAGE_EVENT, SEND_MEMBER, LOADING_EVENT]));
		let (raw_tx, mut raw_rx) = raw_payload_channel();

		let binding = bind(Arc::clone(&service) as Arc<dyn ServiceSurface>, raw_tx).expect("bind");
		assert!(binding.can_send());

		service.emit(MESSAGE_EVENT, json!({ "UserName": "viewer", "Message": "hi" }));

		let payload = raw_rx.try_recv().expect("payload enqueued");
		assert_eq!(payload.message["Message"], "hi");

		binding.send_chat("reply");
		assert_eq!(service.sends.load(Ordering::SeqCst), 1);
	}
}
