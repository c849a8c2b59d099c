#![forbid(unsafe_code)]

use core::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from probing or invoking a single capability.
#[derive(Debug, Error, Clone)]
pub enum CapabilityError {
	#[error("member not found: {0}")]
	MemberNotFound(String),

	#[error("invoke failed: {member}: {detail}")]
	InvokeFailed {
		member: String,
		detail: String,
	},

	#[error("listener attach failed: {event}: {detail}")]
	AttachFailed {
		event: String,
		detail: String,
	},
}

/// Host of externally-loaded components, resolved by logical id.
///
/// The concrete components behind this seam are independently
/// versioned; nothing about their surface is known at compile time.
pub trait ComponentHost: Send + Sync + 'static {
	fn module(&self, logical_id: &str) -> Option<Arc<dyn ComponentModule>>;
}

/// One loaded component module.
pub trait ComponentModule: Send + Sync {
	/// Locate a service type within the module by fully-qualified name.
	fn service(&self, type_name: &str) -> Option<Arc<dyn ServiceSurface>>;
}

/// Callback attached to a service event; receives the backend-native
/// message payload.
pub type ListenerFn = Box<dyn Fn(serde_json::Value) + Send + Sync>;

/// The public surface of a located service, probed member by member.
///
/// Every operation succeeds or fails per-attempt; a missing member is
/// an error value, never a panic.
pub trait ServiceSurface: Send + Sync {
	/// Whether the named member (method or event) exists.
	fn has_member(&self, name: &str) -> bool;

	/// Invoke a named method with a JSON argument payload.
	fn invoke(&self, member: &str, args: serde_json::Value) -> Result<serde_json::Value, CapabilityError>;

	/// Attach a listener to a named event. The guard detaches on drop.
	fn attach_listener(&self, event: &str, listener: ListenerFn) -> Result<ListenerGuard, CapabilityError>;
}

impl fmt::Debug for dyn ServiceSurface {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServiceSurface").finish_non_exhaustive()
	}
}

/// Detaches an attached listener when dropped.
pub struct ListenerGuard {
	detach: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerGuard {
	pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
		Self {
			detach: Some(Box::new(detach)),
		}
	}

	/// Guard for hosts that have no detach operation.
	pub fn noop() -> Self {
		Self { detach: None }
	}
}

impl Drop for ListenerGuard {
	fn drop(&mut self) {
		if let Some(detach) = self.detach.take() {
			detach();
		}
	}
}

impl fmt::Debug for ListenerGuard {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ListenerGuard")
			.field("detachable", &self.detach.is_some())
			.finish()
	}
}

/// Opaque (service-handle, message-handle) pair captured on the
/// fallback callback thread. Meaningless until parsed; ownership
/// transfers to the parser worker on enqueue.
pub struct RawPayload {
	pub service: Arc<dyn ServiceSurface>,
	pub message: serde_json::Value,
}

impl fmt::Debug for RawPayload {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RawPayload").field("message", &self.message).finish()
	}
}

pub type RawPayloadTx = mpsc::UnboundedSender<RawPayload>;
pub type RawPayloadRx = mpsc::UnboundedReceiver<RawPayload>;

/// Build the raw-payload channel pair.
pub fn raw_payload_channel() -> (RawPayloadTx, RawPayloadRx) {
	mpsc::unbounded_channel()
}
