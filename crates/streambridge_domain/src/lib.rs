#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sender name used when no display-name candidate resolves.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Which backend produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
	Primary,
	Fallback,
}

impl BackendKind {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			BackendKind::Primary => "primary",
			BackendKind::Fallback => "fallback",
		}
	}
}

impl fmt::Display for BackendKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseBackendError {
	#[error("empty value")]
	Empty,
	#[error("unknown backend: {0}")]
	Unknown(String),
}

impl FromStr for BackendKind {
	type Err = ParseBackendError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseBackendError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"primary" => Ok(BackendKind::Primary),
			"fallback" => Ok(BackendKind::Fallback),
			other => Err(ParseBackendError::Unknown(other.to_string())),
		}
	}
}

/// Which backend is currently active for a session.
///
/// Exactly one value holds at any time; transitions happen only inside
/// the orchestrator and are monotonic within a session (no silent
/// switch after initialization, only Shutdown → Initialize).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
	#[default]
	None,
	Primary,
	Fallback,
}

impl BackendState {
	pub const fn as_str(self) -> &'static str {
		match self {
			BackendState::None => "none",
			BackendState::Primary => "primary",
			BackendState::Fallback => "fallback",
		}
	}

	/// The kind of the active backend, if any.
	pub const fn kind(self) -> Option<BackendKind> {
		match self {
			BackendState::None => None,
			BackendState::Primary => Some(BackendKind::Primary),
			BackendState::Fallback => Some(BackendKind::Fallback),
		}
	}
}

impl fmt::Display for BackendState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Role flags attached to the sender of a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderRoles {
	#[serde(default)]
	pub broadcaster: bool,

	#[serde(default)]
	pub moderator: bool,

	#[serde(default)]
	pub subscriber: bool,

	#[serde(default)]
	pub vip: bool,
}

/// Canonical chat message, independent of origin backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
	pub origin: BackendKind,

	/// Sender display name (never empty; `UNKNOWN_SENDER` when unresolved).
	pub sender: String,

	/// Message text. Never empty once past parsing.
	pub text: String,

	pub roles: SenderRoles,

	/// Bits/cheer amount, 0 when not applicable.
	#[serde(default)]
	pub bits: u64,

	/// Synthesized from a reward redemption rather than typed chat.
	#[serde(default)]
	pub from_redemption: bool,

	/// Opaque backend-native message payload, retained only for
	/// adapter-specific replies. The dispatcher never inspects it.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub native: Option<serde_json::Value>,
}

impl ChatEvent {
	/// Construct a plain chat event with default roles.
	pub fn new(origin: BackendKind, sender: impl Into<String>, text: impl Into<String>) -> Self {
		Self {
			origin,
			sender: sender.into(),
			text: text.into(),
			roles: SenderRoles::default(),
			bits: 0,
			from_redemption: false,
			native: None,
		}
	}

	/// Whether the text is a command: single prefix, not the doubled
	/// escape form.
	pub fn is_command(&self, prefix: char) -> bool {
		let mut chars = self.text.chars();
		chars.next() == Some(prefix) && chars.next() != Some(prefix)
	}
}

/// Unified event carried by the parsed queue to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
	Chat(ChatEvent),

	Follow {
		origin: BackendKind,
		user: String,
	},

	Subscription {
		origin: BackendKind,
		user: String,
		tier: String,
	},

	Raid {
		origin: BackendKind,
		raider: String,
		viewers: u64,
	},
}

impl PipelineEvent {
	pub const fn origin(&self) -> BackendKind {
		match self {
			PipelineEvent::Chat(ev) => ev.origin,
			PipelineEvent::Follow { origin, .. }
			| PipelineEvent::Subscription { origin, .. }
			| PipelineEvent::Raid { origin, .. } => *origin,
		}
	}
}

/// Errors raised by event validation at the adapter boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidEvent {
	#[error("chat text must be non-empty")]
	EmptyText,
	#[error("sender must be non-empty")]
	EmptySender,
}

/// Validate the invariants every event must satisfy before enqueue.
pub fn validate_event(ev: &PipelineEvent) -> Result<(), InvalidEvent> {
	match ev {
		PipelineEvent::Chat(chat) => {
			if chat.text.trim().is_empty() {
				return Err(InvalidEvent::EmptyText);
			}
			if chat.sender.trim().is_empty() {
				return Err(InvalidEvent::EmptySender);
			}
			Ok(())
		}
		PipelineEvent::Follow { user, .. } => {
			if user.trim().is_empty() {
				return Err(InvalidEvent::EmptySender);
			}
			Ok(())
		}
		PipelineEvent::Subscription { user, .. } => {
			if user.trim().is_empty() {
				return Err(InvalidEvent::EmptySender);
			}
			Ok(())
		}
		PipelineEvent::Raid { raider, .. } => {
			if raider.trim().is_empty() {
				return Err(InvalidEvent::EmptySender);
			}
			Ok(())
		}
	}
}
