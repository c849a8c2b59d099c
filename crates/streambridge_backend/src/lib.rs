#![forbid(unsafe_code)]

pub mod fallback;
pub mod primary;

use core::fmt;

use streambridge_domain::PipelineEvent;
use tokio::sync::mpsc;

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl serde::Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<<S as serde::Serializer>::Ok, <S as serde::Serializer>::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str("")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Credentials consumed by the primary transport.
///
/// All fields are opaque strings owned by an external credential
/// provider; the pipeline only checks completeness.
#[derive(Debug, Clone)]
pub struct Credentials {
	pub access_token: SecretString,
	pub client_id: String,
	pub broadcaster_user_id: String,
	pub bot_user_id: String,
}

impl Credentials {
	pub fn empty() -> Self {
		Self {
			access_token: SecretString::new(String::new()),
			client_id: String::new(),
			broadcaster_user_id: String::new(),
			bot_user_id: String::new(),
		}
	}

	/// Whether every field required for a primary connect is populated.
	pub fn is_complete(&self) -> bool {
		!self.access_token.is_empty()
			&& !self.client_id.trim().is_empty()
			&& !self.broadcaster_user_id.trim().is_empty()
			&& !self.bot_user_id.trim().is_empty()
	}
}

/// External credential provider seam.
#[async_trait::async_trait]
pub trait CredentialProvider: Send + Sync + 'static {
	/// Whether a complete credential set is available right now.
	fn is_ready(&self) -> bool;

	/// Refresh or acquire credentials; may suspend. A failed ensure
	/// counts as not-ready, never as a fatal error.
	async fn ensure_ready(&self) -> anyhow::Result<()>;

	/// Best-effort snapshot of the current credential fields.
	fn snapshot(&self) -> Credentials;
}

/// Helper types for wiring event producers to the dispatcher.
pub type ParsedEventTx = mpsc::UnboundedSender<PipelineEvent>;
pub type ParsedEventRx = mpsc::UnboundedReceiver<PipelineEvent>;

/// Build the parsed-event channel pair.
pub fn parsed_event_channel() -> (ParsedEventTx, ParsedEventRx) {
	mpsc::unbounded_channel()
}
