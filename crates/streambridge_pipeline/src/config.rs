#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use streambridge_backend::{Credentials, SecretString};
use tracing::{info, warn};

use crate::dispatch::{DEFAULT_COMMAND_PREFIX, DEFAULT_EVENTS_PER_TICK, DispatchConfig};
use crate::orchestrator::OrchestratorTimings;

/// Default config path: `~/.streambridge/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".streambridge").join("config.toml"))
}

/// Load the pipeline config from TOML and env overrides.
pub fn load_pipeline_config() -> anyhow::Result<PipelineConfig> {
	let path = default_config_path()?;
	load_pipeline_config_from_path(&path)
}

/// Same as `load_pipeline_config` but with an explicit config path.
pub fn load_pipeline_config_from_path(path: &Path) -> anyhow::Result<PipelineConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = PipelineConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Pipeline config (v1).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
	/// Allow falling back to the companion chat component.
	pub fallback_enabled: bool,
	/// Command prefix for chat commands; doubled prefix escapes.
	pub command_prefix: char,
	/// Max events dispatched per host tick.
	pub events_per_tick: usize,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	pub primary: PrimarySettings,
	pub timings: OrchestratorTimings,
}

impl Default for PipelineConfig {
	fn default() -> Self {
		Self {
			fallback_enabled: true,
			command_prefix: DEFAULT_COMMAND_PREFIX,
			events_per_tick: DEFAULT_EVENTS_PER_TICK,
			metrics_bind: None,
			primary: PrimarySettings::default(),
			timings: OrchestratorTimings::default(),
		}
	}
}

impl PipelineConfig {
	/// Dispatch settings derived from this config.
	pub fn dispatch(&self) -> DispatchConfig {
		DispatchConfig {
			events_per_tick: self.events_per_tick,
			command_prefix: self.command_prefix,
		}
	}
}

/// Primary backend settings loaded by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct PrimarySettings {
	/// User access token (bearer).
	pub access_token: Option<SecretString>,
	/// App client id.
	pub client_id: Option<String>,
	/// Broadcaster user id (channel the pipeline reads).
	pub broadcaster_user_id: Option<String>,
	/// Bot user id (identity used for sends).
	pub bot_user_id: Option<String>,
}

impl PrimarySettings {
	/// Credentials snapshot from config; fields may still be empty.
	pub fn credentials(&self) -> Credentials {
		Credentials {
			access_token: self.access_token.clone().unwrap_or_else(|| SecretString::new(String::new())),
			client_id: self.client_id.clone().unwrap_or_default(),
			broadcaster_user_id: self.broadcaster_user_id.clone().unwrap_or_default(),
			bot_user_id: self.bot_user_id.clone().unwrap_or_default(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	fallback_enabled: Option<bool>,
	command_prefix: Option<String>,
	events_per_tick: Option<usize>,
	metrics_bind: Option<String>,

	#[serde(default)]
	primary: FilePrimarySettings,

	#[serde(default)]
	timings: FileTimings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePrimarySettings {
	access_token: Option<String>,
	client_id: Option<String>,
	broadcaster_user_id: Option<String>,
	bot_user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTimings {
	credential_poll_interval_ms: Option<u64>,
	credential_poll_budget: Option<u32>,
	fallback_poll_interval_ms: Option<u64>,
	fallback_poll_attempts: Option<u32>,
	parser_shutdown_wait_ms: Option<u64>,
}

impl PipelineConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = OrchestratorTimings::default();
		let timings = OrchestratorTimings {
			credential_poll_interval: file
				.timings
				.credential_poll_interval_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.credential_poll_interval),
			credential_poll_budget: file.timings.credential_poll_budget.unwrap_or(defaults.credential_poll_budget),
			fallback_poll_interval: file
				.timings
				.fallback_poll_interval_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.fallback_poll_interval),
			fallback_poll_attempts: file.timings.fallback_poll_attempts.unwrap_or(defaults.fallback_poll_attempts),
			parser_shutdown_wait: file
				.timings
				.parser_shutdown_wait_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.parser_shutdown_wait),
		};

		Self {
			fallback_enabled: file.fallback_enabled.unwrap_or(true),
			command_prefix: parse_prefix(file.command_prefix.as_deref()).unwrap_or(DEFAULT_COMMAND_PREFIX),
			events_per_tick: file.events_per_tick.filter(|n| *n > 0).unwrap_or(DEFAULT_EVENTS_PER_TICK),
			metrics_bind: file.metrics_bind.filter(|s| !s.trim().is_empty()),
			primary: PrimarySettings {
				access_token: file
					.primary
					.access_token
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
				client_id: file.primary.client_id.filter(|s| !s.trim().is_empty()),
				broadcaster_user_id: file.primary.broadcaster_user_id.filter(|s| !s.trim().is_empty()),
				bot_user_id: file.primary.bot_user_id.filter(|s| !s.trim().is_empty()),
			},
			timings,
		}
	}
}

fn parse_prefix(v: Option<&str>) -> Option<char> {
	let v = v?.trim();
	let mut chars = v.chars();
	let first = chars.next()?;
	if chars.next().is_some() {
		warn!(prefix = %v, "config: command_prefix must be a single character; ignoring");
		return None;
	}
	Some(first)
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut PipelineConfig) {
	if let Ok(v) = std::env::var("STREAMBRIDGE_FALLBACK_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.fallback_enabled = enabled;
		info!(enabled, "pipeline config: fallback_enabled overridden by env");
	}

	if let Ok(v) = std::env::var("STREAMBRIDGE_COMMAND_PREFIX")
		&& let Some(prefix) = parse_prefix(Some(&v))
	{
		cfg.command_prefix = prefix;
		info!(%prefix, "pipeline config: command_prefix overridden by env");
	}

	if let Ok(v) = std::env::var("STREAMBRIDGE_EVENTS_PER_TICK")
		&& let Ok(n) = v.trim().parse::<usize>()
		&& n > 0
	{
		cfg.events_per_tick = n;
		info!(events_per_tick = n, "pipeline config: events_per_tick overridden by env");
	}

	if let Ok(v) = std::env::var("STREAMBRIDGE_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.metrics_bind = Some(v);
			info!("pipeline config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("STREAMBRIDGE_ACCESS_TOKEN") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.primary.access_token = Some(SecretString::new(v));
			info!("primary config: access_token overridden by env");
		}
	}

	if let Ok(v) = std::env::var("STREAMBRIDGE_CLIENT_ID") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.primary.client_id = Some(v);
			info!("primary config: client_id overridden by env");
		}
	}

	if let Ok(v) = std::env::var("STREAMBRIDGE_BROADCASTER_USER_ID") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.primary.broadcaster_user_id = Some(v);
			info!("primary config: broadcaster_user_id overridden by env");
		}
	}

	if let Ok(v) = std::env::var("STREAMBRIDGE_BOT_USER_ID") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.primary.bot_user_id = Some(v);
			info!("primary config: bot_user_id overridden by env");
		}
	}

	if let Ok(v) = std::env::var("STREAMBRIDGE_PARSER_SHUTDOWN_WAIT_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
	{
		cfg.timings.parser_shutdown_wait = Duration::from_millis(ms);
		info!(ms, "pipeline config: parser_shutdown_wait overridden by env");
	}

	if cfg.primary.access_token.is_none() {
		warn!("primary config: no access_token in config (waiting for credential provider)");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn from_file_applies_defaults_for_missing_fields() {
		let cfg = PipelineConfig::from_file(FileConfig::default());
		assert!(cfg.fallback_enabled);
		assert_eq!(cfg.command_prefix, DEFAULT_COMMAND_PREFIX);
		assert_eq!(cfg.events_per_tick, DEFAULT_EVENTS_PER_TICK);
		assert!(cfg.metrics_bind.is_none());
		assert!(cfg.primary.access_token.is_none());
		assert_eq!(cfg.timings.parser_shutdown_wait, Duration::from_millis(500));
	}

	#[test]
	fn from_file_parses_full_toml() {
		let file: FileConfig = toml::from_str(
			r#"
			fallback_enabled = false
			command_prefix = "~"
			events_per_tick = 4
			metrics_bind = "127.0.0.1:9184"

			[primary]
			access_token = "tok"
			client_id = "cid"
			broadcaster_user_id = "123"
			bot_user_id = "456"

			[timings]
			credential_poll_interval_ms = 250
			parser_shutdown_wait_ms = 100
			"#,
		)
		.unwrap();

		let cfg = PipelineConfig::from_file(file);
		assert!(!cfg.fallback_enabled);
		assert_eq!(cfg.command_prefix, '~');
		assert_eq!(cfg.events_per_tick, 4);
		assert_eq!(cfg.metrics_bind.as_deref(), Some("127.0.0.1:9184"));
		assert_eq!(cfg.primary.credentials().client_id, "cid");
		assert!(cfg.primary.credentials().is_complete());
		assert_eq!(cfg.timings.credential_poll_interval, Duration::from_millis(250));
		assert_eq!(cfg.timings.parser_shutdown_wait, Duration::from_millis(100));
	}

	#[test]
	fn blank_strings_are_treated_as_absent() {
		let file: FileConfig = toml::from_str(
			r#"
			metrics_bind = "  "

			[primary]
			access_token = ""
			"#,
		)
		.unwrap();

		let cfg = PipelineConfig::from_file(file);
		assert!(cfg.metrics_bind.is_none());
		assert!(cfg.primary.access_token.is_none());
		assert!(!cfg.primary.credentials().is_complete());
	}

	#[test]
	fn multi_char_prefix_is_rejected() {
		assert_eq!(parse_prefix(Some("!!")), None);
		assert_eq!(parse_prefix(Some("!")), Some('!'));
		assert_eq!(parse_prefix(Some(" ~ ")), Some('~'));
		assert_eq!(parse_prefix(Some("")), None);
	}

	#[test]
	fn zero_events_per_tick_falls_back_to_default() {
		let file: FileConfig = toml::from_str("events_per_tick = 0").unwrap();
		let cfg = PipelineConfig::from_file(file);
		assert_eq!(cfg.events_per_tick, DEFAULT_EVENTS_PER_TICK);
	}
}
