// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runtime configuration types with resolved defaults.

use std::path::PathBuf;
use std::time::Duration;

use devloop_hooks::HookCommand;
use serde::{Deserialize, Serialize};

use crate::entries::{ForwardEntry, SyncEntry};
use crate::layer::*;
use crate::paths::PathsConfig;
use crate::ConfigError;

pub const DEFAULT_AGENT_PATH: &str = "/tmp/devloop-agent";

/// The final, validated configuration for devloop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevloopConfig {
	pub logging: LoggingConfig,
	pub selection: SelectionConfig,
	pub controller: ControllerConfig,
	pub agent: AgentConfig,
	pub sync: Vec<SyncEntry>,
	pub forward: Vec<ForwardEntry>,
	pub hooks: Vec<HookCommand>,

	/// Resolved XDG paths (not serialized)
	#[serde(skip)]
	pub paths: PathsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
	pub level: LogLevel,
	pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	Error,
	Warn,
	#[default]
	Info,
	Debug,
	Trace,
}

impl LogLevel {
	pub fn as_str(&self) -> &'static str {
		match self {
			LogLevel::Error => "error",
			LogLevel::Warn => "warn",
			LogLevel::Info => "info",
			LogLevel::Debug => "debug",
			LogLevel::Trace => "trace",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	#[default]
	Pretty,
	Json,
	Compact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
	pub namespace: Option<String>,
	#[serde(with = "secs")]
	pub timeout: Duration,
	#[serde(with = "millis")]
	pub poll_interval: Duration,
	#[serde(with = "secs")]
	pub initial_delay: Duration,
}

impl Default for SelectionConfig {
	fn default() -> Self {
		Self {
			namespace: None,
			timeout: Duration::from_secs(600),
			poll_interval: Duration::from_millis(1000),
			initial_delay: Duration::from_secs(2),
		}
	}
}

/// Restart and barrier settings shared by every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
	#[serde(with = "secs")]
	pub barrier_timeout: Duration,
	#[serde(with = "secs")]
	pub backoff: Duration,
	#[serde(with = "secs")]
	pub max_backoff: Duration,
	pub factor: f64,
	pub jitter: bool,
}

impl Default for ControllerConfig {
	fn default() -> Self {
		Self {
			barrier_timeout: Duration::from_secs(600),
			backoff: Duration::from_secs(15),
			max_backoff: Duration::from_secs(15),
			factor: 1.0,
			jitter: false,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
	/// Where the agent lives inside the container.
	pub path: String,
	/// Local directory holding `devloop-agent[-arm64]`.
	pub binary_dir: PathBuf,
	/// Copy the agent into containers that lack it.
	pub inject: bool,
}

mod secs {
	use serde::{Deserialize, Deserializer, Serializer};
	use std::time::Duration;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(duration.as_secs())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Duration::from_secs(u64::deserialize(deserializer)?))
	}
}

mod millis {
	use serde::{Deserialize, Deserializer, Serializer};
	use std::time::Duration;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(duration.as_millis() as u64)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Duration::from_millis(u64::deserialize(deserializer)?))
	}
}

impl DevloopConfig {
	/// Build runtime config from a merged layer and paths.
	pub fn from_layer(layer: ConfigLayer, paths: PathsConfig) -> Result<Self, ConfigError> {
		let logging = build_logging_config(layer.logging)?;
		let selection = build_selection_config(layer.selection);
		let controller = build_controller_config(layer.controller);
		let agent = build_agent_config(layer.agent, &paths);

		Ok(Self {
			logging,
			selection,
			controller,
			agent,
			sync: name_entries(layer.sync.unwrap_or_default(), "sync", |e| &mut e.name),
			forward: name_entries(layer.forward.unwrap_or_default(), "forward", |e| &mut e.name),
			hooks: layer.hooks.unwrap_or_default(),
			paths,
		})
	}

	pub fn get_sync(&self, name: &str) -> Option<&SyncEntry> {
		self.sync.iter().find(|e| e.name == name)
	}

	pub fn get_forward(&self, name: &str) -> Option<&ForwardEntry> {
		self.forward.iter().find(|e| e.name == name)
	}

	/// Namespace for an entry: its own, else `selection.namespace`.
	pub fn namespace_for<'a>(&'a self, entry_namespace: Option<&'a str>) -> Option<&'a str> {
		entry_namespace
			.filter(|ns| !ns.is_empty())
			.or(self.selection.namespace.as_deref())
	}
}

/// Unnamed entries get `<kind>-<position>`.
fn name_entries<T>(mut entries: Vec<T>, kind: &str, name: impl Fn(&mut T) -> &mut String) -> Vec<T> {
	for (i, entry) in entries.iter_mut().enumerate() {
		let slot = name(entry);
		if slot.trim().is_empty() {
			*slot = format!("{kind}-{}", i + 1);
		}
	}
	entries
}

fn build_logging_config(layer: Option<LoggingLayer>) -> Result<LoggingConfig, ConfigError> {
	let layer = layer.unwrap_or_default();
	Ok(LoggingConfig {
		level: parse_log_level(layer.level.as_deref())?,
		format: parse_log_format(layer.format.as_deref())?,
	})
}

pub fn parse_log_level(s: Option<&str>) -> Result<LogLevel, ConfigError> {
	match s.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
		None | Some("") | Some("info") => Ok(LogLevel::Info),
		Some("error") => Ok(LogLevel::Error),
		Some("warn") => Ok(LogLevel::Warn),
		Some("debug") => Ok(LogLevel::Debug),
		Some("trace") => Ok(LogLevel::Trace),
		Some(other) => Err(ConfigError::invalid_value(
			"logging.level",
			format!("unknown level {other:?}"),
		)),
	}
}

pub fn parse_log_format(s: Option<&str>) -> Result<LogFormat, ConfigError> {
	match s.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
		None | Some("") | Some("pretty") => Ok(LogFormat::Pretty),
		Some("json") => Ok(LogFormat::Json),
		Some("compact") => Ok(LogFormat::Compact),
		Some(other) => Err(ConfigError::invalid_value(
			"logging.format",
			format!("unknown format {other:?}"),
		)),
	}
}

fn build_selection_config(layer: Option<SelectionLayer>) -> SelectionConfig {
	let layer = layer.unwrap_or_default();
	let defaults = SelectionConfig::default();
	SelectionConfig {
		namespace: layer.namespace.filter(|ns| !ns.trim().is_empty()),
		timeout: layer.timeout_secs.map(Duration::from_secs).unwrap_or(defaults.timeout),
		poll_interval: layer
			.poll_interval_ms
			.map(Duration::from_millis)
			.unwrap_or(defaults.poll_interval),
		initial_delay: layer
			.initial_delay_secs
			.map(Duration::from_secs)
			.unwrap_or(defaults.initial_delay),
	}
}

fn build_controller_config(layer: Option<ControllerLayer>) -> ControllerConfig {
	let layer = layer.unwrap_or_default();
	let defaults = ControllerConfig::default();
	let backoff = layer.backoff_secs.map(Duration::from_secs).unwrap_or(defaults.backoff);
	ControllerConfig {
		barrier_timeout: layer
			.barrier_timeout_secs
			.map(Duration::from_secs)
			.unwrap_or(defaults.barrier_timeout),
		backoff,
		// Without an explicit cap the delay never grows past the first one.
		max_backoff: layer.max_backoff_secs.map(Duration::from_secs).unwrap_or(backoff),
		factor: layer.factor.unwrap_or(defaults.factor),
		jitter: layer.jitter.unwrap_or(defaults.jitter),
	}
}

fn build_agent_config(layer: Option<AgentLayer>, paths: &PathsConfig) -> AgentConfig {
	let layer = layer.unwrap_or_default();
	AgentConfig {
		path: layer
			.path
			.filter(|p| !p.trim().is_empty())
			.unwrap_or_else(|| DEFAULT_AGENT_PATH.to_string()),
		binary_dir: layer.binary_dir.unwrap_or_else(|| paths.agent_dir()),
		inject: layer.inject.unwrap_or(true),
	}
}
