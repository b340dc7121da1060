// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: files, environment, CLI, defaults.

use std::path::PathBuf;

use tracing::{debug, trace, warn};

use crate::layer::*;
use crate::paths::PathsConfig;
use crate::ConfigError;

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	UserFile = 30,
	WorkspaceFile = 40,
	Environment = 50,
	Cli = 60,
}

pub trait ConfigSource: Send + Sync {
	/// Name for logging
	fn name(&self) -> &'static str;

	fn precedence(&self) -> Precedence;

	fn load(&self) -> Result<ConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}
	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading defaults");
		// Defaults are applied when the runtime config is built.
		Ok(ConfigLayer::default())
	}
}

/// File-based configuration source (TOML).
pub struct FileSource {
	path: PathBuf,
	precedence: Precedence,
	name: &'static str,
	required: bool,
}

impl FileSource {
	/// User config: ~/.config/devloop/config.toml
	pub fn user(paths: &PathsConfig) -> Self {
		Self::custom(paths.user_config_file.clone(), Precedence::UserFile, "user-config")
	}

	/// Workspace config: ./devloop.toml
	pub fn workspace(paths: &PathsConfig) -> Self {
		Self::custom(
			paths.workspace_config_file.clone(),
			Precedence::WorkspaceFile,
			"workspace-config",
		)
	}

	pub fn custom(path: PathBuf, precedence: Precedence, name: &'static str) -> Self {
		Self {
			path,
			precedence,
			name,
			required: false,
		}
	}

	/// Fail instead of skipping when the file does not exist.
	pub fn required(mut self) -> Self {
		self.required = true;
		self
	}
}

impl ConfigSource for FileSource {
	fn name(&self) -> &'static str {
		self.name
	}
	fn precedence(&self) -> Precedence {
		self.precedence
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		if !self.path.exists() && !self.required {
			debug!(path = %self.path.display(), source = self.name, "config file not found, skipping");
			return Ok(ConfigLayer::default());
		}

		debug!(path = %self.path.display(), source = self.name, "loading config file");

		let content = std::fs::read_to_string(&self.path)?;
		let layer: ConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!(source = self.name, "parsed config layer");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: DEVLOOP_<SECTION>_<FIELD>. Entries (`sync`, `forward`,
/// `hooks`) are file-only.
pub struct EnvSource {
	vars: Option<Vec<(String, String)>>,
}

impl EnvSource {
	pub fn new() -> Self {
		Self { vars: None }
	}

	/// Read from the given pairs instead of the process environment.
	pub fn from_vars<I, K, V>(vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			vars: Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
		}
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
	match value.parse() {
		Ok(v) => Some(v),
		Err(_) => {
			warn!(key = %key, value = %value, "ignoring non-numeric env var");
			None
		}
	}
}

fn parse_flag(key: &str, value: &str) -> Option<bool> {
	match value.to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => {
			warn!(key = %key, value = %value, "ignoring non-boolean env var");
			None
		}
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}
	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading environment variables");
		let mut layer = ConfigLayer::default();

		let vars: Vec<(String, String)> = match &self.vars {
			Some(vars) => vars.clone(),
			None => std::env::vars().collect(),
		};

		for (key, value) in vars {
			if !key.starts_with("DEVLOOP_") {
				continue;
			}

			let value = value.trim().to_string();
			if value.is_empty() {
				continue;
			}

			trace!(key = %key, "processing env var");

			match key.as_str() {
				// Logging
				"DEVLOOP_LOG_LEVEL" => {
					layer
						.logging
						.get_or_insert_with(LoggingLayer::default)
						.level = Some(value);
				}
				"DEVLOOP_LOG_FORMAT" => {
					layer
						.logging
						.get_or_insert_with(LoggingLayer::default)
						.format = Some(value);
				}

				// Selection
				"DEVLOOP_NAMESPACE" => {
					layer
						.selection
						.get_or_insert_with(SelectionLayer::default)
						.namespace = Some(value);
				}
				"DEVLOOP_SELECT_TIMEOUT_SECS" => {
					if let Some(v) = parse_number(&key, &value) {
						layer
							.selection
							.get_or_insert_with(SelectionLayer::default)
							.timeout_secs = Some(v);
					}
				}

				// Controller
				"DEVLOOP_BARRIER_TIMEOUT_SECS" => {
					if let Some(v) = parse_number(&key, &value) {
						layer
							.controller
							.get_or_insert_with(ControllerLayer::default)
							.barrier_timeout_secs = Some(v);
					}
				}
				"DEVLOOP_RESTART_BACKOFF_SECS" => {
					if let Some(v) = parse_number(&key, &value) {
						layer
							.controller
							.get_or_insert_with(ControllerLayer::default)
							.backoff_secs = Some(v);
					}
				}

				// Agent
				"DEVLOOP_AGENT_PATH" => {
					layer.agent.get_or_insert_with(AgentLayer::default).path = Some(value);
				}
				"DEVLOOP_AGENT_BINARY_DIR" => {
					layer
						.agent
						.get_or_insert_with(AgentLayer::default)
						.binary_dir = Some(PathBuf::from(value));
				}
				"DEVLOOP_AGENT_INJECT" => {
					if let Some(v) = parse_flag(&key, &value) {
						layer.agent.get_or_insert_with(AgentLayer::default).inject = Some(v);
					}
				}

				_ => {
					// Unknown DEVLOOP_ variable, ignore
				}
			}
		}

		Ok(layer)
	}
}

/// CLI override source.
pub struct CliSource {
	overrides: CliOverrides,
}

/// CLI argument overrides.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
	pub namespace: Option<String>,
	pub log_level: Option<String>,
	pub log_format: Option<String>,
	/// Replaces `./devloop.toml`.
	pub config_file: Option<PathBuf>,
	pub agent_binary_dir: Option<PathBuf>,
}

impl CliSource {
	pub fn new(overrides: CliOverrides) -> Self {
		Self { overrides }
	}
}

impl ConfigSource for CliSource {
	fn name(&self) -> &'static str {
		"cli"
	}
	fn precedence(&self) -> Precedence {
		Precedence::Cli
	}

	fn load(&self) -> Result<ConfigLayer, ConfigError> {
		debug!("loading CLI overrides");
		let mut layer = ConfigLayer::default();

		if let Some(ref namespace) = self.overrides.namespace {
			layer
				.selection
				.get_or_insert_with(SelectionLayer::default)
				.namespace = Some(namespace.clone());
		}

		if let Some(ref level) = self.overrides.log_level {
			layer
				.logging
				.get_or_insert_with(LoggingLayer::default)
				.level = Some(level.clone());
		}

		if let Some(ref format) = self.overrides.log_format {
			layer
				.logging
				.get_or_insert_with(LoggingLayer::default)
				.format = Some(format.clone());
		}

		if let Some(ref dir) = self.overrides.agent_binary_dir {
			layer
				.agent
				.get_or_insert_with(AgentLayer::default)
				.binary_dir = Some(dir.clone());
		}

		Ok(layer)
	}
}
