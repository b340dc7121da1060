// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration management for devloop.
//!
//! This crate provides:
//! - XDG Base Directory compliant path resolution
//! - Layered configuration from multiple sources
//! - TOML configuration file parsing
//! - Environment variable overrides
//! - Configuration validation

pub mod defaults;
pub mod entries;
pub mod error;
pub mod layer;
pub mod paths;
pub mod registry;
pub mod runtime;
pub mod sources;
pub mod validation;

pub use defaults::{ensure_default_config, DEFAULT_CONFIG_TEMPLATE};
pub use entries::{ForwardEntry, SyncEntry, TargetSpec};
pub use error::{ConfigError, ConfigResult};
pub use layer::ConfigLayer;
pub use paths::{PathsConfig, WORKSPACE_CONFIG_FILE};
pub use registry::ConfigRegistry;
pub use runtime::{
	AgentConfig, ControllerConfig, DevloopConfig, LogFormat, LogLevel, LoggingConfig, SelectionConfig,
};
pub use sources::{CliOverrides, ConfigSource, Precedence};

/// Load configuration with default precedence and CLI overrides.
///
/// defaults < user file < workspace file (or `--config`) < environment < CLI.
pub fn load_config(cli: CliOverrides) -> Result<DevloopConfig, ConfigError> {
	let mut paths = paths::resolve_xdg_paths()?;

	let mut registry = ConfigRegistry::new();
	registry.register(Box::new(sources::DefaultsSource));
	registry.register(Box::new(sources::FileSource::user(&paths)));
	match cli.config_file.clone() {
		Some(path) => {
			registry.register(Box::new(
				sources::FileSource::custom(path.clone(), Precedence::WorkspaceFile, "cli-config")
					.required(),
			));
			paths.workspace_config_file = path;
		}
		None => registry.register(Box::new(sources::FileSource::workspace(&paths))),
	}
	registry.register(Box::new(sources::EnvSource::new()));
	registry.register(Box::new(sources::CliSource::new(cli)));

	registry.load(paths)
}
