// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration registry - manages sources and merges layers.

use tracing::{debug, info};

use crate::layer::ConfigLayer;
use crate::paths::PathsConfig;
use crate::runtime::DevloopConfig;
use crate::sources::ConfigSource;
use crate::validation::validate_config;
use crate::ConfigError;

/// Registry that manages configuration sources and merges them.
pub struct ConfigRegistry {
	sources: Vec<Box<dyn ConfigSource>>,
}

impl ConfigRegistry {
	pub fn new() -> Self {
		Self {
			sources: Vec::new(),
		}
	}

	pub fn register(&mut self, source: Box<dyn ConfigSource>) {
		debug!(source = source.name(), precedence = ?source.precedence(), "registering config source");
		self.sources.push(source);
	}

	/// Load configuration from all sources, merge, and validate.
	///
	/// Sources are sorted by precedence (lowest first) and merged so higher
	/// precedence sources override lower ones. A file that exists but does
	/// not parse is an error; a missing one is skipped by its source.
	pub fn load(&self, paths: PathsConfig) -> Result<DevloopConfig, ConfigError> {
		let mut sorted_sources: Vec<_> = self.sources.iter().collect();
		sorted_sources.sort_by_key(|s| s.precedence());

		info!(
			source_count = sorted_sources.len(),
			"loading configuration from sources"
		);

		let mut merged = ConfigLayer::default();
		for source in &sorted_sources {
			let layer = source.load()?;
			debug!(source = source.name(), "merging config layer");
			merged.merge(layer);
		}

		let config = DevloopConfig::from_layer(merged, paths)?;
		validate_config(&config)?;

		info!(
				sync_count = config.sync.len(),
				forward_count = config.forward.len(),
				log_level = ?config.logging.level,
				"configuration loaded successfully"
		);

		Ok(config)
	}

	pub fn source_count(&self) -> usize {
		self.sources.len()
	}
}

impl Default for ConfigRegistry {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::layer::SelectionLayer;
	use crate::sources::{DefaultsSource, FileSource, Precedence};

	fn paths() -> PathsConfig {
		PathsConfig {
			user_config_file: "/tmp/devloop-test/config.toml".into(),
			workspace_config_file: "/tmp/devloop-test/devloop.toml".into(),
			data_dir: "/tmp/devloop-test/data".into(),
			cache_dir: "/tmp/devloop-test/cache".into(),
		}
	}

	#[test]
	fn test_registry_registers_sources() {
		let mut registry = ConfigRegistry::new();
		assert_eq!(registry.source_count(), 0);

		registry.register(Box::new(DefaultsSource));
		assert_eq!(registry.source_count(), 1);
	}

	#[test]
	fn test_registry_loads_with_defaults() {
		let mut registry = ConfigRegistry::new();
		registry.register(Box::new(DefaultsSource));

		let config = registry.load(paths()).unwrap();
		assert!(config.sync.is_empty());
		assert_eq!(config.agent.binary_dir, paths().agent_dir());
	}

	#[test]
	fn test_precedence_merge_order() {
		struct MockSource {
			name: &'static str,
			precedence: Precedence,
			namespace: &'static str,
		}

		impl ConfigSource for MockSource {
			fn name(&self) -> &'static str {
				self.name
			}
			fn precedence(&self) -> Precedence {
				self.precedence
			}

			fn load(&self) -> Result<ConfigLayer, ConfigError> {
				Ok(ConfigLayer {
					selection: Some(SelectionLayer {
						namespace: Some(self.namespace.to_string()),
						..Default::default()
					}),
					..Default::default()
				})
			}
		}

		let mut registry = ConfigRegistry::new();

		// Registered out of order; the registry sorts.
		registry.register(Box::new(MockSource {
			name: "cli",
			precedence: Precedence::Cli,
			namespace: "from-cli",
		}));
		registry.register(Box::new(MockSource {
			name: "user",
			precedence: Precedence::UserFile,
			namespace: "from-user",
		}));

		let config = registry.load(paths()).unwrap();
		assert_eq!(config.selection.namespace.as_deref(), Some("from-cli"));
	}

	#[test]
	fn test_user_and_workspace_files() {
		let dir = tempfile::tempdir().unwrap();
		let user = dir.path().join("config.toml");
		let workspace = dir.path().join("devloop.toml");
		std::fs::write(
			&user,
			r#"
			[selection]
			namespace = "personal"
			timeout_secs = 30

			[[hooks]]
			events = ["error:sync"]
			command = "notify-send"
			"#,
		)
		.unwrap();
		std::fs::write(
			&workspace,
			r#"
			[selection]
			namespace = "team"

			[[sync]]
			name = "api"
			label_selector = "app=api"
			path = "./api:/app"
			"#,
		)
		.unwrap();

		let paths = PathsConfig {
			user_config_file: user,
			workspace_config_file: workspace,
			..paths()
		};
		let mut registry = ConfigRegistry::new();
		registry.register(Box::new(DefaultsSource));
		registry.register(Box::new(FileSource::workspace(&paths)));
		registry.register(Box::new(FileSource::user(&paths)));

		let config = registry.load(paths).unwrap();
		assert_eq!(config.selection.namespace.as_deref(), Some("team"));
		assert_eq!(config.selection.timeout.as_secs(), 30);
		assert_eq!(config.sync.len(), 1);
		assert_eq!(config.hooks.len(), 1);
	}

	#[test]
	fn test_invalid_file_fails_the_load() {
		let dir = tempfile::tempdir().unwrap();
		let workspace = dir.path().join("devloop.toml");
		std::fs::write(&workspace, "[[forward]]\nname = \"web\"\nlabel_selector = \"app=web\"\n").unwrap();

		let paths = PathsConfig {
			workspace_config_file: workspace,
			..paths()
		};
		let mut registry = ConfigRegistry::new();
		registry.register(Box::new(FileSource::workspace(&paths)));
		let err = registry.load(paths).unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "forward.web.ports"));
	}
}
