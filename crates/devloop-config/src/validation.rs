// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration validation rules.

use std::collections::HashSet;
use std::time::Duration;

use tracing::warn;

use crate::entries::TargetSpec;
use crate::runtime::DevloopConfig;
use crate::ConfigError;

const COMPARE_MODES: [&str; 3] = ["mtime", "size", "checksum"];

/// Validate the configuration.
///
/// Returns Ok(()) if valid, or the first offending field.
pub fn validate_config(config: &DevloopConfig) -> Result<(), ConfigError> {
	validate_selection(config)?;
	validate_controller(config)?;
	validate_sync(config)?;
	validate_forward(config)?;
	validate_hooks(config)?;

	if config.sync.is_empty() && config.forward.is_empty() {
		warn!("no [[sync]] or [[forward]] entries configured");
	}
	Ok(())
}

fn validate_selection(config: &DevloopConfig) -> Result<(), ConfigError> {
	if config.selection.poll_interval == Duration::ZERO {
		return Err(ConfigError::invalid_value(
			"selection.poll_interval_ms",
			"must be greater than 0",
		));
	}
	Ok(())
}

fn validate_controller(config: &DevloopConfig) -> Result<(), ConfigError> {
	let controller = &config.controller;
	if !controller.factor.is_finite() || controller.factor < 1.0 {
		return Err(ConfigError::invalid_value(
			"controller.factor",
			"must be a finite number >= 1.0",
		));
	}
	if controller.max_backoff < controller.backoff {
		return Err(ConfigError::invalid_value(
			"controller.max_backoff_secs",
			"must not be smaller than backoff_secs",
		));
	}
	Ok(())
}

fn validate_target(field: &str, target: &TargetSpec) -> Result<(), ConfigError> {
	if !target.has_criteria() {
		return Err(ConfigError::invalid_value(
			field,
			"needs label_selector, image_selector or pod",
		));
	}
	Ok(())
}

fn unique(kind: &'static str, names: impl Iterator<Item = String>) -> Result<(), ConfigError> {
	let mut seen = HashSet::new();
	for name in names {
		if !seen.insert(name.clone()) {
			return Err(ConfigError::DuplicateEntry { kind, name });
		}
	}
	Ok(())
}

fn validate_sync(config: &DevloopConfig) -> Result<(), ConfigError> {
	unique("sync", config.sync.iter().map(|e| e.name.clone()))?;
	for entry in &config.sync {
		let field = format!("sync.{}", entry.name);
		validate_target(&field, &entry.target)?;

		let mode = entry.compare_by.trim().to_ascii_lowercase();
		if !mode.is_empty() && !COMPARE_MODES.contains(&mode.as_str()) {
			return Err(ConfigError::invalid_value(
				format!("{field}.compare_by"),
				format!("expected one of {}", COMPARE_MODES.join(", ")),
			));
		}
		if entry.disable_upload && entry.disable_download {
			return Err(ConfigError::invalid_value(
				field,
				"disable_upload and disable_download leave nothing to sync",
			));
		}
		if entry.upload_limit == Some(0) || entry.download_limit == Some(0) {
			warn!(sync = %entry.name, "a bandwidth limit of 0 means unlimited");
		}
		if entry.file && !entry.exclude_paths.is_empty() {
			warn!(sync = %entry.name, "exclude_paths are ignored when syncing a single file");
		}
	}
	Ok(())
}

fn validate_forward(config: &DevloopConfig) -> Result<(), ConfigError> {
	unique("forward", config.forward.iter().map(|e| e.name.clone()))?;
	for entry in &config.forward {
		let field = format!("forward.{}", entry.name);
		validate_target(&field, &entry.target)?;
		if entry.ports.is_empty() {
			return Err(ConfigError::invalid_value(
				format!("{field}.ports"),
				"at least one port mapping is required",
			));
		}
	}
	Ok(())
}

fn validate_hooks(config: &DevloopConfig) -> Result<(), ConfigError> {
	for (i, hook) in config.hooks.iter().enumerate() {
		if hook.command.trim().is_empty() {
			return Err(ConfigError::invalid_value(
				format!("hooks[{i}].command"),
				"command cannot be empty",
			));
		}
		if hook.events.is_empty() {
			return Err(ConfigError::invalid_value(
				format!("hooks[{i}].events"),
				"at least one event is required",
			));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entries::{ForwardEntry, SyncEntry};
	use crate::layer::ConfigLayer;
	use crate::paths::PathsConfig;
	use devloop_hooks::HookCommand;

	fn config() -> DevloopConfig {
		DevloopConfig::from_layer(ConfigLayer::default(), PathsConfig::default()).unwrap()
	}

	fn labelled() -> TargetSpec {
		TargetSpec {
			label_selector: Some("app=api".into()),
			..Default::default()
		}
	}

	#[test]
	fn test_default_config_is_valid() {
		validate_config(&config()).unwrap();
	}

	#[test]
	fn test_sync_needs_a_selector() {
		let mut config = config();
		config.sync.push(SyncEntry {
			name: "api".into(),
			..Default::default()
		});
		let err = validate_config(&config).unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "sync.api"));

		config.sync[0].target = labelled();
		validate_config(&config).unwrap();
	}

	#[test]
	fn test_duplicate_names() {
		let mut config = config();
		for _ in 0..2 {
			config.forward.push(ForwardEntry {
				name: "db".into(),
				target: labelled(),
				ports: vec!["5432".into()],
			});
		}
		let err = validate_config(&config).unwrap_err();
		assert!(matches!(err, ConfigError::DuplicateEntry { kind: "forward", ref name } if name == "db"));
	}

	#[test]
	fn test_compare_mode() {
		let mut config = config();
		config.sync.push(SyncEntry {
			name: "api".into(),
			target: labelled(),
			compare_by: "hash".into(),
			..Default::default()
		});
		assert!(validate_config(&config).is_err());
		config.sync[0].compare_by = "Checksum".into();
		validate_config(&config).unwrap();
	}

	#[test]
	fn test_forward_needs_ports() {
		let mut config = config();
		config.forward.push(ForwardEntry {
			name: "web".into(),
			target: labelled(),
			ports: vec![],
		});
		assert!(validate_config(&config).is_err());
	}

	#[test]
	fn test_controller_bounds() {
		let mut config = config();
		config.controller.factor = 0.5;
		assert!(validate_config(&config).is_err());

		let mut config = self::config();
		config.controller.max_backoff = Duration::from_secs(1);
		assert!(validate_config(&config).is_err());
	}

	#[test]
	fn test_hook_needs_events() {
		let mut config = config();
		config.hooks.push(HookCommand {
			events: vec![],
			command: "make".into(),
			args: vec![],
		});
		assert!(validate_config(&config).is_err());
	}
}
