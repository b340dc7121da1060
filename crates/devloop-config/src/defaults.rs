// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Starter project configuration written by `devloop init`.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::ConfigError;

pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"#
# devloop project configuration
#
# Values here override ~/.config/devloop/config.toml; DEVLOOP_* environment
# variables and command line flags override both.
#

[selection]
# Namespace to search; defaults to the one of the current kube context.
# namespace = "dev"

# Give up when no target becomes ready in time (seconds).
timeout_secs = 600

# Poll interval while waiting for a target (milliseconds).
poll_interval_ms = 1000

# Never select a target sooner than this after (re)starting (seconds).
initial_delay_secs = 2

[controller]
# Upper bound for the initial sync (seconds).
barrier_timeout_secs = 600

# Delay between restart attempts (seconds). A factor above 1.0 grows the
# delay up to max_backoff_secs.
backoff_secs = 15
factor = 1.0
jitter = false

[agent]
# Path of the sync agent inside the container.
path = "/tmp/devloop-agent"

# Copy the agent into containers that do not have it yet.
inject = true

[logging]
# error, warn, info, debug, trace
level = "info"

# pretty, json, compact
format = "pretty"

[[sync]]
name = "app"
label_selector = "app=my-app"
path = ".:/app"
exclude_paths = [".git/", "node_modules/"]
# compare_by = "mtime"      # mtime, size or checksum
# upload_limit = 1024       # KiB/s
# restart_container = false
# batch_cmd = "npm"
# batch_args = ["run", "build"]

[[forward]]
name = "app"
label_selector = "app=my-app"
ports = ["8080:80"]

# [[hooks]]
# events = ["after:initialSync:app"]
# command = "notify-send"
# args = ["devloop", "initial sync done"]
"#;

/// Write the starter config to `path` unless a file is already there.
///
/// Returns `true` if a new config file was created.
pub fn ensure_default_config(path: &Path) -> Result<bool, ConfigError> {
	if path.exists() {
		debug!(path = %path.display(), "config file already exists");
		return Ok(false);
	}

	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() && !parent.exists() {
			debug!(path = %parent.display(), "creating config directory");
			fs::create_dir_all(parent)?;
		}
	}

	info!(path = %path.display(), "creating default config file");
	fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;

	Ok(true)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::layer::ConfigLayer;
	use crate::paths::PathsConfig;
	use crate::runtime::DevloopConfig;
	use crate::validation::validate_config;
	use tempfile::tempdir;

	#[test]
	fn test_default_config_template_is_valid() {
		let layer: ConfigLayer = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
		let config = DevloopConfig::from_layer(layer, PathsConfig::default()).unwrap();
		validate_config(&config).unwrap();
		assert_eq!(config.sync[0].name, "app");
		assert_eq!(config.forward[0].ports, vec!["8080:80"]);
	}

	#[test]
	fn test_ensure_default_config_creates_file() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("nested/devloop.toml");

		assert!(ensure_default_config(&path).unwrap());
		let contents = fs::read_to_string(&path).unwrap();
		assert!(contents.contains("[[sync]]"));
	}

	#[test]
	fn test_ensure_default_config_does_not_overwrite() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("devloop.toml");
		fs::write(&path, "# existing config\n").unwrap();

		assert!(!ensure_default_config(&path).unwrap());
		assert_eq!(fs::read_to_string(&path).unwrap(), "# existing config\n");
	}
}
