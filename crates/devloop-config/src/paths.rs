// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! XDG Base Directory compliant path resolution.

use std::path::PathBuf;

use crate::ConfigError;

/// Name of the per-project config file, looked up in the working directory.
pub const WORKSPACE_CONFIG_FILE: &str = "devloop.toml";

/// Resolved XDG paths for devloop.
#[derive(Debug, Clone)]
pub struct PathsConfig {
	/// User config file: ~/.config/devloop/config.toml
	pub user_config_file: PathBuf,
	/// Project config file: ./devloop.toml
	pub workspace_config_file: PathBuf,
	/// Data directory: ~/.local/share/devloop/
	pub data_dir: PathBuf,
	/// Cache directory: ~/.cache/devloop/
	pub cache_dir: PathBuf,
}

impl PathsConfig {
	pub fn config_dir(&self) -> PathBuf {
		self
			.user_config_file
			.parent()
			.map(|p| p.to_path_buf())
			.unwrap_or_else(|| self.user_config_file.clone())
	}

	/// Where prebuilt sync agent binaries are looked up by default.
	pub fn agent_dir(&self) -> PathBuf {
		self.data_dir.join("agent")
	}

	/// Directory the workspace config file lives in; relative sync paths
	/// resolve against it.
	pub fn workspace_dir(&self) -> PathBuf {
		self
			.workspace_config_file
			.parent()
			.filter(|p| !p.as_os_str().is_empty())
			.map(|p| p.to_path_buf())
			.unwrap_or_else(|| PathBuf::from("."))
	}
}

impl Default for PathsConfig {
	fn default() -> Self {
		Self {
			user_config_file: PathBuf::from("~/.config/devloop/config.toml"),
			workspace_config_file: PathBuf::from(WORKSPACE_CONFIG_FILE),
			data_dir: PathBuf::from("~/.local/share/devloop"),
			cache_dir: PathBuf::from("~/.cache/devloop"),
		}
	}
}

/// Resolve XDG paths according to the Base Directory Specification.
///
/// Uses environment variables if set, otherwise falls back to defaults:
/// - XDG_CONFIG_HOME or ~/.config
/// - XDG_DATA_HOME or ~/.local/share
/// - XDG_CACHE_HOME or ~/.cache
pub fn resolve_xdg_paths() -> Result<PathsConfig, ConfigError> {
	let home = dirs::home_dir().ok_or(ConfigError::HomeDirNotFound)?;

	let config_home = std::env::var_os("XDG_CONFIG_HOME")
		.map(PathBuf::from)
		.unwrap_or_else(|| home.join(".config"));

	let data_home = std::env::var_os("XDG_DATA_HOME")
		.map(PathBuf::from)
		.unwrap_or_else(|| home.join(".local/share"));

	let cache_home = std::env::var_os("XDG_CACHE_HOME")
		.map(PathBuf::from)
		.unwrap_or_else(|| home.join(".cache"));

	tracing::debug!(
			config_home = %config_home.display(),
			data_home = %data_home.display(),
			cache_home = %cache_home.display(),
			"resolved XDG paths"
	);

	Ok(PathsConfig {
		user_config_file: config_home.join("devloop/config.toml"),
		workspace_config_file: workspace_config_path()?,
		data_dir: data_home.join("devloop"),
		cache_dir: cache_home.join("devloop"),
	})
}

/// Get the workspace config file path from the current directory.
pub fn workspace_config_path() -> Result<PathBuf, ConfigError> {
	let cwd = std::env::current_dir()?;
	Ok(cwd.join(WORKSPACE_CONFIG_FILE))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_resolve_xdg_paths_succeeds() {
		let paths = resolve_xdg_paths().unwrap();
		assert!(paths.user_config_file.to_string_lossy().contains("devloop"));
		assert!(paths.data_dir.to_string_lossy().contains("devloop"));
		assert!(paths.cache_dir.to_string_lossy().contains("devloop"));
		assert!(paths.workspace_config_file.ends_with(WORKSPACE_CONFIG_FILE));
	}

	#[test]
	fn test_derived_dirs() {
		let paths = PathsConfig {
			user_config_file: "/home/dev/.config/devloop/config.toml".into(),
			workspace_config_file: "/src/app/devloop.toml".into(),
			data_dir: "/home/dev/.local/share/devloop".into(),
			cache_dir: "/home/dev/.cache/devloop".into(),
		};
		assert_eq!(paths.config_dir(), PathBuf::from("/home/dev/.config/devloop"));
		assert_eq!(paths.agent_dir(), PathBuf::from("/home/dev/.local/share/devloop/agent"));
		assert_eq!(paths.workspace_dir(), PathBuf::from("/src/app"));
	}
}
