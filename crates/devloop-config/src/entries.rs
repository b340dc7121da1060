// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `[[sync]]` and `[[forward]]` entries.
//!
//! Entries are complete as parsed: missing keys take their defaults, so the
//! same types serve the merged layer and the runtime config.

use serde::{Deserialize, Serialize};

/// Which pod or container an entry attaches to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSpec {
	pub label_selector: Option<String>,
	pub image_selector: Vec<String>,
	pub pod: Option<String>,
	pub container: Option<String>,
	/// Overrides `selection.namespace` for this entry.
	pub namespace: Option<String>,
	/// Ask interactively when more than one target matches.
	pub pick: bool,
}

impl TargetSpec {
	pub fn has_criteria(&self) -> bool {
		self.label_selector.as_deref().is_some_and(|s| !s.trim().is_empty())
			|| !self.image_selector.is_empty()
			|| self.pod.as_deref().is_some_and(|s| !s.trim().is_empty())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncEntry {
	pub name: String,
	#[serde(flatten)]
	pub target: TargetSpec,
	/// `local:container`.
	pub path: String,
	pub exclude_paths: Vec<String>,
	pub upload_exclude_paths: Vec<String>,
	pub download_exclude_paths: Vec<String>,
	pub exclude_file: Option<String>,
	pub upload_exclude_file: Option<String>,
	pub download_exclude_file: Option<String>,
	/// `mtime`, `size` or `checksum`.
	pub compare_by: String,
	/// KiB per second.
	pub upload_limit: Option<u64>,
	pub download_limit: Option<u64>,
	/// Runs for uploaded files and created directories alike.
	pub change_cmd: Option<String>,
	pub change_args: Vec<String>,
	pub file_change_cmd: Option<String>,
	pub file_change_args: Vec<String>,
	pub dir_create_cmd: Option<String>,
	pub dir_create_args: Vec<String>,
	pub restart_container: bool,
	pub batch_cmd: Option<String>,
	pub batch_args: Vec<String>,
	pub wait_initial_sync: bool,
	pub disable_upload: bool,
	pub disable_download: bool,
	pub polling: bool,
	pub throttle: Option<u64>,
	pub file: bool,
}

impl Default for SyncEntry {
	fn default() -> Self {
		Self {
			name: String::new(),
			target: TargetSpec::default(),
			path: String::new(),
			exclude_paths: Vec::new(),
			upload_exclude_paths: Vec::new(),
			download_exclude_paths: Vec::new(),
			exclude_file: None,
			upload_exclude_file: None,
			download_exclude_file: None,
			compare_by: "mtime".to_string(),
			upload_limit: None,
			download_limit: None,
			change_cmd: None,
			change_args: Vec::new(),
			file_change_cmd: None,
			file_change_args: Vec::new(),
			dir_create_cmd: None,
			dir_create_args: Vec::new(),
			restart_container: false,
			batch_cmd: None,
			batch_args: Vec::new(),
			wait_initial_sync: true,
			disable_upload: false,
			disable_download: false,
			polling: false,
			throttle: None,
			file: false,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardEntry {
	pub name: String,
	#[serde(flatten)]
	pub target: TargetSpec,
	/// `[<bind>:]<local>:<remote>` or `<port>`.
	pub ports: Vec<String>,
}

/// Entries merge by name; unnamed entries are always appended.
pub(crate) trait Named {
	fn name(&self) -> &str;
}

impl Named for SyncEntry {
	fn name(&self) -> &str {
		&self.name
	}
}

impl Named for ForwardEntry {
	fn name(&self) -> &str {
		&self.name
	}
}
