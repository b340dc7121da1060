// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration layer for merging from multiple sources.

use std::path::PathBuf;

use devloop_hooks::HookCommand;
use serde::Deserialize;

use crate::entries::{ForwardEntry, Named, SyncEntry};

/// Partial configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigLayer {
	#[serde(default)]
	pub logging: Option<LoggingLayer>,
	#[serde(default)]
	pub selection: Option<SelectionLayer>,
	#[serde(default)]
	pub controller: Option<ControllerLayer>,
	#[serde(default)]
	pub agent: Option<AgentLayer>,
	#[serde(default)]
	pub sync: Option<Vec<SyncEntry>>,
	#[serde(default)]
	pub forward: Option<Vec<ForwardEntry>>,
	#[serde(default)]
	pub hooks: Option<Vec<HookCommand>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingLayer {
	#[serde(default)]
	pub level: Option<String>,
	#[serde(default)]
	pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectionLayer {
	#[serde(default)]
	pub namespace: Option<String>,
	#[serde(default)]
	pub timeout_secs: Option<u64>,
	#[serde(default)]
	pub poll_interval_ms: Option<u64>,
	#[serde(default)]
	pub initial_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControllerLayer {
	#[serde(default)]
	pub barrier_timeout_secs: Option<u64>,
	#[serde(default)]
	pub backoff_secs: Option<u64>,
	#[serde(default)]
	pub max_backoff_secs: Option<u64>,
	#[serde(default)]
	pub factor: Option<f64>,
	#[serde(default)]
	pub jitter: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentLayer {
	#[serde(default)]
	pub path: Option<String>,
	#[serde(default)]
	pub binary_dir: Option<PathBuf>,
	#[serde(default)]
	pub inject: Option<bool>,
}

impl ConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: ConfigLayer) {
		merge_option(&mut self.logging, other.logging, LoggingLayer::merge);
		merge_option(&mut self.selection, other.selection, SelectionLayer::merge);
		merge_option(&mut self.controller, other.controller, ControllerLayer::merge);
		merge_option(&mut self.agent, other.agent, AgentLayer::merge);
		merge_option(&mut self.sync, other.sync, merge_entries);
		merge_option(&mut self.forward, other.forward, merge_entries);
		// Hooks from every file apply.
		merge_option(&mut self.hooks, other.hooks, |t, s| t.extend(s));
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}

fn merge_entries<T: Named>(target: &mut Vec<T>, source: Vec<T>) {
	for entry in source {
		let existing = if entry.name().is_empty() {
			None
		} else {
			target.iter_mut().find(|e| e.name() == entry.name())
		};
		match existing {
			Some(slot) => *slot = entry,
			None => target.push(entry),
		}
	}
}

impl LoggingLayer {
	fn merge(&mut self, other: LoggingLayer) {
		if other.level.is_some() {
			self.level = other.level;
		}
		if other.format.is_some() {
			self.format = other.format;
		}
	}
}

impl SelectionLayer {
	fn merge(&mut self, other: SelectionLayer) {
		if other.namespace.is_some() {
			self.namespace = other.namespace;
		}
		if other.timeout_secs.is_some() {
			self.timeout_secs = other.timeout_secs;
		}
		if other.poll_interval_ms.is_some() {
			self.poll_interval_ms = other.poll_interval_ms;
		}
		if other.initial_delay_secs.is_some() {
			self.initial_delay_secs = other.initial_delay_secs;
		}
	}
}

impl ControllerLayer {
	fn merge(&mut self, other: ControllerLayer) {
		if other.barrier_timeout_secs.is_some() {
			self.barrier_timeout_secs = other.barrier_timeout_secs;
		}
		if other.backoff_secs.is_some() {
			self.backoff_secs = other.backoff_secs;
		}
		if other.max_backoff_secs.is_some() {
			self.max_backoff_secs = other.max_backoff_secs;
		}
		if other.factor.is_some() {
			self.factor = other.factor;
		}
		if other.jitter.is_some() {
			self.jitter = other.jitter;
		}
	}
}

impl AgentLayer {
	fn merge(&mut self, other: AgentLayer) {
		if other.path.is_some() {
			self.path = other.path;
		}
		if other.binary_dir.is_some() {
			self.binary_dir = other.binary_dir;
		}
		if other.inject.is_some() {
			self.inject = other.inject;
		}
	}
}
