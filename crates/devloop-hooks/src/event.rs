// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed lifecycle events.
//!
//! Every event is published under up to three names:
//!
//! | Form | Example |
//! |------|---------|
//! | `<phase>:<feature>` | `start:sync` |
//! | `<phase>:<feature>:<name>` | `start:sync:api` |
//! | `<feature>.<phase>` | `sync.start` |
//!
//! Initial sync events use the sync feature in the dotted form, as
//! `sync.<phase>InitialSync` (`sync.beforeInitialSync`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// When in a session's life the event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
	Start,
	Stop,
	Restart,
	Error,
	Before,
	After,
}

impl Phase {
	pub fn as_str(&self) -> &'static str {
		match self {
			Phase::Start => "start",
			Phase::Stop => "stop",
			Phase::Restart => "restart",
			Phase::Error => "error",
			Phase::Before => "before",
			Phase::After => "after",
		}
	}
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The subsystem an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
	Sync,
	InitialSync,
	PortForwarding,
}

impl Feature {
	pub fn as_str(&self) -> &'static str {
		match self {
			Feature::Sync => "sync",
			Feature::InitialSync => "initialSync",
			Feature::PortForwarding => "portForwarding",
		}
	}
}

impl fmt::Display for Feature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Data handed to hooks alongside the event name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookPayload {
	/// The active configuration of the session that fired the event.
	#[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
	pub config: serde_json::Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// A single lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
	pub phase: Phase,
	pub feature: Feature,
	/// Name of the session, if it has one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	pub payload: HookPayload,
}

impl LifecycleEvent {
	pub fn new(phase: Phase, feature: Feature) -> Self {
		Self {
			phase,
			feature,
			name: None,
			payload: HookPayload::default(),
		}
	}

	pub fn named(mut self, name: impl Into<String>) -> Self {
		let name = name.into();
		self.name = (!name.is_empty()).then_some(name);
		self
	}

	pub fn with_config(mut self, config: serde_json::Value) -> Self {
		self.payload.config = config;
		self
	}

	pub fn with_error(mut self, error: impl fmt::Display) -> Self {
		self.payload.error = Some(error.to_string());
		self
	}

	/// `<phase>:<feature>`.
	pub fn name(&self) -> String {
		format!("{}:{}", self.phase, self.feature)
	}

	/// All names the event is published under, most generic first.
	pub fn names(&self) -> Vec<String> {
		let base = self.name();
		let mut names = vec![base.clone()];
		if let Some(name) = &self.name {
			names.push(format!("{base}:{name}"));
		}
		names.push(self.dotted_name());
		names
	}

	fn dotted_name(&self) -> String {
		match self.feature {
			Feature::InitialSync => format!("{}.{}InitialSync", Feature::Sync, self.phase),
			feature => format!("{feature}.{}", self.phase),
		}
	}

	pub fn matches(&self, name: &str) -> bool {
		self.names().iter().any(|n| n == name.trim())
	}
}

impl fmt::Display for LifecycleEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.name {
			Some(name) => write!(f, "{}:{}", self.name(), name),
			None => f.write_str(&self.name()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_names_without_session_name() {
		let event = LifecycleEvent::new(Phase::Before, Feature::InitialSync);
		assert_eq!(event.names(), vec!["before:initialSync", "sync.beforeInitialSync"]);
		assert_eq!(event.to_string(), "before:initialSync");

		let event = LifecycleEvent::new(Phase::Error, Feature::InitialSync).named("api");
		assert!(event.matches("error:initialSync:api"));
		assert!(event.matches("sync.errorInitialSync"));
		assert!(!event.matches("sync.error"));
	}

	#[test]
	fn test_names_with_session_name() {
		let event = LifecycleEvent::new(Phase::Start, Feature::Sync).named("api");
		assert_eq!(event.names(), vec!["start:sync", "start:sync:api", "sync.start"]);
		assert!(event.matches("start:sync:api"));
		assert!(event.matches(" sync.start "));
		assert!(!event.matches("start:portForwarding"));
	}

	#[test]
	fn test_empty_name_ignored() {
		let event = LifecycleEvent::new(Phase::Stop, Feature::PortForwarding).named("");
		assert_eq!(event.name, None);
		assert_eq!(event.names().len(), 2);
	}

	#[test]
	fn test_payload_serialization() {
		let event = LifecycleEvent::new(Phase::Error, Feature::Sync)
			.with_config(serde_json::json!({"path": "./src:/app"}))
			.with_error("connection lost");
		let value = serde_json::to_value(&event.payload).unwrap();
		assert_eq!(
			value,
			serde_json::json!({"config": {"path": "./src:/app"}, "error": "connection lost"})
		);

		let empty = serde_json::to_string(&HookPayload::default()).unwrap();
		assert_eq!(empty, "{}");
	}
}
