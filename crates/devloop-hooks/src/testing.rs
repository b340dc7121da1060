// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dispatchers for tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::dispatcher::{HookDispatcher, SharedHookDispatcher};
use crate::error::{HookError, HookResult};
use crate::event::LifecycleEvent;

/// Records every event it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
	events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingDispatcher {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn shared(&self) -> SharedHookDispatcher {
		Arc::new(self.clone())
	}

	pub fn events(&self) -> Vec<LifecycleEvent> {
		self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}

	/// `<phase>:<feature>` of each event, in order.
	pub fn names(&self) -> Vec<String> {
		self.events().iter().map(LifecycleEvent::name).collect()
	}

	pub fn count(&self, name: &str) -> usize {
		self.events().iter().filter(|e| e.name() == name).count()
	}
}

#[async_trait]
impl HookDispatcher for RecordingDispatcher {
	async fn dispatch(&self, event: &LifecycleEvent) -> HookResult<()> {
		self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
		Ok(())
	}
}

/// Fails for every event matching the given name.
#[derive(Debug, Clone)]
pub struct FailingDispatcher {
	name: String,
}

impl FailingDispatcher {
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into() }
	}
}

#[async_trait]
impl HookDispatcher for FailingDispatcher {
	async fn dispatch(&self, event: &LifecycleEvent) -> HookResult<()> {
		if event.matches(&self.name) {
			return Err(HookError::Failed {
				event: event.to_string(),
				message: "rejected by test hook".into(),
			});
		}
		Ok(())
	}
}
