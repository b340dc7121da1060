// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use tracing::warn;

use crate::dispatcher::{HookDispatcher, SharedHookDispatcher};
use crate::error::HookResult;
use crate::event::LifecycleEvent;

/// Fans a lifecycle event out to every registered dispatcher, in order.
#[derive(Clone, Default)]
pub struct EventBus {
	dispatchers: Vec<SharedHookDispatcher>,
}

impl EventBus {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_dispatcher(mut self, dispatcher: impl HookDispatcher) -> Self {
		self.dispatchers.push(Arc::new(dispatcher));
		self
	}

	pub fn with_shared(mut self, dispatcher: SharedHookDispatcher) -> Self {
		self.dispatchers.push(dispatcher);
		self
	}

	pub fn len(&self) -> usize {
		self.dispatchers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.dispatchers.is_empty()
	}

	/// Dispatch the event, stopping at the first failing dispatcher.
	pub async fn fire(&self, event: &LifecycleEvent) -> HookResult<()> {
		for dispatcher in &self.dispatchers {
			dispatcher.dispatch(event).await?;
		}
		Ok(())
	}

	/// Dispatch the event to every dispatcher and log failures.
	pub async fn fire_logged(&self, event: &LifecycleEvent) {
		for dispatcher in &self.dispatchers {
			if let Err(e) = dispatcher.dispatch(event).await {
				warn!(event = %event, error = %e, "hook failed");
			}
		}
	}
}

impl std::fmt::Debug for EventBus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventBus")
			.field("dispatchers", &self.dispatchers.len())
			.finish()
	}
}
