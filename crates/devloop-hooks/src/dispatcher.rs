// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, instrument};

use crate::error::{HookError, HookResult};
use crate::event::LifecycleEvent;

pub const HOOK_EVENT_ENV: &str = "DEVLOOP_HOOK_EVENT";
pub const HOOK_PAYLOAD_ENV: &str = "DEVLOOP_HOOK_PAYLOAD";
pub const HOOK_ERROR_ENV: &str = "DEVLOOP_HOOK_ERROR";

/// Receives lifecycle events.
///
/// Returning an error from a start-up event aborts the operation that fired
/// it. Errors on restart and stop paths are only logged.
#[async_trait]
pub trait HookDispatcher: Send + Sync + 'static {
	async fn dispatch(&self, event: &LifecycleEvent) -> HookResult<()>;
}

pub type SharedHookDispatcher = Arc<dyn HookDispatcher>;

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpDispatcher;

#[async_trait]
impl HookDispatcher for NoOpDispatcher {
	async fn dispatch(&self, _event: &LifecycleEvent) -> HookResult<()> {
		Ok(())
	}
}

/// Logs every event at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDispatcher;

#[async_trait]
impl HookDispatcher for TracingDispatcher {
	async fn dispatch(&self, event: &LifecycleEvent) -> HookResult<()> {
		debug!(
			event = %event,
			error = event.payload.error.as_deref().unwrap_or_default(),
			"lifecycle event"
		);
		Ok(())
	}
}

/// A local command run for the listed event names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookCommand {
	pub events: Vec<String>,
	pub command: String,
	#[serde(default)]
	pub args: Vec<String>,
}

/// Runs configured local commands when their events fire.
///
/// The command sees the event name, the JSON payload and the error (if any)
/// through `DEVLOOP_HOOK_*` environment variables. A non-zero exit fails the
/// dispatch.
#[derive(Debug, Clone, Default)]
pub struct CommandHook {
	commands: Vec<HookCommand>,
}

impl CommandHook {
	pub fn new(commands: Vec<HookCommand>) -> Self {
		Self { commands }
	}

	pub fn is_empty(&self) -> bool {
		self.commands.is_empty()
	}

	fn matching<'a>(&'a self, event: &'a LifecycleEvent) -> impl Iterator<Item = &'a HookCommand> {
		self
			.commands
			.iter()
			.filter(move |c| c.events.iter().any(|name| event.matches(name)))
	}
}

#[async_trait]
impl HookDispatcher for CommandHook {
	#[instrument(skip_all, fields(event = %event))]
	async fn dispatch(&self, event: &LifecycleEvent) -> HookResult<()> {
		let mut matching = self.matching(event).peekable();
		if matching.peek().is_none() {
			return Ok(());
		}
		let payload = serde_json::to_string(&event.payload)?;

		for hook in matching {
			info!(command = %hook.command, "executing hook");
			let status = Command::new(&hook.command)
				.args(&hook.args)
				.env(HOOK_EVENT_ENV, event.to_string())
				.env(HOOK_PAYLOAD_ENV, &payload)
				.env(HOOK_ERROR_ENV, event.payload.error.as_deref().unwrap_or_default())
				.kill_on_drop(true)
				.status()
				.await
				.map_err(|source| HookError::Spawn {
					command: hook.command.clone(),
					source,
				})?;
			if !status.success() {
				return Err(HookError::CommandExit {
					event: event.to_string(),
					command: hook.command.clone(),
					code: status.code().unwrap_or(-1),
				});
			}
		}
		Ok(())
	}
}
