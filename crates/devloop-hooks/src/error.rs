// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

pub type HookResult<T> = Result<T, HookError>;

/// Errors raised while dispatching a lifecycle event.
#[derive(Debug, Error)]
pub enum HookError {
	#[error("hook for {event} failed: {message}")]
	Failed { event: String, message: String },

	#[error("hook command {command} for {event} exited with {code}")]
	CommandExit {
		event: String,
		command: String,
		code: i32,
	},

	#[error("failed to run hook command {command}: {source}")]
	Spawn {
		command: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to encode hook payload: {0}")]
	Payload(#[from] serde_json::Error),
}
