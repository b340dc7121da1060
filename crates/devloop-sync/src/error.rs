// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use devloop_common_k8s::K8sError;
use devloop_session::SessionError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing files.
#[derive(Debug, Error)]
pub enum SyncError {
	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("stream error: {0}")]
	Stream(#[from] std::io::Error),

	#[error("invalid exclude pattern {pattern}: {message}")]
	Exclude { pattern: String, message: String },

	#[error("protocol error: {message}")]
	Protocol { message: String },

	#[error("unexpected end of stream")]
	Eof,

	#[error("agent exited: {status}{}", stderr_suffix(.stderr))]
	AgentExited { status: String, stderr: String },

	#[error("helper injection failed: {message}")]
	Inject { message: String },

	#[error("invalid sync config: {message}")]
	Config { message: String },

	#[error(transparent)]
	K8s(#[from] K8sError),
}

fn stderr_suffix(stderr: &str) -> String {
	if stderr.trim().is_empty() {
		String::new()
	} else {
		format!(" ({})", stderr.trim())
	}
}

impl SyncError {
	pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		SyncError::Io {
			path: path.into(),
			source,
		}
	}

	pub fn protocol(message: impl Into<String>) -> Self {
		SyncError::Protocol {
			message: message.into(),
		}
	}
}

impl From<SyncError> for SessionError {
	fn from(err: SyncError) -> Self {
		match err {
			SyncError::K8s(e) => SessionError::K8s(e),
			other => SessionError::connect("sync", other),
		}
	}
}
