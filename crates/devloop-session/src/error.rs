// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use devloop_common_k8s::K8sError;
use devloop_hooks::HookError;
use devloop_selector::SelectorError;
use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur while establishing or running a session.
#[derive(Debug, Error)]
pub enum SessionError {
	#[error(transparent)]
	Selection(#[from] SelectorError),

	#[error("hook error: {0}")]
	Hook(#[from] HookError),

	#[error(transparent)]
	K8s(#[from] K8sError),

	#[error("connection lost to pod {pod}: {message}")]
	ConnectionLost { pod: String, message: String },

	#[error("initial sync: {message}")]
	InitialSync { message: String },

	#[error("{context}: {message}")]
	Connect { context: String, message: String },

	#[error("session expected a {expected} target")]
	WrongTarget { expected: &'static str },

	#[error("session cancelled")]
	Cancelled,
}

impl SessionError {
	pub fn connect(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
		SessionError::Connect {
			context: context.into(),
			message: message.to_string(),
		}
	}

	pub fn connection_lost(pod: impl Into<String>, message: impl std::fmt::Display) -> Self {
		SessionError::ConnectionLost {
			pod: pod.into(),
			message: message.to_string(),
		}
	}

	pub fn is_cancelled(&self) -> bool {
		matches!(
			self,
			SessionError::Cancelled | SessionError::Selection(SelectorError::Cancelled)
		)
	}
}
