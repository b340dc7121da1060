// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use devloop_common_k8s::K8sError;
use thiserror::Error;

pub type SelectorResult<T> = Result<T, SelectorError>;

/// Errors that can occur while acquiring a target.
#[derive(Debug, Error)]
pub enum SelectorError {
	#[error("timeout: couldn't find a pod / container in time with {selector}")]
	Timeout { selector: String },

	#[error("couldn't find a pod / container with {selector}")]
	NotFound { selector: String },

	#[error("pod {pod} has critical status: {status}")]
	Fatal { pod: String, status: String },

	#[error("found multiple {kind} for {selector}")]
	Ambiguous { kind: &'static str, selector: String },

	#[error("selection cancelled")]
	Cancelled,

	#[error("interactive selection failed: {message}")]
	Pick { message: String },

	#[error(transparent)]
	K8s(#[from] K8sError),
}

impl SelectorError {
	/// Errors that restarting the same selection will not fix.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			SelectorError::Fatal { .. } | SelectorError::Ambiguous { .. } | SelectorError::Pick { .. }
		)
	}
}
