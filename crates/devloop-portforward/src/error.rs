// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::net::SocketAddr;

use devloop_common_k8s::K8sError;
use devloop_session::SessionError;
use thiserror::Error;

pub type ForwardResult<T> = Result<T, ForwardError>;

/// Errors that can occur while forwarding ports.
#[derive(Debug, Error)]
pub enum ForwardError {
	#[error("invalid port mapping {mapping:?}: {message}")]
	InvalidMapping { mapping: String, message: String },

	#[error("local port {port} is already used by {owner}")]
	PortInUse { port: u16, owner: String },

	#[error("couldn't listen on {addr}: {source}")]
	Bind {
		addr: SocketAddr,
		#[source]
		source: std::io::Error,
	},

	#[error(transparent)]
	K8s(#[from] K8sError),
}

impl ForwardError {
	pub(crate) fn invalid(mapping: &str, message: impl Into<String>) -> Self {
		ForwardError::InvalidMapping {
			mapping: mapping.to_string(),
			message: message.into(),
		}
	}
}

impl From<ForwardError> for SessionError {
	fn from(err: ForwardError) -> Self {
		match err {
			ForwardError::K8s(e) => SessionError::K8s(e),
			other => SessionError::connect("port forwarding", other),
		}
	}
}
