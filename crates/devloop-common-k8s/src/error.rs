// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Result type alias for K8s operations.
pub type K8sResult<T> = Result<T, K8sError>;

/// Errors that can occur during K8s operations.
#[derive(Error, Debug)]
pub enum K8sError {
	#[error("K8s API error: {message}")]
	ApiError { message: String },

	#[error("Pod not found: {namespace}/{name}")]
	PodNotFound { name: String, namespace: String },

	#[error("Exec error: {message}")]
	ExecError { message: String },

	#[error("Port-forward error: {message}")]
	PortForwardError { message: String },

	#[error("Client configuration error: {message}")]
	ConfigError { message: String },
}

impl K8sError {
	/// Whether this error means the object simply does not exist.
	pub fn is_not_found(&self) -> bool {
		matches!(self, K8sError::PodNotFound { .. })
	}
}

impl From<kube::Error> for K8sError {
	fn from(err: kube::Error) -> Self {
		K8sError::ApiError {
			message: err.to_string(),
		}
	}
}
