// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::error::K8sError;
use crate::types::{BoxedPortStream, Event, ExecParams, ExecProcess, Pod};

/// Trait for K8s client operations.
///
/// This abstraction allows for easy mocking in tests while providing
/// a clean interface for the cluster operations needed by target
/// selection and session transports.
#[async_trait]
pub trait K8sClient: Send + Sync {
	/// Namespace used when a selector does not name one.
	fn default_namespace(&self) -> &str;

	/// List pods in a namespace, optionally restricted by a label selector.
	async fn list_pods(
		&self,
		namespace: &str,
		label_selector: Option<&str>,
	) -> Result<Vec<Pod>, K8sError>;

	/// Get a specific pod by name from the specified namespace.
	async fn get_pod(&self, name: &str, namespace: &str) -> Result<Pod, K8sError>;

	/// List events in a namespace.
	async fn list_events(&self, namespace: &str) -> Result<Vec<Event>, K8sError>;

	/// Run a command inside a container with separate stdio streams.
	async fn exec(
		&self,
		name: &str,
		namespace: &str,
		container: &str,
		params: ExecParams,
	) -> Result<ExecProcess, K8sError>;

	/// Open a byte stream to a port of a pod.
	async fn port_forward(
		&self,
		name: &str,
		namespace: &str,
		port: u16,
	) -> Result<BoxedPortStream, K8sError>;
}
