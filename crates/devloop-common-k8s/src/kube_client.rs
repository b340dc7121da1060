// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use futures::FutureExt;
use k8s_openapi::api::core::v1::{Event, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::{
	api::{Api, AttachParams, ListParams},
	Client, Config,
};
use tracing::{debug, instrument, warn};

use crate::client::K8sClient;
use crate::error::K8sError;
use crate::types::{BoxedPortStream, ExecParams, ExecProcess, ExecStatus};

/// Production K8s client implementation using the kube crate.
pub struct KubeClient {
	client: Client,
	namespace: String,
}

impl KubeClient {
	/// Create a new KubeClient that auto-discovers cluster configuration.
	///
	/// This will attempt to load config from:
	/// 1. KUBECONFIG environment variable / ~/.kube/config
	/// 2. In-cluster service account (when running in K8s)
	///
	/// `namespace` overrides the namespace from the active context.
	pub async fn new(namespace: Option<String>) -> Result<Self, K8sError> {
		let mut config = Config::infer().await.map_err(|e| K8sError::ConfigError {
			message: e.to_string(),
		})?;
		if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
			config.default_namespace = ns;
		}
		let namespace = config.default_namespace.clone();
		let client = Client::try_from(config)?;
		debug!(namespace = %namespace, "K8s client initialized");
		Ok(Self { client, namespace })
	}

	fn pods(&self, namespace: &str) -> Api<Pod> {
		Api::namespaced(self.client.clone(), namespace)
	}
}

fn map_not_found(err: kube::Error, name: &str, namespace: &str) -> K8sError {
	match err {
		kube::Error::Api(ref resp) if resp.code == 404 => K8sError::PodNotFound {
			name: name.into(),
			namespace: namespace.into(),
		},
		other => other.into(),
	}
}

/// Translate the exec status object sent over the websocket.
fn exec_status_from(status: Option<Status>) -> ExecStatus {
	let Some(status) = status else {
		return ExecStatus::failure(None, "connection closed without exit status");
	};
	if status.status.as_deref() == Some("Success") {
		return ExecStatus::success();
	}

	let exit_code = status
		.details
		.as_ref()
		.and_then(|d| d.causes.as_ref())
		.and_then(|causes| {
			causes
				.iter()
				.find(|c| c.reason.as_deref() == Some("ExitCode"))
				.and_then(|c| c.message.as_deref())
				.and_then(|m| m.parse::<i32>().ok())
		});
	ExecStatus::failure(
		exit_code,
		status.message.unwrap_or_else(|| "command failed".to_string()),
	)
}

#[async_trait]
impl K8sClient for KubeClient {
	fn default_namespace(&self) -> &str {
		&self.namespace
	}

	async fn list_pods(
		&self,
		namespace: &str,
		label_selector: Option<&str>,
	) -> Result<Vec<Pod>, K8sError> {
		let mut lp = ListParams::default();
		if let Some(selector) = label_selector {
			lp = lp.labels(selector);
		}
		let pod_list = self.pods(namespace).list(&lp).await?;
		Ok(pod_list.items)
	}

	async fn get_pod(&self, name: &str, namespace: &str) -> Result<Pod, K8sError> {
		self
			.pods(namespace)
			.get(name)
			.await
			.map_err(|e| map_not_found(e, name, namespace))
	}

	async fn list_events(&self, namespace: &str) -> Result<Vec<Event>, K8sError> {
		let events: Api<Event> = Api::namespaced(self.client.clone(), namespace);
		let list = events.list(&ListParams::default()).await?;
		Ok(list.items)
	}

	#[instrument(skip(self, params), fields(command = ?params.command))]
	async fn exec(
		&self,
		name: &str,
		namespace: &str,
		container: &str,
		params: ExecParams,
	) -> Result<ExecProcess, K8sError> {
		let ap = AttachParams::default()
			.container(container)
			.stdin(params.stdin)
			.stdout(true)
			.stderr(!params.tty)
			.tty(params.tty);

		let mut attached = self
			.pods(namespace)
			.exec(name, params.command.clone(), &ap)
			.await
			.map_err(|e| match e {
				kube::Error::Api(ref err) if err.code == 404 => K8sError::PodNotFound {
					name: name.into(),
					namespace: namespace.into(),
				},
				_ => K8sError::ExecError {
					message: e.to_string(),
				},
			})?;

		let stdin = attached
			.stdin()
			.map(|s| Box::pin(s) as std::pin::Pin<Box<dyn tokio::io::AsyncWrite + Send>>);
		let stdout = attached.stdout().ok_or_else(|| K8sError::ExecError {
			message: "stdout not available".into(),
		})?;
		let stderr: std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>> = match attached.stderr() {
			Some(s) => Box::pin(s),
			None => Box::pin(tokio::io::empty()),
		};
		let status = attached.take_status().ok_or_else(|| K8sError::ExecError {
			message: "status channel not available".into(),
		})?;

		let completion = async move {
			let status = status.await;
			if let Err(e) = attached.join().await {
				warn!(error = %e, "exec session ended with error");
			}
			Ok(exec_status_from(status))
		}
		.boxed();

		Ok(ExecProcess {
			stdin,
			stdout: Box::pin(stdout),
			stderr,
			completion,
		})
	}

	async fn port_forward(
		&self,
		name: &str,
		namespace: &str,
		port: u16,
	) -> Result<BoxedPortStream, K8sError> {
		let mut forwarder = self
			.pods(namespace)
			.portforward(name, &[port])
			.await
			.map_err(|e| K8sError::PortForwardError {
				message: e.to_string(),
			})?;
		let stream = forwarder
			.take_stream(port)
			.ok_or_else(|| K8sError::PortForwardError {
				message: format!("no stream for port {port}"),
			})?;

		let pod = name.to_string();
		tokio::spawn(async move {
			if let Err(e) = forwarder.join().await {
				debug!(pod = %pod, port, error = %e, "port-forward connection closed");
			}
		});

		Ok(Box::pin(stream))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use k8s_openapi::apimachinery::pkg::apis::meta::v1::{StatusCause, StatusDetails};

	#[test]
	fn test_exec_status_success() {
		let status = Status {
			status: Some("Success".into()),
			..Default::default()
		};
		assert_eq!(exec_status_from(Some(status)), ExecStatus::success());
	}

	#[test]
	fn test_exec_status_extracts_exit_code() {
		let status = Status {
			status: Some("Failure".into()),
			message: Some("command terminated with non-zero exit code".into()),
			details: Some(StatusDetails {
				causes: Some(vec![StatusCause {
					reason: Some("ExitCode".into()),
					message: Some("127".into()),
					..Default::default()
				}]),
				..Default::default()
			}),
			..Default::default()
		};
		let parsed = exec_status_from(Some(status));
		assert!(!parsed.success);
		assert_eq!(parsed.exit_code, Some(127));
	}

	#[test]
	fn test_exec_status_missing() {
		let parsed = exec_status_from(None);
		assert!(!parsed.success);
		assert_eq!(parsed.exit_code, None);
	}
}
