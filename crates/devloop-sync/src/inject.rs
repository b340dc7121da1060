// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Make sure the sync agent is present in the target container.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use devloop_common_k8s::{ExecParams, K8sClient};
use devloop_selector::SelectedContainer;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::agent::{AGENT_VERSION, DEFAULT_AGENT_PATH};
use crate::error::{SyncError, SyncResult};

const LOCAL_AGENT_NAME: &str = "devloop-agent";

/// Installs the sync agent into a container.
#[async_trait]
pub trait HelperInjector: Send + Sync + 'static {
	async fn ensure(&self, client: &dyn K8sClient, target: &SelectedContainer) -> SyncResult<()>;
}

pub type SharedHelperInjector = Arc<dyn HelperInjector>;

/// For images that ship the agent already.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInjector;

#[async_trait]
impl HelperInjector for NoopInjector {
	async fn ensure(&self, _client: &dyn K8sClient, _target: &SelectedContainer) -> SyncResult<()> {
		Ok(())
	}
}

/// Uploads a locally cached agent binary over exec stdin when the container
/// runs a different version.
///
/// Injections are serialized process wide so two sessions against the same
/// container don't race on the temp file.
#[derive(Debug)]
pub struct ExecInjector {
	binary_dir: PathBuf,
	remote_path: String,
	version: String,
	lock: Mutex<()>,
}

impl ExecInjector {
	pub fn new(binary_dir: impl Into<PathBuf>) -> Self {
		Self {
			binary_dir: binary_dir.into(),
			remote_path: DEFAULT_AGENT_PATH.to_string(),
			version: AGENT_VERSION.to_string(),
			lock: Mutex::new(()),
		}
	}

	pub fn with_remote_path(mut self, path: impl Into<String>) -> Self {
		self.remote_path = path.into();
		self
	}

	pub fn with_version(mut self, version: impl Into<String>) -> Self {
		self.version = version.into();
		self
	}

	async fn run(
		&self,
		client: &dyn K8sClient,
		target: &SelectedContainer,
		command: Vec<String>,
	) -> SyncResult<(bool, String)> {
		let output = client
			.exec(
				target.pod_name(),
				target.namespace(),
				&target.container.name,
				ExecParams::new(command),
			)
			.await?
			.wait_with_output()
			.await?;
		Ok((output.status.success, output.stdout))
	}

	async fn installed_version(&self, client: &dyn K8sClient, target: &SelectedContainer) -> Option<String> {
		match self
			.run(client, target, vec![self.remote_path.clone(), "version".into()])
			.await
		{
			Ok((true, stdout)) => Some(stdout.trim().to_string()),
			Ok((false, _)) => None,
			Err(e) => {
				debug!(error = %e, "agent version check failed");
				None
			}
		}
	}

	async fn arch_suffix(&self, client: &dyn K8sClient, target: &SelectedContainer) -> &'static str {
		match self.run(client, target, vec!["uname".into(), "-a".into()]).await {
			Ok((_, stdout)) if stdout.contains("arm64") || stdout.contains("aarch64") => "-arm64",
			_ => "",
		}
	}

	async fn upload(&self, client: &dyn K8sClient, target: &SelectedContainer, binary: &[u8]) -> SyncResult<()> {
		let tmp = format!("{}.tmp", self.remote_path);
		let script = format!(
			"cat > '{tmp}' && chmod 0777 '{tmp}' && mv '{tmp}' '{}'",
			self.remote_path
		);
		let mut process = client
			.exec(
				target.pod_name(),
				target.namespace(),
				&target.container.name,
				ExecParams::new(["sh", "-c", script.as_str()]).with_stdin(),
			)
			.await?;

		let mut stdin = process.stdin.take().ok_or_else(|| SyncError::Inject {
			message: "exec stream has no stdin".into(),
		})?;
		stdin.write_all(binary).await?;
		stdin.shutdown().await?;
		drop(stdin);

		let output = process.wait_with_output().await?;
		if !output.status.success {
			return Err(SyncError::Inject {
				message: format!("{} {}", output.stderr.trim(), output.status),
			});
		}
		Ok(())
	}
}

#[async_trait]
impl HelperInjector for ExecInjector {
	#[instrument(skip_all, fields(pod = %target.pod_name(), container = %target.container.name))]
	async fn ensure(&self, client: &dyn K8sClient, target: &SelectedContainer) -> SyncResult<()> {
		let _guard = self.lock.lock().await;

		if self.installed_version(client, target).await.as_deref() == Some(self.version.as_str()) {
			debug!("agent already up to date");
			return Ok(());
		}

		let arch = self.arch_suffix(client, target).await;
		let local = self.binary_dir.join(format!("{LOCAL_AGENT_NAME}{arch}"));
		let binary = tokio::fs::read(&local)
			.await
			.map_err(|e| SyncError::io(&local, e))?;

		info!(version = %self.version, "injecting sync agent");
		self.upload(client, target, &binary).await?;
		info!("injected sync agent into {}/{}", target.namespace(), target.pod_name());
		Ok(())
	}
}
