// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::pin::Pin;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

pub use k8s_openapi::api::core::v1::{
	Container, ContainerState, ContainerStateRunning, ContainerStateTerminated,
	ContainerStateWaiting, ContainerStatus, Event, ObjectReference, Pod, PodSpec, PodStatus,
};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

use crate::error::K8sError;

/// Parameters for running a command inside a container.
#[derive(Debug, Clone, Default)]
pub struct ExecParams {
	pub command: Vec<String>,
	pub stdin: bool,
	pub tty: bool,
}

impl ExecParams {
	pub fn new<I, S>(command: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			command: command.into_iter().map(Into::into).collect(),
			stdin: false,
			tty: false,
		}
	}

	pub fn with_stdin(mut self) -> Self {
		self.stdin = true;
		self
	}
}

/// Final status of a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecStatus {
	pub success: bool,
	pub exit_code: Option<i32>,
	pub message: Option<String>,
}

impl ExecStatus {
	pub fn success() -> Self {
		Self {
			success: true,
			exit_code: Some(0),
			message: None,
		}
	}

	pub fn failure(exit_code: Option<i32>, message: impl Into<String>) -> Self {
		Self {
			success: false,
			exit_code,
			message: Some(message.into()),
		}
	}
}

impl std::fmt::Display for ExecStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match (self.success, self.exit_code, &self.message) {
			(true, _, _) => write!(f, "exited successfully"),
			(false, Some(code), Some(msg)) => write!(f, "exit code {code}: {msg}"),
			(false, Some(code), None) => write!(f, "exit code {code}"),
			(false, None, Some(msg)) => write!(f, "{msg}"),
			(false, None, None) => write!(f, "failed"),
		}
	}
}

/// Future that resolves when the remote command exits.
pub type ExecCompletion = BoxFuture<'static, Result<ExecStatus, K8sError>>;

/// A running remote command with separate stdio streams.
///
/// `stdin` is `None` when the command was started without stdin.
pub struct ExecProcess {
	pub stdin: Option<Pin<Box<dyn AsyncWrite + Send>>>,
	pub stdout: Pin<Box<dyn AsyncRead + Send>>,
	pub stderr: Pin<Box<dyn AsyncRead + Send>>,
	pub completion: ExecCompletion,
}

/// Collected output of a command run to completion.
#[derive(Debug, Clone)]
pub struct ExecOutput {
	pub stdout: String,
	pub stderr: String,
	pub status: ExecStatus,
}

impl ExecProcess {
	/// Drain stdout and stderr and wait for the command to finish.
	pub async fn wait_with_output(self) -> Result<ExecOutput, K8sError> {
		let ExecProcess {
			stdin,
			mut stdout,
			mut stderr,
			completion,
		} = self;
		drop(stdin);

		let read_out = async {
			let mut buf = Vec::new();
			stdout.read_to_end(&mut buf).await.map(|_| buf)
		};
		let read_err = async {
			let mut buf = Vec::new();
			stderr.read_to_end(&mut buf).await.map(|_| buf)
		};
		let (out, err) = tokio::join!(read_out, read_err);
		let map_io = |e: std::io::Error| K8sError::ExecError {
			message: e.to_string(),
		};
		let stdout = String::from_utf8_lossy(&out.map_err(map_io)?).into_owned();
		let stderr = String::from_utf8_lossy(&err.map_err(map_io)?).into_owned();
		let status = completion.await?;

		Ok(ExecOutput {
			stdout,
			stderr,
			status,
		})
	}
}

/// Bidirectional byte stream to a forwarded pod port.
pub trait PortStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PortStream for T {}

/// A boxed forwarded connection.
pub type BoxedPortStream = Pin<Box<dyn PortStream>>;
