// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Duplex exec streams to the sync agent.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use devloop_common_k8s::{ExecCompletion, ExecParams, K8sClient};
use devloop_selector::SelectedContainer;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::{SyncError, SyncResult};

const STDERR_TAIL_LINES: usize = 20;

/// How long a failed stream waits for the agent's exit status.
pub const EXIT_GRACE: Duration = Duration::from_secs(5);

const DRAIN_GRACE: Duration = Duration::from_secs(1);

pub type AgentWriter = Pin<Box<dyn AsyncWrite + Send>>;
pub type AgentReader = Pin<Box<dyn AsyncRead + Send>>;

/// Last lines the agent wrote to stderr, attached to exit errors.
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
	lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
	fn push(&self, line: String) {
		let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
		if lines.len() == STDERR_TAIL_LINES {
			lines.pop_front();
		}
		lines.push_back(line);
	}

	pub fn contents(&self) -> String {
		let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
		lines.iter().cloned().collect::<Vec<_>>().join("\n")
	}
}

/// A running `<agent> sync ...` command.
pub struct AgentStream {
	pub stdin: AgentWriter,
	pub stdout: AgentReader,
	stderr: Option<AgentReader>,
	exit: AgentExit,
}

/// Exit status of the agent, resolved after its streams close.
pub struct AgentExit {
	completion: ExecCompletion,
	tail: StderrTail,
	drained: Option<CancellationToken>,
}

impl AgentStream {
	#[instrument(skip_all, fields(pod = %target.pod_name(), container = %target.container.name))]
	pub async fn open(
		client: &dyn K8sClient,
		target: &SelectedContainer,
		argv: Vec<String>,
	) -> SyncResult<Self> {
		debug!(command = ?argv, "starting agent stream");
		let process = client
			.exec(
				target.pod_name(),
				target.namespace(),
				&target.container.name,
				ExecParams::new(argv).with_stdin(),
			)
			.await?;

		let stdin = process.stdin.ok_or_else(|| SyncError::protocol("exec stream has no stdin"))?;
		Ok(Self {
			stdin,
			stdout: process.stdout,
			stderr: Some(process.stderr),
			exit: AgentExit {
				completion: process.completion,
				tail: StderrTail::default(),
				drained: None,
			},
		})
	}

	/// Future that logs every stderr line until the stream closes.
	///
	/// Must be polled, or a chatty agent blocks on a full stderr pipe.
	pub fn stderr_drain(&mut self) -> impl std::future::Future<Output = ()> + Send + 'static {
		let stderr = self.stderr.take();
		let tail = self.exit.tail.clone();
		let drained = CancellationToken::new();
		if stderr.is_some() {
			self.exit.drained = Some(drained.clone());
		}
		async move {
			let _done = drained.drop_guard();
			let Some(stderr) = stderr else { return };
			let mut lines = BufReader::new(stderr).lines();
			loop {
				match lines.next_line().await {
					Ok(Some(line)) => {
						debug!("agent - {line}");
						tail.push(line);
					}
					Ok(None) => break,
					Err(e) => {
						warn!("agent - error streaming logs: {e}");
						break;
					}
				}
			}
		}
	}

	pub fn into_parts(self) -> (AgentWriter, AgentReader, AgentExit) {
		(self.stdin, self.stdout, self.exit)
	}
}

impl AgentExit {
	/// `Ok` when the agent exited cleanly.
	pub async fn wait(self) -> SyncResult<()> {
		let status = self.completion.await?;
		if let Some(drained) = &self.drained {
			let _ = tokio::time::timeout(DRAIN_GRACE, drained.cancelled()).await;
		}
		if status.success {
			Ok(())
		} else {
			Err(SyncError::AgentExited {
				status: status.to_string(),
				stderr: self.tail.contents(),
			})
		}
	}
}
