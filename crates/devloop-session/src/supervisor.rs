// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// Owns every task of one dev invocation and cancels them together.
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
	token: CancellationToken,
	tracker: TaskTracker,
}

impl Supervisor {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn token(&self) -> &CancellationToken {
		&self.token
	}

	/// Token cancelled with the supervisor, but cancellable on its own.
	pub fn child_token(&self) -> CancellationToken {
		self.token.child_token()
	}

	pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		self.tracker.spawn(task)
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	pub fn task_count(&self) -> usize {
		self.tracker.len()
	}

	pub fn cancel(&self) {
		self.token.cancel();
	}

	/// Wait for all tracked tasks without cancelling them.
	pub async fn wait(&self) {
		self.tracker.close();
		self.tracker.wait().await;
		self.tracker.reopen();
	}

	/// Cancel everything and wait until every tracked task has exited.
	pub async fn shutdown(&self) {
		self.token.cancel();
		self.tracker.close();
		self.tracker.wait().await;
		info!("all sessions stopped");
	}
}
