// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! One established set of transports and the signals they emit.

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::SessionError;

const EVENT_BUFFER: usize = 32;

/// Signal emitted by a session's transports.
#[derive(Debug)]
pub enum ConnectionEvent {
	UploadInitialDone,
	DownloadInitialDone,
	Done,
	Error(SessionError),
}

/// How the initial-sync barrier ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
	Ready,
	Done,
}

/// Receiving side owned by the controller.
///
/// Dropping a connection cancels its tasks; [`Connection::stop`] also waits
/// for them.
#[derive(Debug)]
pub struct Connection {
	events: mpsc::Receiver<ConnectionEvent>,
	cancel: CancellationToken,
	tasks: TaskTracker,
}

/// Sending side handed to the session, used to spawn transport tasks.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
	events: mpsc::Sender<ConnectionEvent>,
	cancel: CancellationToken,
	tasks: TaskTracker,
}

impl Connection {
	pub fn new(cancel: CancellationToken) -> (Self, ConnectionHandle) {
		let (tx, rx) = mpsc::channel(EVENT_BUFFER);
		let tasks = TaskTracker::new();
		let connection = Self {
			events: rx,
			cancel: cancel.clone(),
			tasks: tasks.clone(),
		};
		let handle = ConnectionHandle {
			events: tx,
			cancel,
			tasks,
		};
		(connection, handle)
	}

	/// `None` once every handle is gone.
	pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
		self.events.recv().await
	}

	/// Wait for both initial signals.
	pub async fn wait_initial(&mut self) -> Result<BarrierOutcome, SessionError> {
		let mut upload = false;
		let mut download = false;
		while !(upload && download) {
			match self.events.recv().await {
				Some(ConnectionEvent::UploadInitialDone) => upload = true,
				Some(ConnectionEvent::DownloadInitialDone) => download = true,
				Some(ConnectionEvent::Done) => return Ok(BarrierOutcome::Done),
				Some(ConnectionEvent::Error(e)) => return Err(e),
				None => {
					return Err(SessionError::InitialSync {
						message: "transports closed before the initial sync finished".into(),
					})
				}
			}
		}
		Ok(BarrierOutcome::Ready)
	}

	pub fn task_count(&self) -> usize {
		self.tasks.len()
	}

	/// Cancel every transport task and wait for them to exit.
	pub async fn stop(&mut self) {
		self.cancel.cancel();
		self.tasks.close();
		self.tasks.wait().await;
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

impl ConnectionHandle {
	pub fn token(&self) -> &CancellationToken {
		&self.cancel
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	pub fn spawn<F>(&self, task: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		self.tasks.spawn(task);
	}

	/// Send a signal; dropped silently once the controller stopped listening.
	pub async fn notify(&self, event: ConnectionEvent) {
		let _ = self.events.send(event).await;
	}

	/// Report a transport failure unless the connection is being torn down.
	pub async fn fail(&self, error: SessionError) {
		if !self.cancel.is_cancelled() {
			self.notify(ConnectionEvent::Error(error)).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_barrier_needs_both_signals() {
		let (mut connection, handle) = Connection::new(CancellationToken::new());
		handle.notify(ConnectionEvent::DownloadInitialDone).await;
		handle.notify(ConnectionEvent::UploadInitialDone).await;
		assert_eq!(connection.wait_initial().await.unwrap(), BarrierOutcome::Ready);
	}

	#[tokio::test]
	async fn test_barrier_error_and_close() {
		let (mut connection, handle) = Connection::new(CancellationToken::new());
		handle.notify(ConnectionEvent::UploadInitialDone).await;
		handle
			.notify(ConnectionEvent::Error(SessionError::connection_lost("web-1", "eof")))
			.await;
		assert!(matches!(
			connection.wait_initial().await,
			Err(SessionError::ConnectionLost { .. })
		));

		drop(handle);
		assert!(matches!(
			connection.wait_initial().await,
			Err(SessionError::InitialSync { .. })
		));
	}

	#[tokio::test]
	async fn test_stop_cancels_tasks() {
		let (mut connection, handle) = Connection::new(CancellationToken::new());
		let token = handle.token().clone();
		handle.spawn(async move { token.cancelled().await });
		assert_eq!(connection.task_count(), 1);

		connection.stop().await;
		assert!(handle.is_cancelled());
		assert_eq!(connection.task_count(), 0);
	}

	#[tokio::test]
	async fn test_fail_is_silent_after_cancel() {
		let (mut connection, handle) = Connection::new(CancellationToken::new());
		connection.stop().await;
		handle.fail(SessionError::Cancelled).await;
		drop(handle);
		assert!(connection.next_event().await.is_none());
	}
}
