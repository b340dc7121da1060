// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	Created,
	Selecting,
	Injecting,
	Streaming,
	InitialBarrier,
	Active,
	Error,
	Restarting,
	Stopped,
	Done,
}

impl SessionState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, SessionState::Stopped | SessionState::Done)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			SessionState::Created => "created",
			SessionState::Selecting => "selecting",
			SessionState::Injecting => "injecting",
			SessionState::Streaming => "streaming",
			SessionState::InitialBarrier => "initial_barrier",
			SessionState::Active => "active",
			SessionState::Error => "error",
			SessionState::Restarting => "restarting",
			SessionState::Stopped => "stopped",
			SessionState::Done => "done",
		}
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Publishes state changes and keeps the full transition history.
#[derive(Debug, Clone)]
pub struct StateTracker {
	tx: Arc<watch::Sender<SessionState>>,
	history: Arc<Mutex<Vec<SessionState>>>,
}

impl Default for StateTracker {
	fn default() -> Self {
		Self::new()
	}
}

impl StateTracker {
	pub fn new() -> Self {
		let (tx, _) = watch::channel(SessionState::Created);
		Self {
			tx: Arc::new(tx),
			history: Arc::new(Mutex::new(vec![SessionState::Created])),
		}
	}

	pub fn set(&self, state: SessionState) {
		let previous = self.tx.send_replace(state);
		if previous != state {
			debug!(from = %previous, to = %state, "session state changed");
		}
		if let Ok(mut history) = self.history.lock() {
			history.push(state);
		}
	}

	pub fn current(&self) -> SessionState {
		*self.tx.borrow()
	}

	pub fn subscribe(&self) -> watch::Receiver<SessionState> {
		self.tx.subscribe()
	}

	pub fn history(&self) -> Vec<SessionState> {
		self.history.lock().map(|h| h.clone()).unwrap_or_default()
	}

	/// Resolves with the first state, current one included, matching `pred`.
	pub async fn wait_for(&self, mut pred: impl FnMut(SessionState) -> bool) -> SessionState {
		let mut rx = self.subscribe();
		let state = match rx.wait_for(|s| pred(*s)).await {
			Ok(state) => *state,
			Err(_) => self.current(),
		};
		state
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_history_records_transitions() {
		let tracker = StateTracker::new();
		tracker.set(SessionState::Selecting);
		tracker.set(SessionState::Active);
		assert_eq!(tracker.current(), SessionState::Active);
		assert_eq!(
			tracker.history(),
			vec![SessionState::Created, SessionState::Selecting, SessionState::Active]
		);
	}

	#[tokio::test]
	async fn test_wait_for_sees_later_state() {
		let tracker = StateTracker::new();
		let waiter = tracker.clone();
		let task = tokio::spawn(async move { waiter.wait_for(|s| s.is_terminal()).await });
		tracker.set(SessionState::Active);
		tracker.set(SessionState::Done);
		assert_eq!(task.await.unwrap(), SessionState::Done);
	}

	#[test]
	fn test_display() {
		assert_eq!(SessionState::InitialBarrier.to_string(), "initial_barrier");
		assert!(SessionState::Stopped.is_terminal());
		assert!(!SessionState::Error.is_terminal());
	}
}
