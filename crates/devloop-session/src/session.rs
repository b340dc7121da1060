// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use devloop_common_k8s::Pod;
use devloop_hooks::Feature;
use devloop_selector::SelectedContainer;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionHandle;
use crate::error::{SessionError, SessionResult};

/// Whether a session attaches to a container or to a whole pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
	Container,
	Pod,
}

/// The workload a session is pinned to for one connection.
#[derive(Debug, Clone)]
pub enum Target {
	Container(SelectedContainer),
	Pod(Arc<Pod>),
}

impl Target {
	pub fn pod(&self) -> &Arc<Pod> {
		match self {
			Target::Container(c) => &c.pod,
			Target::Pod(p) => p,
		}
	}

	pub fn pod_name(&self) -> &str {
		self.pod().metadata.name.as_deref().unwrap_or_default()
	}

	pub fn namespace(&self) -> &str {
		self.pod().metadata.namespace.as_deref().unwrap_or_default()
	}

	pub fn container(&self) -> SessionResult<&SelectedContainer> {
		match self {
			Target::Container(c) => Ok(c),
			Target::Pod(_) => Err(SessionError::WrongTarget {
				expected: "container",
			}),
		}
	}
}

impl fmt::Display for Target {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Target::Container(c) => write!(f, "{}/{}", c.namespace(), c),
			Target::Pod(_) => write!(f, "{}/{}", self.namespace(), self.pod_name()),
		}
	}
}

/// A long-lived connection to a workload that the controller keeps alive.
///
/// The controller selects the target, then calls [`Session::prepare`] and
/// [`Session::connect`]. `connect` spawns its transport tasks through the
/// handle and reports progress and failures as connection events.
#[async_trait]
pub trait Session: Send + Sync + 'static {
	fn feature(&self) -> Feature;

	fn name(&self) -> &str;

	/// Active configuration, passed to hooks.
	fn config(&self) -> serde_json::Value {
		serde_json::Value::Null
	}

	fn target_kind(&self) -> TargetKind {
		TargetKind::Container
	}

	/// Whether establishment waits for both initial-sync signals.
	fn requires_barrier(&self) -> bool {
		false
	}

	/// Runs before any transport is opened, e.g. to inject a helper.
	async fn prepare(&self, _target: &Target, _cancel: &CancellationToken) -> SessionResult<()> {
		Ok(())
	}

	async fn connect(&self, target: &Target, handle: ConnectionHandle) -> SessionResult<()>;
}
