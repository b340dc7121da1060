// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devloop_common_k8s::{K8sClient, Pod};
use devloop_hooks::Feature;
use devloop_session::{
	describe, previous_pod_condition, ConnectionHandle, PodCondition, Session, SessionError,
	SessionResult, Target, TargetKind,
};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument, warn};

use crate::arena::{PortArena, PortLease};
use crate::error::{ForwardError, ForwardResult};
use crate::mapping::PortMapping;

/// How often a forwarding session checks that its pod is still there.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct ForwardOptions {
	pub name: String,
	pub ports: Vec<PortMapping>,
	#[serde(skip)]
	pub health_interval: Duration,
}

impl ForwardOptions {
	pub fn new(name: impl Into<String>, ports: Vec<PortMapping>) -> Self {
		Self {
			name: name.into(),
			ports,
			health_interval: DEFAULT_HEALTH_INTERVAL,
		}
	}
}

/// A listener bound to a leased local port.
#[derive(Debug)]
pub struct BoundPort {
	pub mapping: PortMapping,
	pub listener: TcpListener,
	lease: PortLease,
}

impl BoundPort {
	pub fn local_addr(&self) -> ForwardResult<SocketAddr> {
		self.listener.local_addr().map_err(|source| ForwardError::Bind {
			addr: SocketAddr::new(self.mapping.bind, self.lease.port()),
			source,
		})
	}
}

/// Bind `mapping` and lease its local port from `arena`.
///
/// Ephemeral ports are bound first so the lease names the real port.
pub async fn bind_port(arena: &PortArena, mapping: PortMapping, owner: &str) -> ForwardResult<BoundPort> {
	let requested = SocketAddr::new(mapping.bind, mapping.local);
	if mapping.is_ephemeral() {
		let listener = TcpListener::bind(requested)
			.await
			.map_err(|source| ForwardError::Bind {
				addr: requested,
				source,
			})?;
		let port = listener
			.local_addr()
			.map_err(|source| ForwardError::Bind {
				addr: requested,
				source,
			})?
			.port();
		let lease = arena.lock(port, owner)?;
		return Ok(BoundPort {
			mapping: PortMapping { local: port, ..mapping },
			listener,
			lease,
		});
	}

	let lease = arena.lock(mapping.local, owner)?;
	let listener = TcpListener::bind(requested)
		.await
		.map_err(|source| ForwardError::Bind {
			addr: requested,
			source,
		})?;
	Ok(BoundPort {
		mapping,
		listener,
		lease,
	})
}

/// Forwards local TCP ports to a pod.
pub struct PortForwardSession {
	options: ForwardOptions,
	client: Arc<dyn K8sClient>,
	arena: PortArena,
}

impl PortForwardSession {
	pub fn new(options: ForwardOptions, client: Arc<dyn K8sClient>, arena: PortArena) -> Self {
		Self {
			options,
			client,
			arena,
		}
	}

	fn owner(&self) -> String {
		format!("port forwarding {}", self.options.name)
	}
}

#[async_trait]
impl Session for PortForwardSession {
	fn feature(&self) -> Feature {
		Feature::PortForwarding
	}

	fn name(&self) -> &str {
		&self.options.name
	}

	fn config(&self) -> serde_json::Value {
		serde_json::to_value(&self.options).unwrap_or_default()
	}

	fn target_kind(&self) -> TargetKind {
		TargetKind::Pod
	}

	#[instrument(skip_all, fields(session = %self.options.name, target = %target))]
	async fn connect(&self, target: &Target, handle: ConnectionHandle) -> SessionResult<()> {
		let owner = self.owner();
		let mut bound = Vec::with_capacity(self.options.ports.len());
		for mapping in &self.options.ports {
			bound.push(bind_port(&self.arena, *mapping, &owner).await?);
		}

		for port in bound {
			let addr = port.local_addr()?;
			info!(
				"port forwarding started on {addr} -> {}:{}",
				target.pod_name(),
				port.mapping.remote
			);
			handle.spawn(accept_loop(
				port,
				self.client.clone(),
				target.pod().clone(),
				handle.clone(),
			));
		}

		handle.spawn(watch_pod(
			self.client.clone(),
			target.pod().clone(),
			self.options.health_interval,
			handle.clone(),
		));
		Ok(())
	}
}

fn pod_key(pod: &Pod) -> String {
	format!(
		"{}/{}",
		pod.metadata.namespace.as_deref().unwrap_or_default(),
		pod.metadata.name.as_deref().unwrap_or_default()
	)
}

async fn accept_loop(port: BoundPort, client: Arc<dyn K8sClient>, pod: Arc<Pod>, handle: ConnectionHandle) {
	let token = handle.token().clone();
	let BoundPort {
		mapping,
		listener,
		lease: _lease,
	} = port;

	loop {
		let accepted = tokio::select! {
			_ = token.cancelled() => return,
			accepted = listener.accept() => accepted,
		};
		match accepted {
			Ok((socket, peer)) => {
				debug!(%peer, remote = mapping.remote, "accepted connection");
				handle.spawn(forward_connection(
					socket,
					mapping.remote,
					client.clone(),
					pod.clone(),
					handle.clone(),
				));
			}
			Err(e) => {
				handle
					.fail(SessionError::connection_lost(
						pod_key(&pod),
						format!("accept on port {}: {e}", mapping.local),
					))
					.await;
				return;
			}
		}
	}
}

async fn forward_connection(
	mut socket: TcpStream,
	remote: u16,
	client: Arc<dyn K8sClient>,
	pod: Arc<Pod>,
	handle: ConnectionHandle,
) {
	let token = handle.token().clone();
	let name = pod.metadata.name.as_deref().unwrap_or_default();
	let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();

	let mut upstream = match client.port_forward(name, namespace, remote).await {
		Ok(stream) => stream,
		Err(e) => {
			handle
				.fail(SessionError::connection_lost(pod_key(&pod), format!("port {remote}: {e}")))
				.await;
			return;
		}
	};

	tokio::select! {
		_ = token.cancelled() => {}
		copied = tokio::io::copy_bidirectional(&mut socket, &mut upstream) => match copied {
			Ok((sent, received)) => debug!(remote, sent, received, "connection closed"),
			Err(e) => debug!(remote, error = %e, "connection closed with error"),
		},
	}
}

/// Fail the connection once the pod is deleted, replaced or terminating.
async fn watch_pod(client: Arc<dyn K8sClient>, pod: Arc<Pod>, interval: Duration, handle: ConnectionHandle) {
	let token = handle.token().clone();
	let name = pod.metadata.name.as_deref().unwrap_or_default().to_string();
	loop {
		tokio::select! {
			_ = token.cancelled() => return,
			_ = tokio::time::sleep(interval) => {}
		}
		match previous_pod_condition(client.as_ref(), &pod).await {
			condition @ (PodCondition::Gone | PodCondition::Terminating) => {
				handle
					.fail(SessionError::connection_lost(pod_key(&pod), describe(&name, &condition)))
					.await;
				return;
			}
			PodCondition::Unknown(error) => warn!(pod = %name, %error, "couldn't check pod"),
			PodCondition::Status(_) => {}
		}
	}
}
