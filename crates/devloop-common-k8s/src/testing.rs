// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory cluster for tests of the crates built on [`K8sClient`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::io::DuplexStream;
use tokio::sync::oneshot;

use crate::client::K8sClient;
use crate::error::K8sError;
use crate::types::{
	BoxedPortStream, Container, ContainerState, ContainerStateRunning, ContainerStateWaiting,
	ContainerStatus, Event, ExecParams, ExecProcess, ExecStatus, ObjectMeta, Pod, PodSpec,
	PodStatus, Time,
};

/// A recorded exec invocation.
#[derive(Debug, Clone)]
pub struct ExecCall {
	pub pod: String,
	pub namespace: String,
	pub container: String,
	pub command: Vec<String>,
	pub stdin: bool,
}

pub type ExecHandler = Arc<dyn Fn(&ExecCall) -> Result<ExecProcess, K8sError> + Send + Sync>;
pub type ForwardHandler =
	Arc<dyn Fn(&str, u16) -> Result<BoxedPortStream, K8sError> + Send + Sync>;

/// Mock K8s client backed by in-memory pods and scripted exec handlers.
pub struct MockK8sClient {
	namespace: String,
	pods: Mutex<Vec<Pod>>,
	events: Mutex<Vec<Event>>,
	exec_handler: Mutex<Option<ExecHandler>>,
	forward_handler: Mutex<Option<ForwardHandler>>,
	exec_calls: Mutex<Vec<ExecCall>>,
	list_calls: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
	m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockK8sClient {
	pub fn new() -> Self {
		Self::with_namespace("default")
	}

	pub fn with_namespace(namespace: impl Into<String>) -> Self {
		Self {
			namespace: namespace.into(),
			pods: Mutex::new(Vec::new()),
			events: Mutex::new(Vec::new()),
			exec_handler: Mutex::new(None),
			forward_handler: Mutex::new(None),
			exec_calls: Mutex::new(Vec::new()),
			list_calls: AtomicUsize::new(0),
		}
	}

	/// Insert a pod, replacing any pod with the same namespace and name.
	pub fn insert_pod(&self, pod: Pod) {
		let mut pods = lock(&self.pods);
		let key = (pod.metadata.namespace.clone(), pod.metadata.name.clone());
		pods.retain(|p| (p.metadata.namespace.clone(), p.metadata.name.clone()) != key);
		pods.push(pod);
	}

	pub fn remove_pod(&self, namespace: &str, name: &str) {
		lock(&self.pods).retain(|p| {
			p.metadata.namespace.as_deref() != Some(namespace) || p.metadata.name.as_deref() != Some(name)
		});
	}

	pub fn set_pods(&self, pods: Vec<Pod>) {
		*lock(&self.pods) = pods;
	}

	pub fn add_event(&self, event: Event) {
		lock(&self.events).push(event);
	}

	pub fn on_exec(&self, handler: ExecHandler) {
		*lock(&self.exec_handler) = Some(handler);
	}

	pub fn on_port_forward(&self, handler: ForwardHandler) {
		*lock(&self.forward_handler) = Some(handler);
	}

	pub fn exec_calls(&self) -> Vec<ExecCall> {
		lock(&self.exec_calls).clone()
	}

	pub fn list_calls(&self) -> usize {
		self.list_calls.load(Ordering::SeqCst)
	}
}

impl Default for MockK8sClient {
	fn default() -> Self {
		Self::new()
	}
}

/// Evaluate an equality-based label selector (`a=b,c!=d,e,!f`).
pub fn matches_label_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
	let empty = BTreeMap::new();
	let labels = labels.unwrap_or(&empty);
	selector
		.split(',')
		.map(str::trim)
		.filter(|term| !term.is_empty())
		.all(|term| {
			if let Some((k, v)) = term.split_once("!=") {
				labels.get(k.trim()).map(String::as_str) != Some(v.trim())
			} else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
				labels.get(k.trim()).map(String::as_str) == Some(v.trim())
			} else if let Some(k) = term.strip_prefix('!') {
				!labels.contains_key(k.trim())
			} else {
				labels.contains_key(term)
			}
		})
}

#[async_trait]
impl K8sClient for MockK8sClient {
	fn default_namespace(&self) -> &str {
		&self.namespace
	}

	async fn list_pods(
		&self,
		namespace: &str,
		label_selector: Option<&str>,
	) -> Result<Vec<Pod>, K8sError> {
		self.list_calls.fetch_add(1, Ordering::SeqCst);
		let pods = lock(&self.pods);
		Ok(
			pods
				.iter()
				.filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
				.filter(|p| {
					label_selector.map_or(true, |s| matches_label_selector(p.metadata.labels.as_ref(), s))
				})
				.cloned()
				.collect(),
		)
	}

	async fn get_pod(&self, name: &str, namespace: &str) -> Result<Pod, K8sError> {
		lock(&self.pods)
			.iter()
			.find(|p| {
				p.metadata.namespace.as_deref() == Some(namespace) && p.metadata.name.as_deref() == Some(name)
			})
			.cloned()
			.ok_or_else(|| K8sError::PodNotFound {
				name: name.to_string(),
				namespace: namespace.to_string(),
			})
	}

	async fn list_events(&self, namespace: &str) -> Result<Vec<Event>, K8sError> {
		Ok(
			lock(&self.events)
				.iter()
				.filter(|e| e.metadata.namespace.as_deref() == Some(namespace))
				.cloned()
				.collect(),
		)
	}

	async fn exec(
		&self,
		name: &str,
		namespace: &str,
		container: &str,
		params: ExecParams,
	) -> Result<ExecProcess, K8sError> {
		let call = ExecCall {
			pod: name.to_string(),
			namespace: namespace.to_string(),
			container: container.to_string(),
			command: params.command,
			stdin: params.stdin,
		};
		lock(&self.exec_calls).push(call.clone());
		let handler = lock(&self.exec_handler).clone();
		match handler {
			Some(handler) => handler(&call),
			None => Ok(finished_process("", ExecStatus::success())),
		}
	}

	async fn port_forward(
		&self,
		name: &str,
		_namespace: &str,
		port: u16,
	) -> Result<BoxedPortStream, K8sError> {
		let handler = lock(&self.forward_handler).clone();
		match handler {
			Some(handler) => handler(name, port),
			None => Err(K8sError::PortForwardError {
				message: "no port-forward handler configured".into(),
			}),
		}
	}
}

/// Remote end of a scripted exec process.
pub struct RemoteProcess {
	/// Reads what the local side writes to the process stdin.
	pub stdin: DuplexStream,
	/// Writes reach the local side as process stdout.
	pub stdout: DuplexStream,
	/// Writes reach the local side as process stderr.
	pub stderr: DuplexStream,
	exit: oneshot::Sender<ExecStatus>,
}

impl RemoteProcess {
	/// Finish the process with the given status, closing all streams.
	pub fn exit(self, status: ExecStatus) {
		let _ = self.exit.send(status);
	}
}

/// Create a process whose remote side is driven by the test.
pub fn scripted_process() -> (ExecProcess, RemoteProcess) {
	const BUF: usize = 64 * 1024;
	let (local_stdin, remote_stdin) = tokio::io::duplex(BUF);
	let (remote_stdout, local_stdout) = tokio::io::duplex(BUF);
	let (remote_stderr, local_stderr) = tokio::io::duplex(BUF);
	let (tx, rx) = oneshot::channel();

	let process = ExecProcess {
		stdin: Some(Box::pin(local_stdin)),
		stdout: Box::pin(local_stdout),
		stderr: Box::pin(local_stderr),
		completion: async move {
			Ok(rx
				.await
				.unwrap_or_else(|_| ExecStatus::failure(None, "remote process dropped")))
		}
		.boxed(),
	};
	let remote = RemoteProcess {
		stdin: remote_stdin,
		stdout: remote_stdout,
		stderr: remote_stderr,
		exit: tx,
	};
	(process, remote)
}

/// A process that already exited with the given stdout.
pub fn finished_process(stdout: &str, status: ExecStatus) -> ExecProcess {
	ExecProcess {
		stdin: None,
		stdout: Box::pin(std::io::Cursor::new(stdout.as_bytes().to_vec())),
		stderr: Box::pin(tokio::io::empty()),
		completion: async move { Ok(status) }.boxed(),
	}
}

/// Builder for pod fixtures.
#[derive(Debug, Clone)]
pub struct PodBuilder {
	pod: Pod,
}

impl PodBuilder {
	pub fn new(namespace: &str, name: &str) -> Self {
		Self {
			pod: Pod {
				metadata: ObjectMeta {
					name: Some(name.into()),
					namespace: Some(namespace.into()),
					uid: Some(format!("uid-{name}")),
					..Default::default()
				},
				spec: Some(PodSpec::default()),
				status: Some(PodStatus {
					phase: Some("Pending".into()),
					..Default::default()
				}),
			},
		}
	}

	pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
		self.pod.metadata.creation_timestamp = Some(Time(at));
		self
	}

	pub fn label(mut self, key: &str, value: &str) -> Self {
		self
			.pod
			.metadata
			.labels
			.get_or_insert_with(BTreeMap::new)
			.insert(key.into(), value.into());
		self
	}

	pub fn annotation(mut self, key: &str, value: &str) -> Self {
		self
			.pod
			.metadata
			.annotations
			.get_or_insert_with(BTreeMap::new)
			.insert(key.into(), value.into());
		self
	}

	pub fn container(mut self, name: &str, image: &str) -> Self {
		if let Some(spec) = self.pod.spec.as_mut() {
			spec.containers.push(Container {
				name: name.into(),
				image: Some(image.into()),
				..Default::default()
			});
		}
		self
	}

	pub fn init_container(mut self, name: &str, image: &str) -> Self {
		if let Some(spec) = self.pod.spec.as_mut() {
			spec.init_containers.get_or_insert_with(Vec::new).push(Container {
				name: name.into(),
				image: Some(image.into()),
				..Default::default()
			});
		}
		self
	}

	/// Mark the pod Running with every normal container ready.
	pub fn running(mut self) -> Self {
		let statuses = self
			.pod
			.spec
			.as_ref()
			.map(|s| s.containers.iter().map(|c| running_status(&c.name)).collect())
			.unwrap_or_default();
		if let Some(status) = self.pod.status.as_mut() {
			status.phase = Some("Running".into());
			status.container_statuses = Some(statuses);
		}
		self
	}

	/// Mark every normal container as waiting with the given reason.
	pub fn waiting(mut self, reason: &str) -> Self {
		let statuses = self
			.pod
			.spec
			.as_ref()
			.map(|s| {
				s.containers
					.iter()
					.map(|c| waiting_status(&c.name, reason))
					.collect()
			})
			.unwrap_or_default();
		if let Some(status) = self.pod.status.as_mut() {
			status.phase = Some("Pending".into());
			status.container_statuses = Some(statuses);
		}
		self
	}

	/// Mark a named init container as running but not ready.
	pub fn init_running(mut self, name: &str) -> Self {
		if let Some(status) = self.pod.status.as_mut() {
			let mut s = running_status(name);
			s.ready = false;
			status.init_container_statuses.get_or_insert_with(Vec::new).push(s);
		}
		self
	}

	pub fn terminating(mut self) -> Self {
		self.pod.metadata.deletion_timestamp = Some(Time(Utc::now()));
		self
	}

	pub fn build(self) -> Pod {
		self.pod
	}
}

fn running_status(name: &str) -> ContainerStatus {
	ContainerStatus {
		name: name.into(),
		ready: true,
		state: Some(ContainerState {
			running: Some(ContainerStateRunning::default()),
			..Default::default()
		}),
		..Default::default()
	}
}

fn waiting_status(name: &str, reason: &str) -> ContainerStatus {
	ContainerStatus {
		name: name.into(),
		ready: false,
		state: Some(ContainerState {
			waiting: Some(ContainerStateWaiting {
				reason: Some(reason.into()),
				..Default::default()
			}),
			..Default::default()
		}),
		..Default::default()
	}
}
