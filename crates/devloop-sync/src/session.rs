// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devloop_common_k8s::K8sClient;
use devloop_hooks::Feature;
use devloop_session::{ConnectionEvent, ConnectionHandle, Session, SessionError, SessionResult, Target};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::agent::{downstream_argv, upstream_argv, DownstreamArgs, UpstreamArgs, DEFAULT_AGENT_PATH};
use crate::engine::{EngineOptions, SyncEngine, DEFAULT_SCAN_INTERVAL};
use crate::error::{SyncError, SyncResult};
use crate::exclude::{parse_exclude_file, ExcludeMatcher};
use crate::index::CompareBy;
use crate::inject::{NoopInjector, SharedHelperInjector};
use crate::path::SyncPath;
use crate::transport::{AgentExit, AgentStream, EXIT_GRACE};

/// Configuration of one sync session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
	pub name: String,
	/// `local:container`.
	pub path: String,
	pub exclude_paths: Vec<String>,
	pub upload_exclude_paths: Vec<String>,
	pub download_exclude_paths: Vec<String>,
	/// Relative to the local sync root.
	pub exclude_file: Option<String>,
	pub upload_exclude_file: Option<String>,
	pub download_exclude_file: Option<String>,
	pub compare_by: CompareBy,
	/// KiB per second.
	pub upload_limit: Option<u64>,
	pub download_limit: Option<u64>,
	/// Run in the container for every uploaded file and created directory.
	/// Takes precedence over the file and directory specific commands.
	pub change_cmd: Option<String>,
	pub change_args: Vec<String>,
	pub file_change_cmd: Option<String>,
	pub file_change_args: Vec<String>,
	pub dir_create_cmd: Option<String>,
	pub dir_create_args: Vec<String>,
	pub restart_container: bool,
	pub batch_cmd: Option<String>,
	pub batch_args: Vec<String>,
	pub wait_initial_sync: bool,
	pub disable_upload: bool,
	pub disable_download: bool,
	pub polling: bool,
	pub throttle: Option<u64>,
	/// Sync a single file instead of a directory.
	pub file: bool,
	#[serde(skip)]
	pub scan_interval: Duration,
}

impl Default for SyncOptions {
	fn default() -> Self {
		Self {
			name: String::new(),
			path: String::new(),
			exclude_paths: Vec::new(),
			upload_exclude_paths: Vec::new(),
			download_exclude_paths: Vec::new(),
			exclude_file: None,
			upload_exclude_file: None,
			download_exclude_file: None,
			compare_by: CompareBy::default(),
			upload_limit: None,
			download_limit: None,
			change_cmd: None,
			change_args: Vec::new(),
			file_change_cmd: None,
			file_change_args: Vec::new(),
			dir_create_cmd: None,
			dir_create_args: Vec::new(),
			restart_container: false,
			batch_cmd: None,
			batch_args: Vec::new(),
			wait_initial_sync: true,
			disable_upload: false,
			disable_download: false,
			polling: false,
			throttle: None,
			file: false,
			scan_interval: DEFAULT_SCAN_INTERVAL,
		}
	}
}

/// Resolved local and container side of a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
	pub local_root: PathBuf,
	pub container_path: String,
	pub excludes: Vec<String>,
	pub upload_excludes: Vec<String>,
	pub download_excludes: Vec<String>,
	/// Single-file syncs only watch the top level in the container.
	pub recursive_watch: bool,
}

impl SyncOptions {
	/// Resolve the sync path against `base_dir`, creating the local directory
	/// when it doesn't exist yet. A local file switches to single-file mode.
	pub async fn plan(&self, base_dir: &Path) -> SyncResult<SyncPlan> {
		let parsed = SyncPath::parse(&self.path);
		let mut local_root = base_dir.join(&parsed.local);
		let mut container_path = parsed.container;
		let mut excludes = self.exclude_paths.clone();

		let mut single_file = self.file;
		match tokio::fs::metadata(&local_root).await {
			Ok(meta) if meta.is_dir() && single_file => {
				return Err(SyncError::Config {
					message: format!(
						"cannot sync {} because it's a directory and a single file was expected",
						local_root.display()
					),
				})
			}
			Ok(meta) if !meta.is_dir() => single_file = true,
			Ok(_) => {}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				if !single_file {
					tokio::fs::create_dir_all(&local_root)
						.await
						.map_err(|e| SyncError::io(&local_root, e))?;
				}
			}
			Err(e) => return Err(SyncError::io(&local_root, e)),
		}

		if single_file {
			let file_name = local_root
				.file_name()
				.map(|n| n.to_string_lossy().into_owned())
				.unwrap_or_default();
			if file_name.is_empty() || file_name != container_base(&container_path) {
				return Err(SyncError::Config {
					message: "to sync a single file the file name must match on the local and container path, e.g. local-path/my-file.txt:remote-path/my-file.txt".into(),
				});
			}
			local_root = local_root
				.parent()
				.map(Path::to_path_buf)
				.unwrap_or_else(|| PathBuf::from("."));
			container_path = container_dir(&container_path).to_string();
			excludes = vec!["**".to_string(), format!("!/{file_name}")];
		}

		if let Some(file) = &self.exclude_file {
			excludes.extend(parse_exclude_file(&local_root.join(file)).await?);
		}
		let mut download_excludes = self.download_exclude_paths.clone();
		if let Some(file) = &self.download_exclude_file {
			download_excludes.extend(parse_exclude_file(&local_root.join(file)).await?);
		}
		let mut upload_excludes = self.upload_exclude_paths.clone();
		if let Some(file) = &self.upload_exclude_file {
			upload_excludes.extend(parse_exclude_file(&local_root.join(file)).await?);
		}

		Ok(SyncPlan {
			local_root,
			container_path,
			excludes,
			upload_excludes,
			download_excludes,
			recursive_watch: !single_file,
		})
	}

	/// File change and directory creation commands, in that order.
	fn upload_commands(&self) -> ((Option<&str>, &[String]), (Option<&str>, &[String])) {
		if let Some(cmd) = self.change_cmd.as_deref().filter(|c| !c.is_empty()) {
			let both = (Some(cmd), self.change_args.as_slice());
			return (both, both);
		}
		(
			(self.file_change_cmd.as_deref(), self.file_change_args.as_slice()),
			(self.dir_create_cmd.as_deref(), self.dir_create_args.as_slice()),
		)
	}

	fn engine_options(&self) -> EngineOptions {
		EngineOptions {
			compare_by: self.compare_by,
			scan_interval: self.scan_interval,
			upload_limit: self.upload_limit.map(|kib| kib * 1024),
			download_limit: self.download_limit.map(|kib| kib * 1024),
			batch_cmd: self.batch_cmd.clone(),
			batch_args: self.batch_args.clone(),
			restart_container: self.restart_container,
		}
	}
}

fn container_base(path: &str) -> &str {
	let trimmed = path.trim_end_matches('/');
	trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn container_dir(path: &str) -> &str {
	match path.trim_end_matches('/').rfind('/') {
		None => ".",
		Some(0) => "/",
		Some(i) => &path[..i],
	}
}

fn merged(a: &[String], b: &[String]) -> SyncResult<ExcludeMatcher> {
	let all: Vec<&String> = a.iter().chain(b).collect();
	ExcludeMatcher::new(&all)
}

/// Bidirectional file sync with one container.
pub struct SyncSession {
	options: SyncOptions,
	client: Arc<dyn K8sClient>,
	injector: SharedHelperInjector,
	agent_path: String,
	base_dir: PathBuf,
}

impl SyncSession {
	pub fn new(options: SyncOptions, client: Arc<dyn K8sClient>) -> Self {
		Self {
			options,
			client,
			injector: Arc::new(NoopInjector),
			agent_path: DEFAULT_AGENT_PATH.to_string(),
			base_dir: PathBuf::from("."),
		}
	}

	pub fn with_injector(mut self, injector: SharedHelperInjector) -> Self {
		self.injector = injector;
		self
	}

	pub fn with_agent_path(mut self, path: impl Into<String>) -> Self {
		self.agent_path = path.into();
		self
	}

	pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.base_dir = dir.into();
		self
	}

	pub fn options(&self) -> &SyncOptions {
		&self.options
	}
}

#[async_trait]
impl Session for SyncSession {
	fn feature(&self) -> Feature {
		Feature::Sync
	}

	fn name(&self) -> &str {
		&self.options.name
	}

	fn config(&self) -> serde_json::Value {
		serde_json::to_value(&self.options).unwrap_or_default()
	}

	fn requires_barrier(&self) -> bool {
		self.options.wait_initial_sync
	}

	async fn prepare(&self, target: &Target, cancel: &CancellationToken) -> SessionResult<()> {
		let container = target.container()?;
		tokio::select! {
			_ = cancel.cancelled() => Err(SessionError::Cancelled),
			result = self.injector.ensure(self.client.as_ref(), container) => result.map_err(SessionError::from),
		}
	}

	#[instrument(skip_all, fields(session = %self.options.name, target = %target))]
	async fn connect(&self, target: &Target, handle: ConnectionHandle) -> SessionResult<()> {
		let container = target.container()?;
		let plan = self.options.plan(&self.base_dir).await?;
		let pod_key = format!("{}/{}", target.namespace(), target.pod_name());

		let engine = Arc::new(SyncEngine::new(
			&plan.local_root,
			self.options.engine_options(),
			merged(&plan.excludes, &plan.upload_excludes)?,
			merged(&plan.excludes, &plan.download_excludes)?,
		));
		let (snapshot_tx, snapshot_rx) = watch::channel(false);

		let upstream = if self.options.disable_upload {
			None
		} else {
			let ((file_cmd, file_args), (dir_cmd, dir_args)) = self.options.upload_commands();
			let argv = upstream_argv(
				&self.agent_path,
				&UpstreamArgs {
					excludes: &plan.excludes,
					download_excludes: &plan.download_excludes,
					file_change_cmd: file_cmd,
					file_change_args: file_args,
					dir_create_cmd: dir_cmd,
					dir_create_args: dir_args,
					container_path: &plan.container_path,
				},
			);
			Some(AgentStream::open(self.client.as_ref(), container, argv).await?)
		};

		let downstream = if self.options.disable_download {
			None
		} else {
			let argv = downstream_argv(
				&self.agent_path,
				&DownstreamArgs {
					excludes: &plan.excludes,
					throttle: self.options.throttle,
					polling: self.options.polling,
					no_recursive_watch: !plan.recursive_watch,
					container_path: &plan.container_path,
				},
			);
			Some(AgentStream::open(self.client.as_ref(), container, argv).await?)
		};

		match downstream {
			Some(mut stream) => {
				spawn_drain(&handle, &mut stream);
				let (stdin, stdout, exit) = stream.into_parts();
				let engine = engine.clone();
				let h = handle.clone();
				spawn_direction(&handle, "downstream", pod_key.clone(), exit, async move {
					// the agent stops when its stdin closes
					let _stdin = stdin;
					engine.run_downstream(stdout, snapshot_tx, &h).await
				});
			}
			None => {
				snapshot_tx.send_replace(true);
				handle.notify(ConnectionEvent::DownloadInitialDone).await;
			}
		}

		match upstream {
			Some(mut stream) => {
				spawn_drain(&handle, &mut stream);
				let (stdin, stdout, exit) = stream.into_parts();
				let h = handle.clone();
				spawn_direction(&handle, "upstream", pod_key, exit, async move {
					engine.run_upstream(stdout, stdin, snapshot_rx, &h).await
				});
			}
			None => handle.notify(ConnectionEvent::UploadInitialDone).await,
		}

		info!(
			local = %plan.local_root.display(),
			container = %plan.container_path,
			"sync started on {target}"
		);
		Ok(())
	}
}

fn spawn_drain(handle: &ConnectionHandle, stream: &mut AgentStream) {
	let token = handle.token().clone();
	let drain = stream.stderr_drain();
	handle.spawn(async move {
		tokio::select! {
			_ = token.cancelled() => {}
			_ = drain => {}
		}
	});
}

/// Run one direction until it fails, then report why.
///
/// A stream that hits end of file while the agent exits cleanly completes
/// the session.
fn spawn_direction<F>(handle: &ConnectionHandle, label: &'static str, pod_key: String, exit: AgentExit, work: F)
where
	F: Future<Output = SyncResult<()>> + Send + 'static,
{
	let h = handle.clone();
	handle.spawn(async move {
		let token = h.token().clone();
		let error = tokio::select! {
			_ = token.cancelled() => return,
			result = work => match result {
				Ok(()) => return,
				Err(e) => e,
			},
		};

		let exit_status = tokio::select! {
			_ = token.cancelled() => return,
			status = tokio::time::timeout(EXIT_GRACE, exit.wait()) => status,
		};
		match (error, exit_status) {
			(SyncError::Eof, Ok(Ok(()))) => {
				info!("sync agent {label} exited");
				h.notify(ConnectionEvent::Done).await;
			}
			(_, Ok(Err(exited))) => {
				h.fail(SessionError::connection_lost(pod_key, format!("{label}: {exited}")))
					.await
			}
			(error, _) => {
				h.fail(SessionError::connection_lost(pod_key, format!("{label}: {error}")))
					.await
			}
		}
	});
}

#[cfg(test)]
mod tests {
	use super::*;
	use devloop_common_k8s::testing::{scripted_process, MockK8sClient, PodBuilder, RemoteProcess};
	use devloop_common_k8s::ExecStatus;
	use devloop_selector::SelectedContainer;
	use devloop_session::Connection;
	use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
	use tokio::sync::mpsc;

	const WAIT: Duration = Duration::from_secs(5);

	fn target() -> Target {
		let pod = PodBuilder::new("default", "web-1").container("app", "node").running().build();
		let container = pod.spec.as_ref().unwrap().containers[0].clone();
		Target::Container(SelectedContainer::new(Arc::new(pod), container))
	}

	fn agent_client() -> (Arc<MockK8sClient>, mpsc::UnboundedReceiver<(String, RemoteProcess)>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let client = Arc::new(MockK8sClient::new());
		client.on_exec(Arc::new(move |call| {
			let (process, remote) = scripted_process();
			let _ = tx.send((call.command[2].clone(), remote));
			Ok(process)
		}));
		(client, rx)
	}

	#[tokio::test]
	async fn test_plan_creates_missing_dir_and_reads_exclude_files() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir(dir.path().join("app")).unwrap();
		std::fs::write(dir.path().join("app/.syncignore"), "# deps\nnode_modules\n").unwrap();

		let options = SyncOptions {
			path: "./app:/srv/app".into(),
			exclude_paths: vec!["*.log".into()],
			exclude_file: Some(".syncignore".into()),
			..Default::default()
		};
		let plan = options.plan(dir.path()).await.unwrap();
		assert_eq!(plan.container_path, "/srv/app");
		assert_eq!(plan.excludes, vec!["*.log", "node_modules"]);
		assert!(plan.recursive_watch);

		let options = SyncOptions {
			path: "./missing:/srv".into(),
			..Default::default()
		};
		options.plan(dir.path()).await.unwrap();
		assert!(dir.path().join("missing").is_dir());
	}

	#[tokio::test]
	async fn test_plan_single_file_mode() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("app.conf"), "x").unwrap();

		let options = SyncOptions {
			path: "app.conf:/etc/app/app.conf".into(),
			exclude_paths: vec!["ignored".into()],
			..Default::default()
		};
		let plan = options.plan(dir.path()).await.unwrap();
		assert_eq!(plan.local_root, dir.path().to_path_buf());
		assert_eq!(plan.container_path, "/etc/app");
		assert_eq!(plan.excludes, vec!["**", "!/app.conf"]);
		assert!(!plan.recursive_watch);

		let mismatched = SyncOptions {
			path: "app.conf:/etc/app/other.conf".into(),
			..Default::default()
		};
		assert!(matches!(
			mismatched.plan(dir.path()).await,
			Err(SyncError::Config { .. })
		));

		let dir_as_file = SyncOptions {
			path: ".:/app".into(),
			file: true,
			..Default::default()
		};
		assert!(matches!(
			dir_as_file.plan(dir.path()).await,
			Err(SyncError::Config { .. })
		));
	}

	#[test]
	fn test_change_cmd_covers_files_and_dirs() {
		let specific = SyncOptions {
			file_change_cmd: Some("kill".into()),
			dir_create_cmd: Some("chown".into()),
			dir_create_args: vec!["node".into()],
			..Default::default()
		};
		let ((file_cmd, _), (dir_cmd, dir_args)) = specific.upload_commands();
		assert_eq!(file_cmd, Some("kill"));
		assert_eq!(dir_cmd, Some("chown"));
		assert_eq!(dir_args, ["node".to_string()]);

		let shared = SyncOptions {
			change_cmd: Some("touch".into()),
			change_args: vec!["/tmp/reload".into()],
			..specific
		};
		let ((file_cmd, file_args), (dir_cmd, dir_args)) = shared.upload_commands();
		assert_eq!((file_cmd, dir_cmd), (Some("touch"), Some("touch")));
		assert_eq!(file_args, dir_args);
	}

	#[tokio::test]
	async fn test_single_file_downstream_is_not_recursive() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("app.conf"), "x").unwrap();
		let client = Arc::new(MockK8sClient::new());
		client.on_exec(Arc::new(|_| Ok(scripted_process().0)));
		let session = SyncSession::new(
			SyncOptions {
				name: "conf".into(),
				path: "app.conf:/etc/app/app.conf".into(),
				disable_upload: true,
				..Default::default()
			},
			client.clone(),
		)
		.with_base_dir(dir.path());

		let (_connection, handle) = Connection::new(CancellationToken::new());
		session.connect(&target(), handle).await.unwrap();
		let calls = client.exec_calls();
		assert_eq!(calls.len(), 1);
		assert!(calls[0].command.contains(&"--recursive-watch=false".to_string()));
		assert_eq!(calls[0].command.last().map(String::as_str), Some("/etc/app"));
	}

	#[test]
	fn test_container_path_helpers() {
		assert_eq!(container_dir("/etc/app/app.conf"), "/etc/app");
		assert_eq!(container_dir("/app.conf"), "/");
		assert_eq!(container_dir("app.conf"), ".");
		assert_eq!(container_base("/etc/app/app.conf"), "app.conf");
	}

	async fn send_line(remote: &mut RemoteProcess, line: &str) {
		remote.stdout.write_all(line.as_bytes()).await.unwrap();
		remote.stdout.write_all(b"\n").await.unwrap();
	}

	#[tokio::test]
	async fn test_connect_runs_both_directions() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("index.js"), "local").unwrap();
		let (client, mut agents) = agent_client();

		let session = SyncSession::new(
			SyncOptions {
				name: "api".into(),
				path: ".:/app".into(),
				..Default::default()
			},
			client.clone(),
		)
		.with_base_dir(dir.path());

		let (mut connection, handle) = Connection::new(CancellationToken::new());
		session.connect(&target(), handle).await.unwrap();

		let (kind, mut upstream) = agents.recv().await.unwrap();
		assert_eq!(kind, "upstream");
		let (kind, mut downstream) = agents.recv().await.unwrap();
		assert_eq!(kind, "downstream");

		send_line(&mut downstream, r#"{"type":"batch_end"}"#).await;
		let event = tokio::time::timeout(WAIT, connection.next_event()).await.unwrap();
		assert!(matches!(event, Some(ConnectionEvent::DownloadInitialDone)));

		let mut lines = BufReader::new(&mut upstream.stdin).lines();
		let first = tokio::time::timeout(WAIT, lines.next_line()).await.unwrap().unwrap().unwrap();
		assert!(first.contains(r#""path":"index.js""#), "{first}");
		let end = lines.next_line().await.unwrap().unwrap();
		assert_eq!(end, r#"{"type":"batch_end"}"#);
		drop(lines);
		send_line(&mut upstream, r#"{"type":"ack"}"#).await;

		let event = tokio::time::timeout(WAIT, connection.next_event()).await.unwrap();
		assert!(matches!(event, Some(ConnectionEvent::UploadInitialDone)));

		downstream.stderr.write_all(b"watcher crashed\n").await.unwrap();
		downstream.exit(ExecStatus::failure(Some(2), "command terminated with exit code 2"));
		let event = tokio::time::timeout(WAIT, connection.next_event()).await.unwrap();
		let (pod, message) = match event {
			Some(ConnectionEvent::Error(SessionError::ConnectionLost { pod, message })) => (pod, message),
			other => panic!("expected connection lost, got {other:?}"),
		};
		assert_eq!(pod, "default/web-1");
		assert!(message.starts_with("downstream:"), "{message}");
		assert!(message.contains("watcher crashed"), "{message}");

		connection.stop().await;
		assert_eq!(connection.task_count(), 0);
		drop(upstream);
	}

	#[tokio::test]
	async fn test_disabled_directions_signal_immediately() {
		let dir = tempfile::tempdir().unwrap();
		let (client, _agents) = agent_client();
		let session = SyncSession::new(
			SyncOptions {
				name: "docs".into(),
				path: ".:/docs".into(),
				disable_upload: true,
				disable_download: true,
				..Default::default()
			},
			client.clone(),
		)
		.with_base_dir(dir.path());

		let (mut connection, handle) = Connection::new(CancellationToken::new());
		session.connect(&target(), handle).await.unwrap();
		assert_eq!(
			connection.wait_initial().await.unwrap(),
			devloop_session::BarrierOutcome::Ready
		);
		assert!(client.exec_calls().is_empty());
	}

	#[tokio::test]
	async fn test_clean_agent_exit_completes_session() {
		let dir = tempfile::tempdir().unwrap();
		let (client, mut agents) = agent_client();
		let session = SyncSession::new(
			SyncOptions {
				name: "api".into(),
				path: ".:/app".into(),
				disable_upload: true,
				..Default::default()
			},
			client,
		)
		.with_base_dir(dir.path());

		let (mut connection, handle) = Connection::new(CancellationToken::new());
		session.connect(&target(), handle).await.unwrap();
		assert!(matches!(
			connection.next_event().await,
			Some(ConnectionEvent::UploadInitialDone)
		));

		let (_, downstream) = agents.recv().await.unwrap();
		downstream.exit(ExecStatus::success());
		let event = tokio::time::timeout(WAIT, connection.next_event()).await.unwrap();
		assert!(matches!(event, Some(ConnectionEvent::Done)), "{event:?}");
	}

	#[test]
	fn test_config_payload() {
		let session = SyncSession::new(
			SyncOptions {
				name: "api".into(),
				path: "./src:/app".into(),
				..Default::default()
			},
			Arc::new(MockK8sClient::new()),
		);
		let config = session.config();
		assert_eq!(config["path"], "./src:/app");
		assert_eq!(config["waitInitialSync"], true);
		assert_eq!(config["compareBy"], "mtime");
	}
}
