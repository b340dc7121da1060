// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The session controller keeps one [`Session`] pinned to the current
//! correct target.
//!
//! `start` establishes the first connection synchronously so selection and
//! initial-sync failures reach the caller. After that a supervisory task
//! watches the connection and re-establishes it from scratch whenever a
//! transport fails, until the session is cancelled or reports completion.

use std::sync::Arc;
use std::time::Duration;

use devloop_hooks::{EventBus, Feature, LifecycleEvent, Phase};
use devloop_selector::{SelectOptions, TargetSelector};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::connection::{BarrierOutcome, Connection, ConnectionEvent};
use crate::diagnostics::{describe, previous_pod_condition};
use crate::error::{SessionError, SessionResult};
use crate::session::{Session, Target, TargetKind};
use crate::state::{SessionState, StateTracker};
use crate::supervisor::Supervisor;

pub const DEFAULT_BARRIER_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ControllerOptions {
	/// Upper bound for the initial-sync barrier.
	pub barrier_timeout: Duration,
	pub backoff: BackoffConfig,
}

impl Default for ControllerOptions {
	fn default() -> Self {
		Self {
			barrier_timeout: DEFAULT_BARRIER_TIMEOUT,
			backoff: BackoffConfig::default(),
		}
	}
}

struct Established {
	target: Target,
	connection: Connection,
	done: bool,
}

enum Outcome {
	Cancelled,
	Done,
	Failed(SessionError),
}

/// Returned by [`SessionController::start`] to observe and stop the session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
	name: String,
	state: StateTracker,
	cancel: CancellationToken,
}

impl SessionHandle {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn state(&self) -> SessionState {
		self.state.current()
	}

	pub fn tracker(&self) -> &StateTracker {
		&self.state
	}

	/// Cancel this session only.
	pub fn stop(&self) {
		self.cancel.cancel();
	}

	pub async fn wait_finished(&self) -> SessionState {
		self.state.wait_for(|s| s.is_terminal()).await
	}
}

pub struct SessionController<S: Session> {
	session: Arc<S>,
	selector: TargetSelector,
	select_options: SelectOptions,
	hooks: EventBus,
	options: ControllerOptions,
	state: StateTracker,
}

impl<S: Session> SessionController<S> {
	pub fn new(session: Arc<S>, selector: TargetSelector, select_options: SelectOptions) -> Self {
		Self {
			session,
			selector,
			select_options,
			hooks: EventBus::new(),
			options: ControllerOptions::default(),
			state: StateTracker::new(),
		}
	}

	pub fn with_hooks(mut self, hooks: EventBus) -> Self {
		self.hooks = hooks;
		self
	}

	pub fn with_options(mut self, options: ControllerOptions) -> Self {
		self.options = options;
		self
	}

	pub fn state(&self) -> StateTracker {
		self.state.clone()
	}

	fn event(&self, phase: Phase, feature: Feature) -> LifecycleEvent {
		LifecycleEvent::new(phase, feature)
			.named(self.session.name())
			.with_config(self.session.config())
	}

	/// Establish the session and hand it to the supervisor.
	#[instrument(skip_all, fields(session = %self.session.name(), feature = %self.session.feature()))]
	pub async fn start(mut self, supervisor: &Supervisor) -> SessionResult<SessionHandle> {
		let feature = self.session.feature();
		let cancel = supervisor.child_token();

		self.hooks.fire(&self.event(Phase::Start, feature)).await?;

		let established = match self.establish(&cancel).await {
			Ok(established) => established,
			Err(e) => {
				if e.is_cancelled() {
					self.state.set(SessionState::Stopped);
					return Err(e);
				}
				self.state.set(SessionState::Error);
				self
					.hooks
					.fire(&self.event(Phase::Error, feature).with_error(&e))
					.await?;
				return Err(e);
			}
		};

		let handle = SessionHandle {
			name: self.session.name().to_string(),
			state: self.state.clone(),
			cancel: cancel.clone(),
		};
		supervisor.spawn(self.supervise(established, cancel));
		Ok(handle)
	}

	async fn establish(&mut self, cancel: &CancellationToken) -> SessionResult<Established> {
		let barrier = self.session.requires_barrier();
		if barrier {
			self
				.hooks
				.fire(&self.event(Phase::Before, Feature::InitialSync))
				.await?;
		}

		let (target, mut connection) = match self.open(cancel).await {
			Ok(opened) => opened,
			Err(e) => {
				if barrier && !e.is_cancelled() {
					self
						.hooks
						.fire_logged(&self.event(Phase::Error, Feature::InitialSync).with_error(&e))
						.await;
				}
				return Err(e);
			}
		};

		let mut done = false;
		if barrier {
			self.state.set(SessionState::InitialBarrier);
			match self.initial_barrier(&mut connection, cancel).await {
				Ok(outcome) => done = outcome == BarrierOutcome::Done,
				Err(e) => {
					connection.stop().await;
					return Err(e);
				}
			}
		}

		if !done {
			self.state.set(SessionState::Active);
			info!(target = %target, "session started");
		}
		Ok(Established {
			target,
			connection,
			done,
		})
	}

	/// Select the target, prepare it and connect the transports.
	async fn open(&mut self, cancel: &CancellationToken) -> SessionResult<(Target, Connection)> {
		self.state.set(SessionState::Selecting);
		let target = match self.session.target_kind() {
			TargetKind::Container => Target::Container(
				self
					.selector
					.select_single_container(&mut self.select_options, cancel)
					.await?,
			),
			TargetKind::Pod => Target::Pod(
				self
					.selector
					.select_single_pod(&mut self.select_options, cancel)
					.await?,
			),
		};
		info!(target = %target, "selected target");

		self.state.set(SessionState::Injecting);
		self.session.prepare(&target, cancel).await?;

		self.state.set(SessionState::Streaming);
		let (mut connection, handle) = Connection::new(cancel.child_token());
		if let Err(e) = self.session.connect(&target, handle).await {
			connection.stop().await;
			return Err(e);
		}
		Ok((target, connection))
	}

	async fn initial_barrier(
		&self,
		connection: &mut Connection,
		cancel: &CancellationToken,
	) -> SessionResult<BarrierOutcome> {
		info!("waiting for initial sync to complete");

		let timeout = self.options.barrier_timeout;
		let result = tokio::select! {
			_ = cancel.cancelled() => Err(SessionError::Cancelled),
			waited = tokio::time::timeout(timeout, connection.wait_initial()) => match waited {
				Ok(result) => result,
				Err(_) => Err(SessionError::InitialSync {
					message: format!("timed out after {}s", timeout.as_secs()),
				}),
			},
		};

		match result {
			Ok(outcome) => {
				self
					.hooks
					.fire(&self.event(Phase::After, Feature::InitialSync))
					.await?;
				Ok(outcome)
			}
			Err(e) if e.is_cancelled() => Err(e),
			Err(e) => {
				let e = match e {
					SessionError::InitialSync { .. } => e,
					other => SessionError::InitialSync {
						message: other.to_string(),
					},
				};
				self
					.hooks
					.fire_logged(&self.event(Phase::Error, Feature::InitialSync).with_error(&e))
					.await;
				Err(e)
			}
		}
	}

	#[instrument(skip_all, fields(session = %self.session.name()))]
	async fn supervise(mut self, mut current: Established, cancel: CancellationToken) {
		loop {
			let outcome = if current.done {
				Outcome::Done
			} else {
				watch(&mut current.connection, &current.target, &cancel).await
			};

			match outcome {
				Outcome::Cancelled => {
					current.connection.stop().await;
					self.finish(SessionState::Stopped).await;
					return;
				}
				Outcome::Done => {
					current.connection.stop().await;
					self.finish(SessionState::Done).await;
					return;
				}
				Outcome::Failed(e) => {
					current.connection.stop().await;
					self.state.set(SessionState::Error);
					warn!(error = %e, target = %current.target, "session failed");
					match self.restart(&current.target, &e, &cancel).await {
						Some(next) => current = next,
						None => {
							self.finish(SessionState::Stopped).await;
							return;
						}
					}
				}
			}
		}
	}

	/// Re-establish until it works or the session is cancelled.
	async fn restart(
		&mut self,
		previous: &Target,
		cause: &SessionError,
		cancel: &CancellationToken,
	) -> Option<Established> {
		let feature = self.session.feature();
		let condition = previous_pod_condition(self.selector.client().as_ref(), previous.pod()).await;
		warn!("{}", describe(previous.pod_name(), &condition));
		self
			.hooks
			.fire_logged(&self.event(Phase::Restart, feature).with_error(cause))
			.await;

		let mut backoff = Backoff::new(self.options.backoff.clone());
		loop {
			if cancel.is_cancelled() {
				return None;
			}
			self.state.set(SessionState::Restarting);
			info!("restarting session");
			self.select_options.reset_strategy();

			match self.establish(cancel).await {
				Ok(next) => return Some(next),
				Err(e) if e.is_cancelled() || cancel.is_cancelled() => return None,
				Err(e) => {
					self.state.set(SessionState::Error);
					self
						.hooks
						.fire_logged(&self.event(Phase::Restart, feature).with_error(&e))
						.await;
					let delay = backoff.next_delay();
					error!(
						error = %e,
						retry_in_secs = delay.as_secs(),
						"error restarting session"
					);
					tokio::select! {
						_ = cancel.cancelled() => return None,
						_ = tokio::time::sleep(delay) => {}
					}
				}
			}
		}
	}

	async fn finish(&self, state: SessionState) {
		self
			.hooks
			.fire_logged(&self.event(Phase::Stop, self.session.feature()))
			.await;
		self.state.set(state);
		info!(state = %state, "session finished");
	}
}

async fn watch(connection: &mut Connection, target: &Target, cancel: &CancellationToken) -> Outcome {
	loop {
		let event = tokio::select! {
			_ = cancel.cancelled() => return Outcome::Cancelled,
			event = connection.next_event() => event,
		};
		match event {
			Some(ConnectionEvent::Done) => return Outcome::Done,
			Some(ConnectionEvent::Error(e)) => return Outcome::Failed(e),
			Some(ConnectionEvent::UploadInitialDone | ConnectionEvent::DownloadInitialDone) => {}
			None => {
				return Outcome::Failed(SessionError::connection_lost(
					target.pod_name(),
					"all transports exited",
				))
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::connection::ConnectionHandle;
	use async_trait::async_trait;
	use devloop_common_k8s::testing::{MockK8sClient, PodBuilder};
	use devloop_hooks::testing::{FailingDispatcher, RecordingDispatcher};
	use devloop_selector::Selector;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Mutex;

	struct ScriptedSession {
		barrier: bool,
		send_upload: bool,
		connects: AtomicUsize,
		failures: AtomicUsize,
		handles: Mutex<Vec<ConnectionHandle>>,
	}

	impl ScriptedSession {
		fn new(barrier: bool) -> Arc<Self> {
			Self::scripted(barrier, true)
		}

		fn scripted(barrier: bool, send_upload: bool) -> Arc<Self> {
			Arc::new(Self {
				barrier,
				send_upload,
				connects: AtomicUsize::new(0),
				failures: AtomicUsize::new(0),
				handles: Mutex::new(Vec::new()),
			})
		}

		fn connects(&self) -> usize {
			self.connects.load(Ordering::SeqCst)
		}

		fn handle(&self, index: usize) -> ConnectionHandle {
			self.handles.lock().unwrap()[index].clone()
		}
	}

	#[async_trait]
	impl Session for ScriptedSession {
		fn feature(&self) -> Feature {
			Feature::Sync
		}

		fn name(&self) -> &str {
			"api"
		}

		fn requires_barrier(&self) -> bool {
			self.barrier
		}

		async fn connect(&self, _target: &Target, handle: ConnectionHandle) -> SessionResult<()> {
			self.connects.fetch_add(1, Ordering::SeqCst);
			let failing = self
				.failures
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
				.is_ok();
			if failing {
				return Err(SessionError::connect("start sync", "exec failed"));
			}
			if self.send_upload {
				handle.notify(ConnectionEvent::UploadInitialDone).await;
			}
			handle.notify(ConnectionEvent::DownloadInitialDone).await;
			self.handles.lock().unwrap().push(handle);
			Ok(())
		}
	}

	fn client_with_pod() -> Arc<MockK8sClient> {
		let client = Arc::new(MockK8sClient::new());
		client.insert_pod(
			PodBuilder::new("default", "web-1")
				.label("app", "web")
				.container("app", "nginx")
				.running()
				.build(),
		);
		client
	}

	fn controller(
		session: Arc<ScriptedSession>,
		client: Arc<MockK8sClient>,
		hooks: &RecordingDispatcher,
	) -> SessionController<ScriptedSession> {
		SessionController::new(
			session,
			TargetSelector::new(client),
			SelectOptions::new(Selector::by_label("app=web")),
		)
		.with_hooks(EventBus::new().with_shared(hooks.shared()))
		.with_options(ControllerOptions {
			barrier_timeout: Duration::from_secs(5),
			backoff: BackoffConfig::default(),
		})
	}

	async fn wait_connects(session: &ScriptedSession, count: usize) {
		while session.connects() < count {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_missing_initial_upload_fails_start() {
		let session = ScriptedSession::scripted(true, false);
		let hooks = RecordingDispatcher::new();
		let controller = controller(session, client_with_pod(), &hooks);
		let state = controller.state();
		let supervisor = Supervisor::new();

		let err = controller.start(&supervisor).await.unwrap_err();
		assert!(matches!(err, SessionError::InitialSync { .. }));
		assert!(!state.history().contains(&SessionState::Active));
		assert_eq!(
			hooks.names(),
			vec!["start:sync", "before:initialSync", "error:initialSync", "error:sync"]
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_downstream_error_restarts_session() {
		let session = ScriptedSession::new(true);
		let hooks = RecordingDispatcher::new();
		let controller = controller(Arc::clone(&session), client_with_pod(), &hooks);
		let supervisor = Supervisor::new();

		let handle = controller.start(&supervisor).await.unwrap();
		assert_eq!(handle.state(), SessionState::Active);

		let first = session.handle(0);
		first
			.fail(SessionError::connection_lost("web-1", "downstream: unexpected EOF"))
			.await;

		wait_connects(&session, 2).await;
		assert_eq!(
			handle.tracker().wait_for(|s| s == SessionState::Active).await,
			SessionState::Active
		);
		assert!(first.is_cancelled(), "old transports are torn down");
		assert!(!supervisor.is_cancelled());
		assert_eq!(hooks.count("start:sync"), 1);
		assert_eq!(hooks.count("restart:sync"), 1);

		let history = handle.tracker().history();
		let first_active = history.iter().position(|s| *s == SessionState::Active).unwrap();
		assert_eq!(
			&history[first_active..first_active + 4],
			&[
				SessionState::Active,
				SessionState::Error,
				SessionState::Restarting,
				SessionState::Selecting
			]
		);

		supervisor.shutdown().await;
		assert_eq!(handle.state(), SessionState::Stopped);
		assert_eq!(hooks.count("stop:sync"), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_failed_restart_backs_off() {
		let session = ScriptedSession::new(false);
		let hooks = RecordingDispatcher::new();
		let controller = controller(Arc::clone(&session), client_with_pod(), &hooks);
		let supervisor = Supervisor::new();
		let handle = controller.start(&supervisor).await.unwrap();

		session.failures.store(1, Ordering::SeqCst);
		let started = tokio::time::Instant::now();
		session
			.handle(0)
			.fail(SessionError::connection_lost("web-1", "eof"))
			.await;

		wait_connects(&session, 3).await;
		handle.tracker().wait_for(|s| s == SessionState::Active).await;
		assert!(started.elapsed() >= Duration::from_secs(15));
		assert_eq!(hooks.count("restart:sync"), 2);
		supervisor.shutdown().await;
	}

	#[tokio::test]
	async fn test_start_hook_failure_aborts() {
		let session = ScriptedSession::new(false);
		let controller = SessionController::new(
			Arc::clone(&session),
			TargetSelector::new(client_with_pod()),
			SelectOptions::new(Selector::by_label("app=web")),
		)
		.with_hooks(EventBus::new().with_dispatcher(FailingDispatcher::new("start:sync")));

		let err = controller.start(&Supervisor::new()).await.unwrap_err();
		assert!(matches!(err, SessionError::Hook(_)));
		assert_eq!(session.connects(), 0);
	}

	#[tokio::test]
	async fn test_selection_failure_is_returned() {
		let session = ScriptedSession::new(false);
		let hooks = RecordingDispatcher::new();
		let controller = SessionController::new(
			Arc::clone(&session),
			TargetSelector::new(Arc::new(MockK8sClient::new())),
			SelectOptions::new(Selector::by_label("app=web")).no_wait(),
		)
		.with_hooks(EventBus::new().with_shared(hooks.shared()));

		let err = controller.start(&Supervisor::new()).await.unwrap_err();
		assert!(matches!(err, SessionError::Selection(_)));
		assert_eq!(hooks.names(), vec!["start:sync", "error:sync"]);
	}

	#[tokio::test]
	async fn test_initial_sync_hooks_wrap_selection() {
		let session = ScriptedSession::new(true);
		let hooks = RecordingDispatcher::new();
		let controller = SessionController::new(
			Arc::clone(&session),
			TargetSelector::new(Arc::new(MockK8sClient::new())),
			SelectOptions::new(Selector::by_label("app=web")).no_wait(),
		)
		.with_hooks(EventBus::new().with_shared(hooks.shared()));

		let err = controller.start(&Supervisor::new()).await.unwrap_err();
		assert!(matches!(err, SessionError::Selection(_)));
		assert_eq!(
			hooks.names(),
			vec!["start:sync", "before:initialSync", "error:initialSync", "error:sync"]
		);
		assert_eq!(session.connects(), 0);
	}

	#[tokio::test]
	async fn test_cancelled_start_skips_error_hook() {
		let session = ScriptedSession::new(false);
		let hooks = RecordingDispatcher::new();
		let controller = controller(Arc::clone(&session), client_with_pod(), &hooks);
		let state = controller.state();
		let supervisor = Supervisor::new();
		supervisor.shutdown().await;

		let err = controller.start(&supervisor).await.unwrap_err();
		assert!(err.is_cancelled());
		assert_eq!(state.current(), SessionState::Stopped);
		assert_eq!(hooks.names(), vec!["start:sync"]);
	}

	#[tokio::test]
	async fn test_stop_one_session_keeps_supervisor() {
		let session = ScriptedSession::new(false);
		let hooks = RecordingDispatcher::new();
		let controller = controller(Arc::clone(&session), client_with_pod(), &hooks);
		let supervisor = Supervisor::new();
		let handle = controller.start(&supervisor).await.unwrap();

		handle.stop();
		assert_eq!(handle.wait_finished().await, SessionState::Stopped);
		assert!(!supervisor.is_cancelled());
		assert_eq!(hooks.count("stop:sync"), 1);
	}

	#[tokio::test]
	async fn test_done_event_finishes_session() {
		let session = ScriptedSession::new(false);
		let hooks = RecordingDispatcher::new();
		let controller = controller(Arc::clone(&session), client_with_pod(), &hooks);
		let handle = controller.start(&Supervisor::new()).await.unwrap();

		session.handle(0).notify(ConnectionEvent::Done).await;
		assert_eq!(handle.wait_finished().await, SessionState::Done);
		assert_eq!(session.connects(), 1);
	}
}
