// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Turns the loaded configuration into running sessions.

use std::sync::Arc;

use anyhow::{Context, Result};
use devloop_common_k8s::K8sClient;
use devloop_config::{ControllerConfig, DevloopConfig, ForwardEntry, SyncEntry, TargetSpec};
use devloop_hooks::{CommandHook, EventBus, TracingDispatcher};
use devloop_portforward::{ForwardOptions, PortArena, PortForwardSession, PortMapping};
use devloop_selector::{SelectOptions, Selector, TargetSelector, TerminalPicker, WaitingStrategy};
use devloop_session::{
	BackoffConfig, ControllerOptions, Session, SessionController, SessionHandle, Supervisor,
};
use devloop_sync::{
	CompareBy, ExecInjector, NoopInjector, SharedHelperInjector, SyncOptions, SyncSession,
};
use tracing::{info, instrument};

/// Starts every `[[forward]]` and `[[sync]]` entry under one supervisor.
pub struct DevRunner {
	config: DevloopConfig,
	client: Arc<dyn K8sClient>,
	selector: TargetSelector,
	hooks: EventBus,
	arena: PortArena,
	injector: SharedHelperInjector,
}

impl DevRunner {
	pub fn new(config: DevloopConfig, client: Arc<dyn K8sClient>) -> Self {
		let selector = TargetSelector::new(client.clone()).with_picker(Arc::new(TerminalPicker));
		let hooks = EventBus::new()
			.with_dispatcher(TracingDispatcher)
			.with_dispatcher(CommandHook::new(config.hooks.clone()));
		let injector: SharedHelperInjector = if config.agent.inject {
			Arc::new(
				ExecInjector::new(config.agent.binary_dir.clone()).with_remote_path(config.agent.path.clone()),
			)
		} else {
			Arc::new(NoopInjector)
		};
		Self {
			config,
			client,
			selector,
			hooks,
			arena: PortArena::new(),
			injector,
		}
	}

	pub fn arena(&self) -> &PortArena {
		&self.arena
	}

	/// Port forwards first, then syncs; each sync blocks on its initial sync
	/// when configured to. The first session that cannot start aborts.
	#[instrument(skip_all, fields(sync = self.config.sync.len(), forward = self.config.forward.len()))]
	pub async fn start(&self, supervisor: &Supervisor) -> Result<Vec<SessionHandle>> {
		let mut handles = Vec::new();

		for entry in &self.config.forward {
			let session = PortForwardSession::new(forward_options(entry)?, self.client.clone(), self.arena.clone());
			let handle = self
				.start_session(session, &entry.target, false, supervisor)
				.await
				.with_context(|| format!("failed to start port forwarding '{}'", entry.name))?;
			handles.push(handle);
		}

		for entry in &self.config.sync {
			let session = SyncSession::new(sync_options(entry)?, self.client.clone())
				.with_injector(self.injector.clone())
				.with_agent_path(self.config.agent.path.clone())
				.with_base_dir(self.config.paths.workspace_dir());
			let handle = self
				.start_session(session, &entry.target, true, supervisor)
				.await
				.with_context(|| format!("failed to start sync '{}'", entry.name))?;
			handles.push(handle);
		}

		info!(sessions = handles.len(), "all sessions started");
		Ok(handles)
	}

	async fn start_session<S: Session>(
		&self,
		session: S,
		target: &TargetSpec,
		skip_init_containers: bool,
		supervisor: &Supervisor,
	) -> Result<SessionHandle> {
		let controller = SessionController::new(
			Arc::new(session),
			self.selector.clone(),
			select_options(&self.config, target, skip_init_containers),
		)
		.with_hooks(self.hooks.clone())
		.with_options(controller_options(&self.config.controller));
		Ok(controller.start(supervisor).await?)
	}
}

pub fn select_options(config: &DevloopConfig, target: &TargetSpec, skip_init_containers: bool) -> SelectOptions {
	let mut selector = Selector {
		image_selector: target.image_selector.clone(),
		label_selector: target.label_selector.clone(),
		pod: target.pod.clone(),
		container_name: target.container.clone(),
		namespace: config.namespace_for(target.namespace.as_deref()).map(str::to_string),
		..Default::default()
	};
	if skip_init_containers {
		selector = selector.skip_init_containers();
	}

	let mut options = SelectOptions::new(selector)
		.timeout(config.selection.timeout)
		.poll_interval(config.selection.poll_interval)
		.with_strategy(WaitingStrategy::until_newest_running(config.selection.initial_delay));
	if target.pick {
		options = options.allow_pick(None);
	}
	options
}

pub fn controller_options(config: &ControllerConfig) -> ControllerOptions {
	ControllerOptions {
		barrier_timeout: config.barrier_timeout,
		backoff: BackoffConfig {
			base_delay: config.backoff,
			max_delay: config.max_backoff,
			factor: config.factor,
			jitter: config.jitter,
		},
	}
}

pub fn sync_options(entry: &SyncEntry) -> Result<SyncOptions> {
	let compare_by: CompareBy = entry
		.compare_by
		.parse()
		.with_context(|| format!("sync '{}'", entry.name))?;
	Ok(SyncOptions {
		name: entry.name.clone(),
		path: entry.path.clone(),
		exclude_paths: entry.exclude_paths.clone(),
		upload_exclude_paths: entry.upload_exclude_paths.clone(),
		download_exclude_paths: entry.download_exclude_paths.clone(),
		exclude_file: entry.exclude_file.clone(),
		upload_exclude_file: entry.upload_exclude_file.clone(),
		download_exclude_file: entry.download_exclude_file.clone(),
		compare_by,
		upload_limit: entry.upload_limit.filter(|l| *l > 0),
		download_limit: entry.download_limit.filter(|l| *l > 0),
		change_cmd: entry.change_cmd.clone(),
		change_args: entry.change_args.clone(),
		file_change_cmd: entry.file_change_cmd.clone(),
		file_change_args: entry.file_change_args.clone(),
		dir_create_cmd: entry.dir_create_cmd.clone(),
		dir_create_args: entry.dir_create_args.clone(),
		restart_container: entry.restart_container,
		batch_cmd: entry.batch_cmd.clone(),
		batch_args: entry.batch_args.clone(),
		wait_initial_sync: entry.wait_initial_sync,
		disable_upload: entry.disable_upload,
		disable_download: entry.disable_download,
		polling: entry.polling,
		throttle: entry.throttle,
		file: entry.file,
		..Default::default()
	})
}

pub fn forward_options(entry: &ForwardEntry) -> Result<ForwardOptions> {
	let ports = entry
		.ports
		.iter()
		.map(|p| p.parse::<PortMapping>())
		.collect::<Result<Vec<_>, _>>()
		.with_context(|| format!("port forwarding '{}'", entry.name))?;
	Ok(ForwardOptions::new(entry.name.clone(), ports))
}
