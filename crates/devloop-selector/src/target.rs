// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Poll the cluster until exactly one pod or container is chosen.

use std::sync::Arc;
use std::time::Duration;

use devloop_common_k8s::pod_status::is_pod_terminating;
use devloop_common_k8s::{K8sClient, Pod};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::criteria::Selector;
use crate::error::{SelectorError, SelectorResult};
use crate::filter::{sort_containers_by_newest, ContainerFilter, SelectedContainer};
use crate::picker::{Picker, DEFAULT_CONTAINER_QUESTION, DEFAULT_POD_QUESTION};
use crate::strategy::WaitingStrategy;

pub const DEFAULT_SELECT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Options for a single selection.
#[derive(Debug)]
pub struct SelectOptions {
	pub selector: Selector,
	pub allow_pick: bool,
	pub question: Option<String>,
	pub wait: bool,
	pub timeout: Duration,
	pub poll_interval: Duration,
	pub fail_if_multiple: bool,
	pub waiting_strategy: Option<WaitingStrategy>,
}

impl SelectOptions {
	pub fn new(selector: Selector) -> Self {
		Self {
			selector,
			allow_pick: false,
			question: None,
			wait: true,
			timeout: DEFAULT_SELECT_TIMEOUT,
			poll_interval: DEFAULT_POLL_INTERVAL,
			fail_if_multiple: false,
			waiting_strategy: None,
		}
	}

	pub fn with_strategy(mut self, strategy: WaitingStrategy) -> Self {
		self.waiting_strategy = Some(strategy);
		self
	}

	pub fn allow_pick(mut self, question: Option<String>) -> Self {
		self.allow_pick = true;
		self.question = question;
		self
	}

	pub fn fail_if_multiple(mut self) -> Self {
		self.fail_if_multiple = true;
		self
	}

	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = interval;
		self
	}

	pub fn no_wait(mut self) -> Self {
		self.wait = false;
		self
	}

	/// Replace the waiting strategy with a fresh copy of itself.
	pub fn reset_strategy(&mut self) {
		if let Some(strategy) = self.waiting_strategy.as_ref() {
			self.waiting_strategy = Some(strategy.reset());
		}
	}
}

/// Chooses a single target pod or container for a session.
#[derive(Clone)]
pub struct TargetSelector {
	client: Arc<dyn K8sClient>,
	picker: Option<Arc<dyn Picker>>,
}

impl TargetSelector {
	pub fn new(client: Arc<dyn K8sClient>) -> Self {
		Self {
			client,
			picker: None,
		}
	}

	pub fn with_picker(mut self, picker: Arc<dyn Picker>) -> Self {
		self.picker = Some(picker);
		self
	}

	pub fn client(&self) -> &Arc<dyn K8sClient> {
		&self.client
	}

	#[instrument(skip_all, fields(selector = %options.selector))]
	pub async fn select_single_container(
		&self,
		options: &mut SelectOptions,
		cancel: &CancellationToken,
	) -> SelectorResult<SelectedContainer> {
		let mut poller = Poller::start(options);
		loop {
			poller.check_cancelled(cancel)?;
			if let Some(found) = self.try_select_container(options).await? {
				return Ok(found);
			}
			poller.wait_next(cancel).await?;
		}
	}

	#[instrument(skip_all, fields(selector = %options.selector))]
	pub async fn select_single_pod(
		&self,
		options: &mut SelectOptions,
		cancel: &CancellationToken,
	) -> SelectorResult<Arc<Pod>> {
		let mut poller = Poller::start(options);
		loop {
			poller.check_cancelled(cancel)?;
			if let Some(found) = self.try_select_pod(options).await? {
				return Ok(found);
			}
			poller.wait_next(cancel).await?;
		}
	}

	async fn try_select_container(
		&self,
		options: &mut SelectOptions,
	) -> SelectorResult<Option<SelectedContainer>> {
		let filter = ContainerFilter::with_sort(Arc::clone(&self.client), sort_containers_by_newest);
		let mut containers = filter
			.select_containers(std::slice::from_ref(&options.selector))
			.await?;

		if let Some(strategy) = options.waiting_strategy.as_mut() {
			let namespace = options.selector.resolve_namespace(self.client.default_namespace());
			return strategy
				.select_container(self.client.as_ref(), namespace, &containers)
				.await;
		}

		containers.retain(|c| !is_pod_terminating(&c.pod));
		match containers.len() {
			0 => Ok(None),
			1 => Ok(containers.pop()),
			_ => {
				let labels: Vec<String> = containers.iter().map(ToString::to_string).collect();
				let question = options.question.as_deref().unwrap_or(DEFAULT_CONTAINER_QUESTION);
				match self.resolve_multiple(options, "containers", question, labels).await? {
					Some(index) => Ok(containers.into_iter().nth(index)),
					None => Ok(None),
				}
			}
		}
	}

	async fn try_select_pod(&self, options: &mut SelectOptions) -> SelectorResult<Option<Arc<Pod>>> {
		let filter = ContainerFilter::with_sort(Arc::clone(&self.client), sort_containers_by_newest);
		let mut pods = filter
			.select_pods(std::slice::from_ref(&options.selector))
			.await?;

		if let Some(strategy) = options.waiting_strategy.as_mut() {
			let namespace = options.selector.resolve_namespace(self.client.default_namespace());
			return strategy.select_pod(self.client.as_ref(), namespace, &pods).await;
		}

		pods.retain(|p| !is_pod_terminating(p));
		match pods.len() {
			0 => Ok(None),
			1 => Ok(pods.into_iter().next()),
			_ => {
				let labels: Vec<String> = pods
					.iter()
					.map(|p| p.metadata.name.clone().unwrap_or_default())
					.collect();
				let question = options.question.as_deref().unwrap_or(DEFAULT_POD_QUESTION);
				match self.resolve_multiple(options, "pods", question, labels).await? {
					Some(index) => Ok(pods.into_iter().nth(index)),
					None => Ok(None),
				}
			}
		}
	}

	/// Choose among several candidates: ask, refuse, or take the first.
	async fn resolve_multiple(
		&self,
		options: &SelectOptions,
		kind: &'static str,
		question: &str,
		labels: Vec<String>,
	) -> SelectorResult<Option<usize>> {
		if options.allow_pick {
			if let Some(picker) = self.picker.clone() {
				let question = question.to_string();
				let count = labels.len();
				let index = tokio::task::spawn_blocking(move || picker.pick(&question, &labels))
					.await
					.map_err(|e| SelectorError::Pick {
						message: e.to_string(),
					})??;
				return Ok((index < count).then_some(index));
			}
			debug!("interactive pick requested but no picker configured");
		}

		if options.fail_if_multiple {
			return Err(SelectorError::Ambiguous {
				kind,
				selector: options.selector.to_string(),
			});
		}
		Ok(Some(0))
	}
}

/// Immediate first attempt, then one attempt per interval until the deadline.
struct Poller {
	wait: bool,
	deadline: Instant,
	interval: Duration,
	selector: String,
}

impl Poller {
	fn start(options: &SelectOptions) -> Self {
		Self {
			wait: options.wait,
			deadline: Instant::now() + options.timeout,
			interval: options.poll_interval,
			selector: options.selector.to_string(),
		}
	}

	fn check_cancelled(&self, cancel: &CancellationToken) -> SelectorResult<()> {
		if cancel.is_cancelled() {
			return Err(SelectorError::Cancelled);
		}
		Ok(())
	}

	/// Sleep until the next attempt, or fail when no attempt is left.
	async fn wait_next(&mut self, cancel: &CancellationToken) -> SelectorResult<()> {
		if !self.wait {
			return Err(SelectorError::NotFound {
				selector: std::mem::take(&mut self.selector),
			});
		}

		let now = Instant::now();
		if now >= self.deadline {
			return Err(SelectorError::Timeout {
				selector: std::mem::take(&mut self.selector),
			});
		}
		let next = (now + self.interval).min(self.deadline);
		tokio::select! {
			_ = cancel.cancelled() => Err(SelectorError::Cancelled),
			_ = tokio::time::sleep_until(next) => Ok(()),
		}
	}
}
