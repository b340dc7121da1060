// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Waiting strategies decide whether a candidate set is ready to be used.

use std::sync::Arc;
use std::time::Duration;

use devloop_common_k8s::pod_status::{
	has_container_statuses, has_waiting_container, is_container_running, is_critical_status,
	is_init_container_running, is_pod_terminating, pod_status, STATUS_RUNNING,
};
use devloop_common_k8s::{K8sClient, Pod};
use tokio::time::Instant;

use crate::error::{SelectorError, SelectorResult};
use crate::filter::{
	sort_containers_by_newest, sort_pods_by_newest, SelectedContainer, MATCHED_CONTAINER_ANNOTATION,
};
use crate::printer::PodInfoPrinter;

/// The readiness rule a [`WaitingStrategy`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
	/// Wait until the newest candidate runs; fail on a critical status.
	UntilNewestRunning,
	/// Take the newest candidate that is not being deleted.
	UntilNotTerminating,
	/// Wait until no container of the newest candidate reports `waiting`.
	UntilNotWaiting,
	/// Wait until the annotated init container of the newest candidate runs.
	UntilInitContainerRunning,
}

/// Stateful readiness check used by the target selector.
///
/// Selection never succeeds before the initial delay has elapsed, which
/// absorbs the propagation lag of a rollout that was just applied.
#[derive(Debug)]
pub struct WaitingStrategy {
	policy: WaitPolicy,
	delay: Duration,
	initial_delay: Instant,
	printer: PodInfoPrinter,
}

impl WaitingStrategy {
	pub fn new(policy: WaitPolicy, delay: Duration) -> Self {
		let initial_delay = Instant::now() + delay;
		Self {
			policy,
			delay,
			initial_delay,
			printer: PodInfoPrinter::new(initial_delay),
		}
	}

	pub fn until_newest_running(delay: Duration) -> Self {
		Self::new(WaitPolicy::UntilNewestRunning, delay)
	}

	pub fn until_not_terminating(delay: Duration) -> Self {
		Self::new(WaitPolicy::UntilNotTerminating, delay)
	}

	pub fn until_not_waiting(delay: Duration) -> Self {
		Self::new(WaitPolicy::UntilNotWaiting, delay)
	}

	pub fn until_init_container_running(delay: Duration) -> Self {
		Self::new(WaitPolicy::UntilInitContainerRunning, delay)
	}

	/// A fresh instance with the original delay applied from now.
	pub fn reset(&self) -> Self {
		Self::new(self.policy, self.delay)
	}

	pub fn policy(&self) -> WaitPolicy {
		self.policy
	}

	fn before_initial_delay(&self) -> bool {
		Instant::now() < self.initial_delay
	}

	/// Pick a container, `Ok(None)` to keep waiting.
	pub async fn select_container(
		&mut self,
		client: &dyn K8sClient,
		namespace: &str,
		candidates: &[SelectedContainer],
	) -> SelectorResult<Option<SelectedContainer>> {
		if self.before_initial_delay() {
			return Ok(None);
		}

		let mut eligible: Vec<&SelectedContainer> = candidates
			.iter()
			.filter(|c| !is_pod_terminating(&c.pod))
			.collect();
		if eligible.is_empty() {
			self.printer.print_not_found_warning(client, namespace).await;
			return Ok(None);
		}
		eligible.sort_by(|a, b| sort_containers_by_newest(a, b));
		let newest = eligible[0];

		match self.policy {
			WaitPolicy::UntilNewestRunning => {
				self.fail_on_critical(&newest.pod)?;
				if is_container_running(&newest.pod, &newest.container.name) {
					return Ok(Some(newest.clone()));
				}
			}
			WaitPolicy::UntilNotTerminating => return Ok(Some(newest.clone())),
			WaitPolicy::UntilNotWaiting => {
				if has_container_statuses(&newest.pod) && !has_waiting_container(&newest.pod) {
					return Ok(Some(newest.clone()));
				}
			}
			WaitPolicy::UntilInitContainerRunning => {
				let target = annotated_container(&newest.pod).unwrap_or(newest.container.name.as_str());
				if is_init_container_running(&newest.pod, target) {
					let same_pod = eligible
						.iter()
						.find(|c| Arc::ptr_eq(&c.pod, &newest.pod) && c.container.name == target);
					return Ok(Some((*same_pod.unwrap_or(&newest)).clone()));
				}
			}
		}

		self.printer.print_pod_info(client, &newest.pod).await;
		Ok(None)
	}

	/// Pick a pod, `Ok(None)` to keep waiting.
	pub async fn select_pod(
		&mut self,
		client: &dyn K8sClient,
		namespace: &str,
		candidates: &[Arc<Pod>],
	) -> SelectorResult<Option<Arc<Pod>>> {
		if self.before_initial_delay() {
			return Ok(None);
		}

		let mut eligible: Vec<&Arc<Pod>> = candidates
			.iter()
			.filter(|p| !is_pod_terminating(p))
			.collect();
		if eligible.is_empty() {
			self.printer.print_not_found_warning(client, namespace).await;
			return Ok(None);
		}
		eligible.sort_by(|a, b| sort_pods_by_newest(a, b));
		let newest = eligible[0];

		let ready = match self.policy {
			WaitPolicy::UntilNewestRunning => {
				self.fail_on_critical(newest)?;
				pod_status(newest) == STATUS_RUNNING
			}
			WaitPolicy::UntilNotTerminating => true,
			WaitPolicy::UntilNotWaiting => {
				has_container_statuses(newest) && !has_waiting_container(newest)
			}
			WaitPolicy::UntilInitContainerRunning => match annotated_container(newest) {
				Some(target) => is_init_container_running(newest, target),
				None => newest
					.status
					.iter()
					.flat_map(|s| s.init_container_statuses.iter().flatten())
					.any(|s| s.state.as_ref().and_then(|st| st.running.as_ref()).is_some()),
			},
		};

		if ready {
			return Ok(Some(Arc::clone(newest)));
		}
		self.printer.print_pod_info(client, newest).await;
		Ok(None)
	}

	fn fail_on_critical(&mut self, pod: &Pod) -> SelectorResult<()> {
		let status = pod_status(pod);
		if is_critical_status(&status) {
			self.printer.print_pod_warning(pod);
			return Err(SelectorError::Fatal {
				pod: pod.metadata.name.clone().unwrap_or_default(),
				status,
			});
		}
		Ok(())
	}
}

/// First container named by the matched-container annotation.
fn annotated_container(pod: &Pod) -> Option<&str> {
	pod.metadata
		.annotations
		.as_ref()?
		.get(MATCHED_CONTAINER_ANNOTATION)?
		.split(';')
		.map(str::trim)
		.find(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Duration as ChronoDuration, Utc};
	use devloop_common_k8s::testing::{MockK8sClient, PodBuilder};
	use devloop_common_k8s::Container;

	fn selected(pod: Pod, container: &str) -> SelectedContainer {
		SelectedContainer::new(
			Arc::new(pod),
			Container {
				name: container.into(),
				..Default::default()
			},
		)
	}

	fn aged(name: &str, age_secs: i64) -> PodBuilder {
		PodBuilder::new("default", name)
			.created_at(Utc::now() - ChronoDuration::seconds(age_secs))
			.container("app", "nginx")
	}

	#[tokio::test(start_paused = true)]
	async fn test_initial_delay_blocks_healthy_candidates() {
		let client = MockK8sClient::new();
		let candidates = vec![selected(aged("a", 10).running().build(), "app")];

		for policy in [
			WaitPolicy::UntilNewestRunning,
			WaitPolicy::UntilNotTerminating,
			WaitPolicy::UntilNotWaiting,
			WaitPolicy::UntilInitContainerRunning,
		] {
			let mut strategy = WaitingStrategy::new(policy, Duration::from_secs(5));
			let result = strategy.select_container(&client, "default", &candidates).await;
			assert!(matches!(result, Ok(None)), "{policy:?} selected before delay");
		}

		let mut strategy = WaitingStrategy::until_newest_running(Duration::from_secs(5));
		tokio::time::advance(Duration::from_secs(6)).await;
		let result = strategy.select_container(&client, "default", &candidates).await;
		assert!(matches!(result, Ok(Some(_))));
	}

	#[tokio::test(start_paused = true)]
	async fn test_newest_running_does_not_fall_back_to_older_ready() {
		let client = MockK8sClient::new();
		let candidates = vec![
			selected(aged("a", 60).running().build(), "app"),
			selected(aged("b", 5).waiting("ContainerCreating").build(), "app"),
		];
		let mut strategy = WaitingStrategy::until_newest_running(Duration::ZERO);
		let result = strategy.select_container(&client, "default", &candidates).await;
		assert!(matches!(result, Ok(None)));
	}

	#[tokio::test(start_paused = true)]
	async fn test_newest_running_fails_on_critical_status() {
		let client = MockK8sClient::new();
		let candidates = vec![selected(aged("c", 5).waiting("CrashLoopBackOff").build(), "app")];
		let mut strategy = WaitingStrategy::until_newest_running(Duration::ZERO);
		let err = strategy
			.select_container(&client, "default", &candidates)
			.await
			.unwrap_err();
		assert!(matches!(err, SelectorError::Fatal { ref status, .. } if status == "CrashLoopBackOff"));
		assert!(err.is_fatal());
	}

	#[tokio::test(start_paused = true)]
	async fn test_terminating_pod_never_chosen() {
		let client = MockK8sClient::new();
		for terminating_is_newer in [true, false] {
			let (running_age, terminating_age) = if terminating_is_newer { (60, 5) } else { (5, 60) };
			let candidates = vec![
				selected(aged("old", terminating_age).running().terminating().build(), "app"),
				selected(aged("new", running_age).running().build(), "app"),
			];
			let mut strategy = WaitingStrategy::until_newest_running(Duration::ZERO);
			let chosen = strategy
				.select_container(&client, "default", &candidates)
				.await
				.unwrap()
				.unwrap();
			assert_eq!(chosen.pod_name(), "new");
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_empty_candidates_wait() {
		let client = MockK8sClient::new();
		let mut strategy = WaitingStrategy::until_not_terminating(Duration::ZERO);
		let result = strategy.select_container(&client, "default", &[]).await;
		assert!(matches!(result, Ok(None)));
	}

	#[tokio::test(start_paused = true)]
	async fn test_not_waiting_policy() {
		let client = MockK8sClient::new();
		let mut strategy = WaitingStrategy::until_not_waiting(Duration::ZERO);

		let waiting = vec![selected(aged("a", 5).waiting("ContainerCreating").build(), "app")];
		assert!(matches!(
			strategy.select_container(&client, "default", &waiting).await,
			Ok(None)
		));

		let no_status = vec![selected(aged("a", 5).build(), "app")];
		assert!(matches!(
			strategy.select_container(&client, "default", &no_status).await,
			Ok(None)
		));

		let running = vec![selected(aged("a", 5).running().build(), "app")];
		assert!(matches!(
			strategy.select_container(&client, "default", &running).await,
			Ok(Some(_))
		));
	}

	#[tokio::test(start_paused = true)]
	async fn test_init_container_policy_uses_annotation() {
		let client = MockK8sClient::new();
		let pod = aged("a", 5)
			.init_container("sync-init", "busybox")
			.annotation(MATCHED_CONTAINER_ANNOTATION, "sync-init;app")
			.init_running("sync-init")
			.build();
		let pod = Arc::new(pod);
		let candidates = vec![
			SelectedContainer::new(Arc::clone(&pod), Container {
				name: "app".into(),
				..Default::default()
			}),
			SelectedContainer::new(Arc::clone(&pod), Container {
				name: "sync-init".into(),
				..Default::default()
			}),
		];

		let mut strategy = WaitingStrategy::until_init_container_running(Duration::ZERO);
		let chosen = strategy
			.select_container(&client, "default", &candidates)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(chosen.container.name, "sync-init");

		let pods = vec![Arc::clone(&pod)];
		let chosen = strategy.select_pod(&client, "default", &pods).await.unwrap();
		assert!(chosen.is_some());
	}

	#[tokio::test(start_paused = true)]
	async fn test_select_pod_newest_running() {
		let client = MockK8sClient::new();
		let pods = vec![
			Arc::new(aged("old", 60).running().build()),
			Arc::new(aged("new", 5).running().build()),
		];
		let mut strategy = WaitingStrategy::until_newest_running(Duration::ZERO);
		let chosen = strategy.select_pod(&client, "default", &pods).await.unwrap().unwrap();
		assert_eq!(chosen.metadata.name.as_deref(), Some("new"));
	}

	#[tokio::test(start_paused = true)]
	async fn test_reset_reapplies_delay() {
		let client = MockK8sClient::new();
		let candidates = vec![selected(aged("a", 10).running().build(), "app")];
		let strategy = WaitingStrategy::until_newest_running(Duration::from_secs(5));
		tokio::time::advance(Duration::from_secs(6)).await;

		let mut fresh = strategy.reset();
		assert_eq!(fresh.policy(), WaitPolicy::UntilNewestRunning);
		assert!(matches!(
			fresh.select_container(&client, "default", &candidates).await,
			Ok(None)
		));
	}
}
