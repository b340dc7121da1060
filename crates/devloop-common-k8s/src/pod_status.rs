// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Human-readable pod status and health predicates.

use chrono::{DateTime, Utc};

use crate::types::{ContainerStatus, Pod};

/// Status strings that will not resolve without user intervention.
pub const CRITICAL_STATUSES: &[&str] = &[
	"Error",
	"Unknown",
	"ImagePullBackOff",
	"CrashLoopBackOff",
	"RunContainerError",
	"ErrImagePull",
	"CreateContainerConfigError",
	"InvalidImageName",
];

pub const STATUS_RUNNING: &str = "Running";
pub const STATUS_TERMINATING: &str = "Terminating";
pub const STATUS_COMPLETED: &str = "Completed";

/// Whether a status string (with or without an `Init:` prefix) is critical.
pub fn is_critical_status(status: &str) -> bool {
	let status = status.strip_prefix("Init:").unwrap_or(status);
	CRITICAL_STATUSES.contains(&status)
}

/// Compute the status column `kubectl get pods` would show.
pub fn pod_status(pod: &Pod) -> String {
	let status = pod.status.as_ref();
	let mut reason = status
		.and_then(|s| s.reason.clone())
		.filter(|r| !r.is_empty())
		.or_else(|| status.and_then(|s| s.phase.clone()))
		.unwrap_or_default();

	let init_statuses = status
		.and_then(|s| s.init_container_statuses.as_deref())
		.unwrap_or_default();
	let init_count = pod
		.spec
		.as_ref()
		.map(|s| s.init_containers.as_ref().map_or(0, Vec::len))
		.unwrap_or(0);

	let mut initializing = false;
	for (i, container) in init_statuses.iter().enumerate() {
		let state = container.state.as_ref();
		if let Some(terminated) = state.and_then(|s| s.terminated.as_ref()) {
			if terminated.exit_code == 0 {
				continue;
			}
			reason = match terminated.reason.as_deref().filter(|r| !r.is_empty()) {
				Some(r) => format!("Init:{r}"),
				None => match terminated.signal.filter(|s| *s != 0) {
					Some(signal) => format!("Init:Signal:{signal}"),
					None => format!("Init:ExitCode:{}", terminated.exit_code),
				},
			};
		} else if let Some(r) = state
			.and_then(|s| s.waiting.as_ref())
			.and_then(|w| w.reason.as_deref())
			.filter(|r| !r.is_empty() && *r != "PodInitializing")
		{
			reason = format!("Init:{r}");
		} else {
			reason = format!("Init:{i}/{init_count}");
		}
		initializing = true;
		break;
	}

	if !initializing {
		let mut has_running = false;
		let statuses = status
			.and_then(|s| s.container_statuses.as_deref())
			.unwrap_or_default();
		for container in statuses.iter().rev() {
			let state = container.state.as_ref();
			let waiting = state
				.and_then(|s| s.waiting.as_ref())
				.and_then(|w| w.reason.as_deref())
				.filter(|r| !r.is_empty());
			let terminated = state.and_then(|s| s.terminated.as_ref());

			if let Some(r) = waiting {
				reason = r.to_string();
			} else if let Some(t) = terminated {
				reason = match t.reason.as_deref().filter(|r| !r.is_empty()) {
					Some(r) => r.to_string(),
					None => match t.signal.filter(|s| *s != 0) {
						Some(signal) => format!("Signal:{signal}"),
						None => format!("ExitCode:{}", t.exit_code),
					},
				};
			} else if container.ready && state.and_then(|s| s.running.as_ref()).is_some() {
				has_running = true;
			}
		}

		if reason == STATUS_COMPLETED && has_running {
			reason = STATUS_RUNNING.to_string();
		}
	}

	if pod.metadata.deletion_timestamp.is_some() {
		let node_lost = status.and_then(|s| s.reason.as_deref()) == Some("NodeLost");
		reason = if node_lost {
			"Unknown".to_string()
		} else {
			STATUS_TERMINATING.to_string()
		};
	}

	reason
}

/// A pod is terminating when it is being deleted or has been evicted.
pub fn is_pod_terminating(pod: &Pod) -> bool {
	pod.metadata.deletion_timestamp.is_some()
		|| pod
			.status
			.as_ref()
			.and_then(|s| s.reason.as_deref())
			.is_some_and(|r| r.contains("Evicted"))
}

/// Find the status entry for a named container, optionally among init containers.
pub fn container_status<'a>(
	pod: &'a Pod,
	container: &str,
	init: bool,
) -> Option<&'a ContainerStatus> {
	let status = pod.status.as_ref()?;
	let statuses = if init {
		status.init_container_statuses.as_deref()
	} else {
		status.container_statuses.as_deref()
	};
	statuses?.iter().find(|s| s.name == container)
}

/// Whether a named container (init or normal) is ready and running.
pub fn is_container_running(pod: &Pod, container: &str) -> bool {
	let is_running = |s: &ContainerStatus| {
		s.ready && s.state.as_ref().and_then(|st| st.running.as_ref()).is_some()
	};
	container_status(pod, container, true).is_some_and(is_running)
		|| container_status(pod, container, false).is_some_and(is_running)
}

/// Whether a named init container is running and not yet ready.
pub fn is_init_container_running(pod: &Pod, container: &str) -> bool {
	container_status(pod, container, true)
		.filter(|s| !s.ready)
		.and_then(|s| s.state.as_ref())
		.and_then(|s| s.running.as_ref())
		.is_some()
}

/// Whether any container status reports a waiting state.
pub fn has_waiting_container(pod: &Pod) -> bool {
	let Some(status) = pod.status.as_ref() else {
		return false;
	};
	status
		.init_container_statuses
		.iter()
		.chain(status.container_statuses.iter())
		.flatten()
		.any(|s| s.state.as_ref().and_then(|st| st.waiting.as_ref()).is_some())
}

/// Whether the pod reports any container status at all.
pub fn has_container_statuses(pod: &Pod) -> bool {
	pod.status
		.as_ref()
		.and_then(|s| s.container_statuses.as_ref())
		.is_some_and(|s| !s.is_empty())
}

/// Creation timestamp, `None` when the pod was never persisted.
pub fn creation_time(pod: &Pod) -> Option<DateTime<Utc>> {
	pod.metadata.creation_timestamp.as_ref().map(|t| t.0)
}

/// `namespace/name` for log output.
pub fn pod_key(pod: &Pod) -> String {
	format!(
		"{}/{}",
		pod.metadata.namespace.as_deref().unwrap_or_default(),
		pod.metadata.name.as_deref().unwrap_or_default()
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{
		ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
		ObjectMeta, PodSpec, PodStatus, Time,
	};

	fn running(name: &str, ready: bool) -> ContainerStatus {
		ContainerStatus {
			name: name.into(),
			ready,
			state: Some(ContainerState {
				running: Some(ContainerStateRunning::default()),
				..Default::default()
			}),
			..Default::default()
		}
	}

	fn waiting(name: &str, reason: &str) -> ContainerStatus {
		ContainerStatus {
			name: name.into(),
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

	fn terminated(name: &str, exit_code: i32, reason: Option<&str>) -> ContainerStatus {
		ContainerStatus {
			name: name.into(),
			state: Some(ContainerState {
				terminated: Some(ContainerStateTerminated {
					exit_code,
					reason: reason.map(Into::into),
					..Default::default()
				}),
				..Default::default()
			}),
			..Default::default()
		}
	}

	fn pod_with(
		phase: &str,
		init: Vec<ContainerStatus>,
		containers: Vec<ContainerStatus>,
	) -> Pod {
		Pod {
			metadata: ObjectMeta {
				name: Some("web-1".into()),
				namespace: Some("dev".into()),
				..Default::default()
			},
			spec: Some(PodSpec {
				init_containers: if init.is_empty() {
					None
				} else {
					Some(
						init
							.iter()
							.map(|s| k8s_openapi::api::core::v1::Container {
								name: s.name.clone(),
								..Default::default()
							})
							.collect(),
					)
				},
				..Default::default()
			}),
			status: Some(PodStatus {
				phase: Some(phase.into()),
				init_container_statuses: Some(init),
				container_statuses: Some(containers),
				..Default::default()
			}),
		}
	}

	#[test]
	fn test_running_pod_reports_running() {
		let pod = pod_with("Running", vec![], vec![running("app", true)]);
		assert_eq!(pod_status(&pod), "Running");
		assert!(is_container_running(&pod, "app"));
	}

	#[test]
	fn test_waiting_reason_wins() {
		let pod = pod_with("Pending", vec![], vec![waiting("app", "CrashLoopBackOff")]);
		assert_eq!(pod_status(&pod), "CrashLoopBackOff");
		assert!(is_critical_status(&pod_status(&pod)));
		assert!(has_waiting_container(&pod));
	}

	#[test]
	fn test_init_progress_and_failures() {
		let pod = pod_with(
			"Pending",
			vec![terminated("a", 0, None), waiting("b", "PodInitializing")],
			vec![],
		);
		assert_eq!(pod_status(&pod), "Init:1/2");

		let pod = pod_with("Pending", vec![terminated("a", 3, None)], vec![]);
		assert_eq!(pod_status(&pod), "Init:ExitCode:3");

		let pod = pod_with("Pending", vec![waiting("a", "ImagePullBackOff")], vec![]);
		assert_eq!(pod_status(&pod), "Init:ImagePullBackOff");
		assert!(is_critical_status("Init:ImagePullBackOff"));
	}

	#[test]
	fn test_completed_with_running_sibling_is_running() {
		let pod = pod_with(
			"Running",
			vec![],
			vec![running("app", true), terminated("job", 0, Some("Completed"))],
		);
		assert_eq!(pod_status(&pod), "Running");
	}

	#[test]
	fn test_deletion_marks_terminating() {
		let mut pod = pod_with("Running", vec![], vec![running("app", true)]);
		pod.metadata.deletion_timestamp = Some(Time(Utc::now()));
		assert_eq!(pod_status(&pod), STATUS_TERMINATING);
		assert!(is_pod_terminating(&pod));
	}

	#[test]
	fn test_evicted_is_terminating() {
		let mut pod = pod_with("Failed", vec![], vec![]);
		if let Some(status) = pod.status.as_mut() {
			status.reason = Some("Evicted".into());
		}
		assert!(is_pod_terminating(&pod));
		assert_eq!(pod_status(&pod), "Evicted");
	}

	#[test]
	fn test_init_container_running_only_while_not_ready() {
		let pod = pod_with("Pending", vec![running("setup", false)], vec![]);
		assert!(is_init_container_running(&pod, "setup"));
		assert!(!is_container_running(&pod, "setup"));

		let pod = pod_with("Pending", vec![running("setup", true)], vec![]);
		assert!(!is_init_container_running(&pod, "setup"));
	}

	#[test]
	fn test_critical_status_list() {
		assert!(is_critical_status("ErrImagePull"));
		assert!(!is_critical_status("ContainerCreating"));
		assert!(!is_critical_status("Running"));
	}
}
