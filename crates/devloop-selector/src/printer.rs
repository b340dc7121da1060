// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Throttled "still waiting" diagnostics.

use std::collections::HashSet;
use std::time::Duration;

use devloop_common_k8s::pod_status::pod_status;
use devloop_common_k8s::{Event, K8sClient, Pod};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Minimum gap between two user-facing warnings.
pub const WARNING_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
struct RelevantObject {
	kind: &'static str,
	name: Option<String>,
	uid: Option<String>,
}

impl RelevantObject {
	fn matches(&self, event: &Event) -> bool {
		let involved = &event.involved_object;
		if involved.kind.as_deref() != Some(self.kind) {
			return false;
		}
		if let Some(name) = &self.name {
			if involved.name.as_ref() != Some(name) {
				return false;
			}
		}
		if let Some(uid) = &self.uid {
			if involved.uid.as_ref() != Some(uid) {
				return false;
			}
		}
		true
	}
}

fn relevant_objects_for(pod: &Pod) -> Vec<RelevantObject> {
	let mut objects = vec![RelevantObject {
		kind: "Pod",
		name: pod.metadata.name.clone(),
		uid: pod.metadata.uid.clone(),
	}];
	let claims = pod
		.spec
		.iter()
		.flat_map(|s| s.volumes.iter().flatten())
		.filter_map(|v| v.persistent_volume_claim.as_ref());
	for claim in claims {
		objects.push(RelevantObject {
			kind: "PersistentVolumeClaim",
			name: Some(claim.claim_name.clone()),
			uid: None,
		});
	}
	objects
}

fn workload_objects() -> Vec<RelevantObject> {
	["StatefulSet", "Deployment", "ReplicaSet", "Pod"]
		.into_iter()
		.map(|kind| RelevantObject {
			kind,
			..Default::default()
		})
		.collect()
}

/// Prints waiting diagnostics at most once per [`WARNING_INTERVAL`] and
/// each cluster warning event at most once.
#[derive(Debug)]
pub struct PodInfoPrinter {
	last_warning: Instant,
	shown_events: HashSet<String>,
}

impl PodInfoPrinter {
	/// `quiet_until` suppresses warnings until then plus the interval.
	pub fn new(quiet_until: Instant) -> Self {
		Self {
			last_warning: quiet_until,
			shown_events: HashSet::new(),
		}
	}

	fn due(&self) -> bool {
		Instant::now().saturating_duration_since(self.last_warning) > WARNING_INTERVAL
	}

	pub async fn print_not_found_warning(&mut self, client: &dyn K8sClient, namespace: &str) {
		if !self.due() {
			return;
		}
		self.display_events(client, namespace, &workload_objects()).await;
		warn!(
			namespace = %namespace,
			"still couldn't find any pods that match the selector, will keep waiting but this might time out"
		);
		self.last_warning = Instant::now();
	}

	pub fn print_pod_warning(&mut self, pod: &Pod) {
		if !self.due() {
			return;
		}
		warn!(
			pod = pod.metadata.name.as_deref().unwrap_or_default(),
			status = %pod_status(pod),
			"pod has critical status"
		);
		self.last_warning = Instant::now();
	}

	pub async fn print_pod_info(&mut self, client: &dyn K8sClient, pod: &Pod) {
		if !self.due() {
			return;
		}
		let namespace = pod
			.metadata
			.namespace
			.as_deref()
			.unwrap_or_else(|| client.default_namespace())
			.to_string();
		self.display_events(client, &namespace, &relevant_objects_for(pod)).await;

		let status = pod_status(pod);
		if status != "Running" {
			warn!(
				pod = pod.metadata.name.as_deref().unwrap_or_default(),
				status = %status,
				"waiting for pod"
			);
		}
		self.last_warning = Instant::now();
	}

	async fn display_events(
		&mut self,
		client: &dyn K8sClient,
		namespace: &str,
		objects: &[RelevantObject],
	) {
		let mut events = match client.list_events(namespace).await {
			Ok(events) => events,
			Err(e) => {
				debug!(error = %e, "error retrieving events");
				return;
			}
		};
		events.sort_by(|a, b| {
			b.metadata
				.creation_timestamp
				.as_ref()
				.map(|t| t.0)
				.cmp(&a.metadata.creation_timestamp.as_ref().map(|t| t.0))
		});

		for event in events {
			if event.type_.as_deref() != Some("Warning") {
				continue;
			}
			let Some(name) = event.metadata.name.clone() else {
				continue;
			};
			if self.shown_events.contains(&name) || !objects.iter().any(|o| o.matches(&event)) {
				continue;
			}
			warn!(
				kind = event.involved_object.kind.as_deref().unwrap_or_default(),
				object = event.involved_object.name.as_deref().unwrap_or_default(),
				reason = event.reason.as_deref().unwrap_or_default(),
				"{}",
				event.message.as_deref().unwrap_or_default()
			);
			self.shown_events.insert(name);
		}
	}

	#[cfg(test)]
	pub(crate) fn shown_event_count(&self) -> usize {
		self.shown_events.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use devloop_common_k8s::testing::{MockK8sClient, PodBuilder};
	use devloop_common_k8s::{ObjectMeta, ObjectReference};

	fn warning(name: &str, kind: &str, object: &str) -> Event {
		Event {
			metadata: ObjectMeta {
				name: Some(name.into()),
				namespace: Some("default".into()),
				..Default::default()
			},
			involved_object: ObjectReference {
				kind: Some(kind.into()),
				name: Some(object.into()),
				..Default::default()
			},
			type_: Some("Warning".into()),
			reason: Some("FailedScheduling".into()),
			message: Some("0/3 nodes are available".into()),
			..Default::default()
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_events_shown_once_and_throttled() {
		let client = MockK8sClient::new();
		client.add_event(warning("e1", "Pod", "web-1"));
		client.add_event(warning("e2", "Pod", "other"));
		let pod = PodBuilder::new("default", "web-1").build();

		let mut printer = PodInfoPrinter::new(Instant::now());
		printer.print_pod_info(&client, &pod).await;
		assert_eq!(printer.shown_event_count(), 0, "quiet during the first interval");

		tokio::time::advance(WARNING_INTERVAL + Duration::from_secs(1)).await;
		printer.print_pod_info(&client, &pod).await;
		assert_eq!(printer.shown_event_count(), 1);

		tokio::time::advance(WARNING_INTERVAL + Duration::from_secs(1)).await;
		printer.print_pod_info(&client, &pod).await;
		assert_eq!(printer.shown_event_count(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_not_found_matches_workload_kinds() {
		let client = MockK8sClient::new();
		client.add_event(warning("e1", "ReplicaSet", "web-abc"));
		client.add_event(warning("e2", "Service", "web"));

		let mut printer = PodInfoPrinter::new(Instant::now());
		tokio::time::advance(WARNING_INTERVAL + Duration::from_secs(1)).await;
		printer.print_not_found_warning(&client, "default").await;
		assert_eq!(printer.shown_event_count(), 1);
	}
}
