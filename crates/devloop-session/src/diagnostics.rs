// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use devloop_common_k8s::pod_status::{is_pod_terminating, pod_status};
use devloop_common_k8s::{K8sClient, Pod};

/// Last known condition of the pod a session lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodCondition {
	Gone,
	Terminating,
	Status(String),
	Unknown(String),
}

/// Query the previous pod again so a restart can tell a crashed container
/// apart from a network blip.
pub async fn previous_pod_condition(client: &dyn K8sClient, pod: &Pod) -> PodCondition {
	let name = pod.metadata.name.as_deref().unwrap_or_default();
	let namespace = pod
		.metadata
		.namespace
		.as_deref()
		.unwrap_or_else(|| client.default_namespace());

	match client.get_pod(name, namespace).await {
		Ok(current) if current.metadata.uid != pod.metadata.uid => PodCondition::Gone,
		Ok(current) if is_pod_terminating(&current) => PodCondition::Terminating,
		Ok(current) => PodCondition::Status(pod_status(&current)),
		Err(e) if e.is_not_found() => PodCondition::Gone,
		Err(e) => PodCondition::Unknown(e.to_string()),
	}
}

/// Human readable line for the restart log.
pub fn describe(pod_name: &str, condition: &PodCondition) -> String {
	match condition {
		PodCondition::Gone => format!("pod {pod_name} was deleted or replaced"),
		PodCondition::Terminating => format!("pod {pod_name} is terminating"),
		PodCondition::Status(status) => format!("pod {pod_name} has status {status}"),
		PodCondition::Unknown(error) => format!("couldn't get status of pod {pod_name}: {error}"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use devloop_common_k8s::testing::{MockK8sClient, PodBuilder};

	#[tokio::test]
	async fn test_previous_pod_condition() {
		let client = MockK8sClient::new();
		let pod = PodBuilder::new("default", "web-1").container("app", "nginx").running().build();

		assert_eq!(previous_pod_condition(&client, &pod).await, PodCondition::Gone);

		client.insert_pod(pod.clone());
		assert_eq!(
			previous_pod_condition(&client, &pod).await,
			PodCondition::Status("Running".into())
		);

		let terminating = PodBuilder::new("default", "web-1")
			.container("app", "nginx")
			.running()
			.terminating()
			.build();
		client.insert_pod(terminating);
		assert_eq!(previous_pod_condition(&client, &pod).await, PodCondition::Terminating);
	}

	#[tokio::test]
	async fn test_recreated_pod_with_same_name_counts_as_gone() {
		let client = MockK8sClient::new();
		let pod = PodBuilder::new("default", "web-0").container("app", "nginx").build();
		let mut recreated = pod.clone();
		recreated.metadata.uid = Some("another".into());
		client.insert_pod(recreated);
		assert_eq!(previous_pod_condition(&client, &pod).await, PodCondition::Gone);
	}

	#[test]
	fn test_describe() {
		assert_eq!(
			describe("web-1", &PodCondition::Status("CrashLoopBackOff".into())),
			"pod web-1 has status CrashLoopBackOff"
		);
	}
}
