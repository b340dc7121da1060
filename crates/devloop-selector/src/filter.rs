// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resolve selector criteria to a deduplicated list of containers.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use devloop_common_k8s::pod_status::creation_time;
use devloop_common_k8s::{Container, K8sClient, Pod};
use tracing::{debug, instrument};

use crate::criteria::Selector;
use crate::error::SelectorResult;
use crate::image::compare_image_names;

/// Annotation listing (`;`-separated) the containers a replaced pod stands in for.
pub const MATCHED_CONTAINER_ANNOTATION: &str = "devloop.dev/container";
/// Annotation carrying the image selector a replaced pod was created for.
pub const IMAGE_SELECTOR_ANNOTATION: &str = "devloop.dev/image-selector";
/// Label marking a pod that replaced the original workload pod.
pub const REPLACED_LABEL: &str = "devloop.dev/replaced";

/// A container observed at selection time together with its pod.
#[derive(Debug, Clone)]
pub struct SelectedContainer {
	pub pod: Arc<Pod>,
	pub container: Container,
}

impl SelectedContainer {
	pub fn new(pod: Arc<Pod>, container: Container) -> Self {
		Self { pod, container }
	}

	pub fn pod_name(&self) -> &str {
		self.pod.metadata.name.as_deref().unwrap_or_default()
	}

	pub fn namespace(&self) -> &str {
		self.pod.metadata.namespace.as_deref().unwrap_or_default()
	}

	/// Identity key `namespace/pod/container`.
	pub fn key(&self) -> String {
		container_key(self.namespace(), self.pod_name(), &self.container.name)
	}

	/// Position among the pod's init containers, `None` for normal containers.
	pub fn init_container_position(&self) -> Option<usize> {
		self
			.pod
			.spec
			.as_ref()
			.and_then(|s| s.init_containers.as_ref())
			.and_then(|init| init.iter().position(|c| c.name == self.container.name))
	}
}

impl std::fmt::Display for SelectedContainer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.pod_name(), self.container.name)
	}
}

fn container_key(namespace: &str, pod: &str, container: &str) -> String {
	format!("{namespace}/{pod}/{container}")
}

/// Comparator used to order a deduplicated selection.
pub type SortContainers = fn(&SelectedContainer, &SelectedContainer) -> Ordering;

/// Newest pod first; within one pod, normal containers before init containers.
pub fn sort_containers_by_newest(a: &SelectedContainer, b: &SelectedContainer) -> Ordering {
	if a.namespace() == b.namespace() && a.pod_name() == b.pod_name() {
		let pos = |c: &SelectedContainer| c.init_container_position().map_or(-1, |p| p as i64);
		return pos(a).cmp(&pos(b));
	}
	sort_pods_by_newest(&a.pod, &b.pod)
}

/// Newest creation timestamp first.
pub fn sort_pods_by_newest(a: &Pod, b: &Pod) -> Ordering {
	creation_time(b).cmp(&creation_time(a))
}

/// Keep the first occurrence of every identity key.
pub fn deduplicate(containers: Vec<SelectedContainer>) -> Vec<SelectedContainer> {
	let mut seen = HashSet::new();
	containers
		.into_iter()
		.filter(|c| seen.insert(c.key()))
		.collect()
}

/// Distinct pods of a selection, newest first.
pub fn pods_from_containers(containers: &[SelectedContainer]) -> Vec<Arc<Pod>> {
	let mut seen = HashSet::new();
	let mut pods: Vec<Arc<Pod>> = containers
		.iter()
		.filter(|c| seen.insert((c.namespace().to_string(), c.pod_name().to_string())))
		.map(|c| Arc::clone(&c.pod))
		.collect();
	pods.sort_by(|a, b| sort_pods_by_newest(a, b));
	pods
}

/// Queries the cluster for containers matching selectors.
pub struct ContainerFilter {
	client: Arc<dyn K8sClient>,
	sort: Option<SortContainers>,
}

impl ContainerFilter {
	pub fn new(client: Arc<dyn K8sClient>) -> Self {
		Self { client, sort: None }
	}

	pub fn with_sort(client: Arc<dyn K8sClient>, sort: SortContainers) -> Self {
		Self {
			client,
			sort: Some(sort),
		}
	}

	/// Run label, image and pod-name queries for every selector.
	///
	/// Results are concatenated in that order and deduplicated, so the first
	/// query to produce a container wins. A pod that does not exist yields an
	/// empty result rather than an error.
	#[instrument(skip_all, fields(selectors = selectors.len()))]
	pub async fn select_containers(
		&self,
		selectors: &[Selector],
	) -> SelectorResult<Vec<SelectedContainer>> {
		let mut found = Vec::new();
		for selector in selectors {
			let namespace = selector.resolve_namespace(self.client.default_namespace());

			if selector.label().is_some() || selector.is_everything() {
				let pods = self.client.list_pods(namespace, selector.label()).await?;
				for pod in pods {
					found.extend(containers_of(Arc::new(pod), selector, |_, _| true));
				}
			}

			if !selector.image_selector.is_empty() {
				let pods = self.client.list_pods(namespace, None).await?;
				for pod in pods {
					let pod = Arc::new(pod);
					for image in &selector.image_selector {
						found.extend(containers_of(Arc::clone(&pod), selector, |pod, container| {
							matches_image(pod, container, image)
						}));
					}
				}
			}

			if let Some(name) = selector.pod_name() {
				match self.client.get_pod(name, namespace).await {
					Ok(pod) => found.extend(containers_of(Arc::new(pod), selector, |_, _| true)),
					Err(e) if e.is_not_found() => {
						debug!(pod = %name, namespace = %namespace, "pod not found");
					}
					Err(e) => return Err(e.into()),
				}
			}
		}

		let mut found = deduplicate(found);
		if let Some(sort) = self.sort {
			found.sort_by(sort);
		}
		Ok(found)
	}

	/// Distinct pods of the matching containers, newest first.
	pub async fn select_pods(&self, selectors: &[Selector]) -> SelectorResult<Vec<Arc<Pod>>> {
		let containers = self.select_containers(selectors).await?;
		Ok(pods_from_containers(&containers))
	}
}

fn containers_of<F>(pod: Arc<Pod>, selector: &Selector, matches: F) -> Vec<SelectedContainer>
where
	F: Fn(&Pod, &Container) -> bool,
{
	let pod_ref: &Pod = &pod;
	let Some(spec) = pod_ref.spec.as_ref() else {
		return Vec::new();
	};
	let init = if selector.skip_init_containers {
		&[][..]
	} else {
		spec.init_containers.as_deref().unwrap_or_default()
	};

	init
		.iter()
		.chain(spec.containers.iter())
		.filter(|&c| !selector.excludes(pod_ref, c) && matches(pod_ref, c))
		.map(|c| SelectedContainer::new(Arc::clone(&pod), c.clone()))
		.collect()
}

/// Image match, honouring the replaced-pod annotations.
fn matches_image(pod: &Pod, container: &Container, pattern: &str) -> bool {
	let annotations = pod.metadata.annotations.as_ref();
	let replaced = pod
		.metadata
		.labels
		.as_ref()
		.and_then(|l| l.get(REPLACED_LABEL))
		.is_some_and(|v| v == "true");
	let stands_in = annotations
		.and_then(|a| a.get(MATCHED_CONTAINER_ANNOTATION))
		.is_some_and(|v| v.split(';').any(|name| name == container.name));

	if replaced && stands_in {
		return annotations
			.and_then(|a| a.get(IMAGE_SELECTOR_ANNOTATION))
			.is_some_and(|selector| !selector.is_empty() && selector == pattern);
	}

	container
		.image
		.as_deref()
		.is_some_and(|image| compare_image_names(pattern, image))
}
