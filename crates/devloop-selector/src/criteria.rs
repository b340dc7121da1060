// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;
use std::sync::Arc;

use devloop_common_k8s::pod_status::{is_container_running, is_pod_terminating};
use devloop_common_k8s::{Container, Pod};

/// Predicate that excludes a container from selection when it returns true.
pub type ContainerPredicate = Arc<dyn Fn(&Pod, &Container) -> bool + Send + Sync>;

/// Excludes every container of a terminating or evicted pod.
pub fn filter_terminating_containers() -> ContainerPredicate {
	Arc::new(|pod, _| is_pod_terminating(pod))
}

/// Excludes containers that are not ready and running.
pub fn filter_non_running_containers() -> ContainerPredicate {
	Arc::new(|pod, container| is_pod_terminating(pod) || !is_container_running(pod, &container.name))
}

/// Criteria describing which containers to select.
///
/// The three match modes (image, label, pod name) are a union. When none is
/// set the selector matches everything in the namespace.
#[derive(Clone, Default)]
pub struct Selector {
	pub image_selector: Vec<String>,
	pub label_selector: Option<String>,
	pub pod: Option<String>,
	pub container_name: Option<String>,
	pub namespace: Option<String>,
	pub skip_init_containers: bool,
	pub filter_container: Option<ContainerPredicate>,
}

impl Selector {
	pub fn everything() -> Self {
		Self::default()
	}

	pub fn by_label(label_selector: impl Into<String>) -> Self {
		Self {
			label_selector: Some(label_selector.into()),
			..Default::default()
		}
	}

	pub fn by_image<I, S>(images: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			image_selector: images.into_iter().map(Into::into).collect(),
			..Default::default()
		}
	}

	pub fn by_pod(pod: impl Into<String>) -> Self {
		Self {
			pod: Some(pod.into()),
			..Default::default()
		}
	}

	pub fn container(mut self, name: impl Into<String>) -> Self {
		self.container_name = Some(name.into());
		self
	}

	pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = Some(namespace.into());
		self
	}

	pub fn skip_init_containers(mut self) -> Self {
		self.skip_init_containers = true;
		self
	}

	pub fn filter(mut self, filter: ContainerPredicate) -> Self {
		self.filter_container = Some(filter);
		self
	}

	pub fn label(&self) -> Option<&str> {
		self.label_selector.as_deref().filter(|s| !s.is_empty())
	}

	pub fn pod_name(&self) -> Option<&str> {
		self.pod.as_deref().filter(|s| !s.is_empty())
	}

	/// True when no match mode is set.
	pub fn is_everything(&self) -> bool {
		self.image_selector.is_empty() && self.label().is_none() && self.pod_name().is_none()
	}

	/// Namespace to query, falling back to the client default.
	pub fn resolve_namespace<'a>(&'a self, default: &'a str) -> &'a str {
		self
			.namespace
			.as_deref()
			.filter(|ns| !ns.is_empty())
			.unwrap_or(default)
	}

	pub(crate) fn excludes(&self, pod: &Pod, container: &Container) -> bool {
		if let Some(name) = self.container_name.as_deref().filter(|n| !n.is_empty()) {
			if container.name != name {
				return true;
			}
		}
		self
			.filter_container
			.as_ref()
			.is_some_and(|filter| filter(pod, container))
	}
}

impl fmt::Display for Selector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_everything() {
			return write!(f, "everything selector");
		}

		let mut parts = Vec::new();
		if !self.image_selector.is_empty() {
			parts.push(format!("image selector: {}", self.image_selector.join(",")));
		}
		if let Some(label) = self.label() {
			match self.container_name.as_deref().filter(|c| !c.is_empty()) {
				Some(container) => parts.push(format!("label selector: {label} - container: {container}")),
				None => parts.push(format!("label selector: {label}")),
			}
		}
		if let Some(pod) = self.pod_name() {
			parts.push(format!("pod name: {pod}"));
		}
		write!(f, "{}", parts.join(", "))
	}
}

impl fmt::Debug for Selector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Selector")
			.field("image_selector", &self.image_selector)
			.field("label_selector", &self.label_selector)
			.field("pod", &self.pod)
			.field("container_name", &self.container_name)
			.field("namespace", &self.namespace)
			.field("skip_init_containers", &self.skip_init_containers)
			.field("filter_container", &self.filter_container.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use devloop_common_k8s::testing::PodBuilder;

	#[test]
	fn test_display_everything() {
		assert_eq!(Selector::everything().to_string(), "everything selector");
		assert_eq!(
			Selector::by_label("").to_string(),
			"everything selector",
			"empty label selector counts as unset"
		);
	}

	#[test]
	fn test_display_lists_modes() {
		let mut selector = Selector::by_label("app=web").container("api");
		selector.image_selector = vec!["nginx".into(), "redis".into()];
		selector.pod = Some("web-0".into());
		assert_eq!(
			selector.to_string(),
			"image selector: nginx,redis, label selector: app=web - container: api, pod name: web-0"
		);
	}

	#[test]
	fn test_resolve_namespace() {
		assert_eq!(Selector::everything().resolve_namespace("dev"), "dev");
		assert_eq!(
			Selector::everything().namespace("prod").resolve_namespace("dev"),
			"prod"
		);
	}

	#[test]
	fn test_filter_presets() {
		let running = PodBuilder::new("dev", "a").container("app", "nginx").running().build();
		let pending = PodBuilder::new("dev", "b").container("app", "nginx").build();
		let terminating = PodBuilder::new("dev", "c")
			.container("app", "nginx")
			.running()
			.terminating()
			.build();
		let app = Container {
			name: "app".into(),
			..Default::default()
		};

		let non_running = filter_non_running_containers();
		assert!(!non_running(&running, &app));
		assert!(non_running(&pending, &app));
		assert!(non_running(&terminating, &app));

		let terminating_only = filter_terminating_containers();
		assert!(!terminating_only(&pending, &app));
		assert!(terminating_only(&terminating, &app));
	}
}
