// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Target selection for devloop sessions.
//!
//! A [`Selector`] describes candidate containers, a [`ContainerFilter`]
//! resolves it against the cluster, a [`WaitingStrategy`] decides when the
//! candidates are ready, and the [`TargetSelector`] polls until exactly one
//! pod or container is chosen.

mod criteria;
mod error;
mod filter;
mod image;
mod picker;
mod printer;
mod strategy;
mod target;

pub use criteria::{
	filter_non_running_containers, filter_terminating_containers, ContainerPredicate, Selector,
};
pub use error::{SelectorError, SelectorResult};
pub use filter::{
	deduplicate, pods_from_containers, sort_containers_by_newest, sort_pods_by_newest,
	ContainerFilter, SelectedContainer, SortContainers, IMAGE_SELECTOR_ANNOTATION,
	MATCHED_CONTAINER_ANNOTATION, REPLACED_LABEL,
};
pub use image::{compare_image_names, ImageRef};
pub use picker::{Picker, TerminalPicker, DEFAULT_CONTAINER_QUESTION, DEFAULT_POD_QUESTION};
pub use printer::{PodInfoPrinter, WARNING_INTERVAL};
pub use strategy::{WaitPolicy, WaitingStrategy};
pub use target::{SelectOptions, TargetSelector, DEFAULT_POLL_INTERVAL, DEFAULT_SELECT_TIMEOUT};
