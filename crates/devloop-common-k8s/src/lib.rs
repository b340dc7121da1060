// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! K8s client abstraction for devloop.
//!
//! This crate provides:
//! - A trait-based K8s client abstraction for testability
//! - Production implementation using the kube crate
//! - Exec and port-forward stream types
//! - Pod status helpers shared by target selection and diagnostics

mod client;
mod error;
mod kube_client;
pub mod pod_status;
mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::K8sClient;
pub use error::{K8sError, K8sResult};
pub use kube_client::KubeClient;
pub use types::{
	BoxedPortStream, Container, ContainerState, ContainerStateRunning, ContainerStateTerminated,
	ContainerStateWaiting, ContainerStatus, Event, ExecCompletion, ExecOutput, ExecParams,
	ExecProcess, ExecStatus, ObjectMeta, ObjectReference, Pod, PodSpec, PodStatus, PortStream,
	Time,
};
