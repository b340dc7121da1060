// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Lifecycle events for devloop sessions.
//!
//! Sessions fire typed [`LifecycleEvent`]s through an [`EventBus`], which
//! hands them to every registered [`HookDispatcher`].

mod bus;
mod dispatcher;
mod error;
mod event;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bus::EventBus;
pub use dispatcher::{
	CommandHook, HookCommand, HookDispatcher, NoOpDispatcher, SharedHookDispatcher,
	TracingDispatcher, HOOK_ERROR_ENV, HOOK_EVENT_ENV, HOOK_PAYLOAD_ENV,
};
pub use error::{HookError, HookResult};
pub use event::{Feature, HookPayload, LifecycleEvent, Phase};
