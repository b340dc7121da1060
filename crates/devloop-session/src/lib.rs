// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session controller for devloop.
//!
//! A [`Session`] (file sync, port forwarding) knows how to connect to one
//! target. The [`SessionController`] selects that target, runs the
//! initial-sync barrier and keeps the session alive across pod restarts.
//! A [`Supervisor`] owns every task of one dev invocation.

mod backoff;
mod connection;
mod controller;
mod diagnostics;
mod error;
mod session;
mod state;
mod supervisor;

pub use backoff::{Backoff, BackoffConfig, DEFAULT_RESTART_DELAY};
pub use connection::{BarrierOutcome, Connection, ConnectionEvent, ConnectionHandle};
pub use controller::{ControllerOptions, SessionController, SessionHandle, DEFAULT_BARRIER_TIMEOUT};
pub use diagnostics::{describe, previous_pod_condition, PodCondition};
pub use error::{SessionError, SessionResult};
pub use session::{Session, Target, TargetKind};
pub use state::{SessionState, StateTracker};
pub use supervisor::Supervisor;
