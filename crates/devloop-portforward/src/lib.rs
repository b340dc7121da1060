// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Port forwarding for devloop.
//!
//! [`PortMapping`] parses `local:remote` strings, the [`PortArena`] hands out
//! local ports to sessions, and [`PortForwardSession`] plugs forwarding into
//! the session controller so it follows the pod across restarts.

mod arena;
mod error;
mod mapping;
mod session;

pub use arena::{PortArena, PortLease};
pub use error::{ForwardError, ForwardResult};
pub use mapping::{PortMapping, DEFAULT_BIND_ADDRESS};
pub use session::{bind_port, BoundPort, ForwardOptions, PortForwardSession, DEFAULT_HEALTH_INTERVAL};
