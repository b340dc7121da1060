// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! File sync between a workstation and a container.
//!
//! A [`SyncSession`] injects the sync agent into the selected container and
//! runs it twice over exec: `sync upstream` receives local changes and
//! `sync downstream` streams remote changes back. The [`SyncEngine`] speaks a
//! JSON lines protocol on both streams and keeps a shared file index so
//! nothing is echoed back to where it came from.

mod agent;
mod engine;
mod error;
mod exclude;
mod index;
mod inject;
mod path;
mod protocol;
mod session;
mod transport;

pub use agent::{
	downstream_argv, upstream_argv, DownstreamArgs, UpstreamArgs, AGENT_VERSION, DEFAULT_AGENT_PATH,
};
pub use engine::{EngineOptions, SyncEngine, DEFAULT_SCAN_INTERVAL};
pub use error::{SyncError, SyncResult};
pub use exclude::{parse_exclude_file, parse_exclude_lines, ExcludeMatcher};
pub use index::{checksum, diff, scan_local, Changes, CompareBy, FileIndex, FileMeta, SharedIndex};
pub use inject::{ExecInjector, HelperInjector, NoopInjector, SharedHelperInjector};
pub use path::{clean_path, SyncPath};
pub use protocol::{Message, MessageReader, MessageWriter, Throttle};
pub use session::{SyncOptions, SyncPlan, SyncSession};
pub use transport::{AgentExit, AgentReader, AgentStream, AgentWriter, StderrTail, EXIT_GRACE};
