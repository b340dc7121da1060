// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Local ports claimed by the sessions of one process.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{ForwardError, ForwardResult};

/// Owner table for local ports.
///
/// Cloning shares the table. Tests create their own arena instead of
/// touching process-wide state.
#[derive(Debug, Clone, Default)]
pub struct PortArena {
	owners: Arc<Mutex<BTreeMap<u16, String>>>,
}

impl PortArena {
	pub fn new() -> Self {
		Self::default()
	}

	fn table(&self) -> MutexGuard<'_, BTreeMap<u16, String>> {
		self.owners.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Claim `port` for `owner`. The port is released when the lease drops.
	pub fn lock(&self, port: u16, owner: &str) -> ForwardResult<PortLease> {
		let mut table = self.table();
		if let Some(current) = table.get(&port) {
			return Err(ForwardError::PortInUse {
				port,
				owner: current.clone(),
			});
		}
		table.insert(port, owner.to_string());
		debug!(port, owner, "port locked");
		Ok(PortLease {
			arena: self.clone(),
			port,
		})
	}

	pub fn release(&self, port: u16) {
		if let Some(owner) = self.table().remove(&port) {
			debug!(port, owner = %owner, "port released");
		}
	}

	pub fn owner(&self, port: u16) -> Option<String> {
		self.table().get(&port).cloned()
	}

	pub fn ports(&self) -> Vec<u16> {
		self.table().keys().copied().collect()
	}

	pub fn is_locked(&self, port: u16) -> bool {
		self.table().contains_key(&port)
	}

	pub fn len(&self) -> usize {
		self.table().len()
	}

	pub fn is_empty(&self) -> bool {
		self.table().is_empty()
	}
}

/// A locked port; dropping it releases the port on every exit path.
#[derive(Debug)]
pub struct PortLease {
	arena: PortArena,
	port: u16,
}

impl PortLease {
	pub fn port(&self) -> u16 {
		self.port
	}
}

impl Drop for PortLease {
	fn drop(&mut self) {
		self.arena.release(self.port);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_lock_and_release() {
		let arena = PortArena::new();
		let lease = arena.lock(8080, "forward:web").unwrap();
		assert_eq!(lease.port(), 8080);
		assert_eq!(arena.owner(8080).as_deref(), Some("forward:web"));

		let err = arena.lock(8080, "ssh").unwrap_err();
		assert!(matches!(err, ForwardError::PortInUse { port: 8080, ref owner } if owner == "forward:web"));

		drop(lease);
		assert!(!arena.is_locked(8080));
		arena.lock(8080, "ssh").unwrap();
	}

	#[test]
	fn test_release_on_error_path() {
		let arena = PortArena::new();
		let result: ForwardResult<()> = (|| {
			let _a = arena.lock(3000, "web")?;
			let _b = arena.lock(3000, "web")?;
			Ok(())
		})();
		assert!(result.is_err());
		assert!(arena.is_empty());
	}

	#[test]
	fn test_clones_share_the_table() {
		let arena = PortArena::new();
		let other = arena.clone();
		let _lease = arena.lock(9229, "debug").unwrap();
		assert!(other.is_locked(9229));
		assert_eq!(other.ports(), vec![9229]);
	}
}
