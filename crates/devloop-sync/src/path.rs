// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

use serde::{Deserialize, Serialize};

/// A `local:container` path pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPath {
	pub local: String,
	pub container: String,
}

impl SyncPath {
	/// Parse `local:container`.
	///
	/// With more than one colon the last one splits, so Windows drive letters
	/// survive. An empty side means `.`.
	pub fn parse(path: &str) -> Self {
		if path.is_empty() {
			return Self::new(".", ".");
		}

		match path.rsplit_once(':') {
			None => Self::new(path, path),
			Some((local, container)) => Self::new(or_dot(local), or_dot(container)),
		}
	}

	fn new(local: &str, container: &str) -> Self {
		Self {
			local: local.to_string(),
			container: container.to_string(),
		}
	}
}

fn or_dot(s: &str) -> &str {
	if s.is_empty() {
		"."
	} else {
		s
	}
}

impl fmt::Display for SyncPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} <-> {}", self.local, self.container)
	}
}

/// Lexically clean a slash separated path: collapse separators, drop `.`
/// segments and resolve `..` where possible.
pub fn clean_path(path: &str) -> String {
	if path.is_empty() {
		return ".".into();
	}
	let rooted = path.starts_with('/');
	let mut parts: Vec<&str> = Vec::new();
	for segment in path.split('/') {
		match segment {
			"" | "." => {}
			".." => {
				if parts.last().is_some_and(|p| *p != "..") {
					parts.pop();
				} else if !rooted {
					parts.push("..");
				}
			}
			s => parts.push(s),
		}
	}

	let joined = parts.join("/");
	match (rooted, joined.is_empty()) {
		(true, _) => format!("/{joined}"),
		(false, true) => ".".into(),
		(false, false) => joined,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_parse_sync_path() {
		assert_eq!(SyncPath::parse(""), SyncPath::new(".", "."));
		assert_eq!(SyncPath::parse("src"), SyncPath::new("src", "src"));
		assert_eq!(SyncPath::parse("./src:/app"), SyncPath::new("./src", "/app"));
		assert_eq!(SyncPath::parse(":/app"), SyncPath::new(".", "/app"));
		assert_eq!(SyncPath::parse("./src:"), SyncPath::new("./src", "."));
		assert_eq!(SyncPath::parse("C:\\code:/app"), SyncPath::new("C:\\code", "/app"));
	}

	#[test]
	fn test_clean_path() {
		assert_eq!(clean_path("a//b/./c/"), "a/b/c");
		assert_eq!(clean_path("a/../../b"), "../b");
		assert_eq!(clean_path("/../a"), "/a");
		assert_eq!(clean_path("./"), ".");
		assert_eq!(clean_path("/"), "/");
	}

	proptest! {
		#[test]
		fn clean_path_is_idempotent(path in "[a-z./]{0,24}") {
			let once = clean_path(&path);
			prop_assert_eq!(clean_path(&once), once);
		}
	}
}
