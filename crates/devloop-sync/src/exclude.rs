// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Gitignore-style exclude lists.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::error::{SyncError, SyncResult};
use crate::path::clean_path;

const UTF8_BOM: char = '\u{feff}';

/// Parse the contents of an exclude file into patterns.
///
/// Comment lines are dropped before trimming, so `  # x` is a pattern.
pub fn parse_exclude_lines(contents: &str) -> Vec<String> {
	let mut patterns = Vec::new();
	for (index, line) in contents.lines().enumerate() {
		let line = if index == 0 {
			line.trim_start_matches(UTF8_BOM)
		} else {
			line
		};
		if line.starts_with('#') {
			continue;
		}
		let line = line.trim();
		if line.is_empty() {
			continue;
		}

		let (invert, pattern) = match line.strip_prefix('!') {
			Some(rest) => (true, rest.trim()),
			None => (false, line),
		};
		let pattern = if pattern.is_empty() {
			String::new()
		} else {
			clean_path(&pattern.replace('\\', "/"))
		};
		patterns.push(if invert { format!("!{pattern}") } else { pattern });
	}
	patterns
}

/// Read an exclude file.
pub async fn parse_exclude_file(path: &Path) -> SyncResult<Vec<String>> {
	let contents = tokio::fs::read_to_string(path)
		.await
		.map_err(|e| SyncError::io(path, e))?;
	Ok(parse_exclude_lines(&contents))
}

/// Compiled exclude patterns, matched against paths relative to the sync root.
#[derive(Clone)]
pub struct ExcludeMatcher {
	inner: Option<Gitignore>,
}

impl ExcludeMatcher {
	pub fn new<S: AsRef<str>>(patterns: &[S]) -> SyncResult<Self> {
		if patterns.is_empty() {
			return Ok(Self::empty());
		}

		let mut builder = GitignoreBuilder::new("");
		for pattern in patterns {
			let pattern = pattern.as_ref();
			builder
				.add_line(None, pattern)
				.map_err(|e| SyncError::Exclude {
					pattern: pattern.to_string(),
					message: e.to_string(),
				})?;
		}
		let inner = builder.build().map_err(|e| SyncError::Exclude {
			pattern: patterns
				.iter()
				.map(|p| p.as_ref())
				.collect::<Vec<_>>()
				.join(", "),
			message: e.to_string(),
		})?;
		Ok(Self { inner: Some(inner) })
	}

	pub fn empty() -> Self {
		Self { inner: None }
	}

	/// Whether `rel` or one of its parent directories is excluded.
	pub fn is_excluded(&self, rel: &str, is_dir: bool) -> bool {
		let Some(inner) = &self.inner else {
			return false;
		};
		let rel = rel.trim_start_matches('/');
		if rel.is_empty() || rel == "." {
			return false;
		}
		inner.matched_path_or_any_parents(rel, is_dir).is_ignore()
	}
}

impl std::fmt::Debug for ExcludeMatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ExcludeMatcher")
			.field("patterns", &self.inner.as_ref().map_or(0, |g| g.len()))
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_exclude_lines() {
		let contents = "\u{feff}node_modules/\n# comment\n\n  build//out/  \n! ./keep.txt\n  #not-a-comment\n";
		assert_eq!(
			parse_exclude_lines(contents),
			vec!["node_modules", "build/out", "!keep.txt", "#not-a-comment"]
		);
	}

	#[test]
	fn test_bom_only_stripped_on_first_line() {
		let contents = "a\n\u{feff}b\n";
		let patterns = parse_exclude_lines(contents);
		assert_eq!(patterns[0], "a");
		assert_eq!(patterns[1], "\u{feff}b");
	}

	#[tokio::test]
	async fn test_parse_exclude_file() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join(".devloopignore");
		tokio::fs::write(&file, "target\n*.log\n").await.unwrap();
		assert_eq!(parse_exclude_file(&file).await.unwrap(), vec!["target", "*.log"]);

		let missing = parse_exclude_file(&dir.path().join("nope")).await;
		assert!(matches!(missing, Err(SyncError::Io { .. })));
	}

	#[test]
	fn test_matcher() {
		let matcher = ExcludeMatcher::new(&["node_modules", "*.log", "!keep.log"]).unwrap();
		assert!(matcher.is_excluded("node_modules", true));
		assert!(matcher.is_excluded("node_modules/a/b.js", false));
		assert!(matcher.is_excluded("logs/app.log", false));
		assert!(!matcher.is_excluded("keep.log", false));
		assert!(!matcher.is_excluded("src/main.rs", false));
		assert!(!ExcludeMatcher::empty().is_excluded("anything", false));
	}

	#[test]
	fn test_single_file_matcher() {
		let matcher = ExcludeMatcher::new(&["**", "!/app.conf"]).unwrap();
		assert!(!matcher.is_excluded("app.conf", false));
		assert!(matcher.is_excluded("other.conf", false));
		assert!(matcher.is_excluded("sub/app.conf", false));
	}
}
