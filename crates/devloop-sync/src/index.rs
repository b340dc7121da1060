// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Snapshot of the files both sides agree on.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{SyncError, SyncResult};
use crate::exclude::ExcludeMatcher;

/// How the initial comparison decides two files are equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareBy {
	#[default]
	Mtime,
	Size,
	Checksum,
}

impl std::str::FromStr for CompareBy {
	type Err = SyncError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"" | "mtime" => Ok(Self::Mtime),
			"size" => Ok(Self::Size),
			"checksum" => Ok(Self::Checksum),
			other => Err(SyncError::Config {
				message: format!("unknown compare mode {other:?}, expected mtime, size or checksum"),
			}),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
	pub size: u64,
	/// Seconds since the epoch, as sent over the wire.
	pub mtime: i64,
	/// Sub-second part of the local mtime. Remote metadata carries `0`.
	pub mtime_nanos: u32,
	pub mode: u32,
	pub sha256: Option<String>,
}

impl FileMeta {
	pub fn from_metadata(meta: &Metadata) -> Self {
		let (mtime, mtime_nanos) = meta
			.modified()
			.ok()
			.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
			.map_or((0, 0), |d| (d.as_secs() as i64, d.subsec_nanos()));
		Self {
			size: meta.len(),
			mtime,
			mtime_nanos,
			mode: file_mode(meta),
			sha256: None,
		}
	}

	pub fn with_checksum(mut self, contents: &[u8]) -> Self {
		self.sha256 = Some(checksum(contents));
		self
	}

	/// Drop the sub-second part, for comparisons with remote metadata.
	pub fn whole_seconds(mut self) -> Self {
		self.mtime_nanos = 0;
		self
	}

	fn same_mtime(&self, other: &FileMeta) -> bool {
		self.mtime == other.mtime && self.mtime_nanos == other.mtime_nanos
	}

	/// Whether the file changed between `self` and `other`.
	pub fn differs(&self, other: &FileMeta, by: CompareBy) -> bool {
		match by {
			CompareBy::Mtime => self.size != other.size || !self.same_mtime(other),
			CompareBy::Size => self.size != other.size,
			CompareBy::Checksum => match (&self.sha256, &other.sha256) {
				(Some(a), Some(b)) => a != b,
				_ => self.size != other.size || !self.same_mtime(other),
			},
		}
	}
}

#[cfg(unix)]
fn file_mode(meta: &Metadata) -> u32 {
	use std::os::unix::fs::PermissionsExt;
	meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &Metadata) -> u32 {
	if meta.permissions().readonly() {
		0o444
	} else {
		0o644
	}
}

pub fn checksum(contents: &[u8]) -> String {
	hex::encode(Sha256::digest(contents))
}

/// Relative slash path to file metadata.
pub type FileIndex = BTreeMap<String, FileMeta>;

pub type SharedIndex = Arc<Mutex<FileIndex>>;

/// Files that must be sent to bring the remote in line with the local tree.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Changes {
	pub uploads: Vec<String>,
	pub removes: Vec<String>,
}

impl Changes {
	pub fn is_empty(&self) -> bool {
		self.uploads.is_empty() && self.removes.is_empty()
	}
}

pub fn diff(local: &FileIndex, known: &FileIndex, by: CompareBy) -> Changes {
	let uploads = local
		.iter()
		.filter(|(path, meta)| known.get(*path).map_or(true, |k| meta.differs(k, by)))
		.map(|(path, _)| path.clone())
		.collect();
	let removes = known
		.keys()
		.filter(|path| !local.contains_key(*path))
		.cloned()
		.collect();
	Changes { uploads, removes }
}

/// Walk `root` and collect every regular file not excluded.
pub async fn scan_local(root: PathBuf, excludes: ExcludeMatcher, by: CompareBy) -> SyncResult<FileIndex> {
	tokio::task::spawn_blocking(move || scan_blocking(&root, &excludes, by))
		.await
		.map_err(|e| SyncError::protocol(format!("scan task failed: {e}")))?
}

fn scan_blocking(root: &Path, excludes: &ExcludeMatcher, by: CompareBy) -> SyncResult<FileIndex> {
	let mut index = FileIndex::new();
	let filter_root = root.to_path_buf();
	let filter_excludes = excludes.clone();
	let walker = WalkBuilder::new(root)
		.standard_filters(false)
		.follow_links(false)
		.filter_entry(move |entry| {
			let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
			match relative(&filter_root, entry.path()) {
				Some(rel) => !filter_excludes.is_excluded(&rel, is_dir),
				None => true,
			}
		})
		.build();

	for entry in walker {
		let entry = match entry {
			Ok(entry) => entry,
			Err(e) => {
				tracing::debug!(error = %e, "skipping unreadable entry");
				continue;
			}
		};
		if !entry.file_type().is_some_and(|t| t.is_file()) {
			continue;
		}
		let Some(rel) = relative(root, entry.path()) else {
			continue;
		};
		let meta = match entry.metadata() {
			Ok(meta) => meta,
			Err(e) => {
				tracing::debug!(path = %rel, error = %e, "file vanished during scan");
				continue;
			}
		};

		let mut file = FileMeta::from_metadata(&meta);
		if by == CompareBy::Checksum {
			let contents = std::fs::read(entry.path()).map_err(|e| SyncError::io(entry.path(), e))?;
			file = file.with_checksum(&contents);
		}
		index.insert(rel, file);
	}
	Ok(index)
}

fn relative(root: &Path, path: &Path) -> Option<String> {
	let rel = path.strip_prefix(root).ok()?;
	let parts: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy()).collect();
	if parts.is_empty() {
		None
	} else {
		Some(parts.join("/"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn meta(size: u64, mtime: i64) -> FileMeta {
		FileMeta {
			size,
			mtime,
			mtime_nanos: 0,
			mode: 0o644,
			sha256: None,
		}
	}

	#[test]
	fn test_differs_by_policy() {
		let a = meta(10, 100);
		let b = meta(10, 200);
		assert!(a.differs(&b, CompareBy::Mtime));
		assert!(!a.differs(&b, CompareBy::Size));

		let a = meta(10, 100).with_checksum(b"same");
		let b = meta(10, 200).with_checksum(b"same");
		assert!(!a.differs(&b, CompareBy::Checksum));
		assert!(a.differs(&meta(10, 100).with_checksum(b"other"), CompareBy::Checksum));
	}

	#[test]
	fn test_mtime_compares_below_one_second() {
		let downloaded = FileMeta {
			mtime_nanos: 100,
			..meta(10, 100)
		};
		let edited = FileMeta {
			mtime_nanos: 900_000_000,
			..meta(10, 100)
		};
		assert!(edited.differs(&downloaded, CompareBy::Mtime));
		assert!(!edited.clone().whole_seconds().differs(&meta(10, 100), CompareBy::Mtime));
	}

	#[test]
	fn test_parse_compare_by() {
		assert_eq!("Checksum".parse::<CompareBy>().unwrap(), CompareBy::Checksum);
		assert_eq!("".parse::<CompareBy>().unwrap(), CompareBy::Mtime);
		assert!("hash".parse::<CompareBy>().is_err());
	}

	#[test]
	fn test_diff() {
		let local = FileIndex::from([
			("a".to_string(), meta(1, 1)),
			("b".to_string(), meta(2, 2)),
		]);
		let known = FileIndex::from([
			("a".to_string(), meta(1, 1)),
			("b".to_string(), meta(2, 1)),
			("c".to_string(), meta(3, 3)),
		]);
		assert_eq!(
			diff(&local, &known, CompareBy::Mtime),
			Changes {
				uploads: vec!["b".into()],
				removes: vec!["c".into()],
			}
		);
		assert!(diff(&local, &local, CompareBy::Mtime).is_empty());
	}

	#[tokio::test]
	async fn test_scan_local_honours_excludes() {
		let dir = tempfile::tempdir().unwrap();
		let root = dir.path();
		std::fs::create_dir_all(root.join("src/nested")).unwrap();
		std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
		std::fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
		std::fs::write(root.join("src/nested/lib.rs"), "").unwrap();
		std::fs::write(root.join("node_modules/pkg/index.js"), "").unwrap();
		std::fs::write(root.join(".env"), "A=1").unwrap();

		let excludes = ExcludeMatcher::new(&["node_modules"]).unwrap();
		let index = scan_local(root.to_path_buf(), excludes, CompareBy::Checksum)
			.await
			.unwrap();

		let paths: Vec<_> = index.keys().cloned().collect();
		assert_eq!(paths, vec![".env", "src/main.rs", "src/nested/lib.rs"]);
		assert_eq!(index[".env"].sha256.as_deref(), Some(checksum(b"A=1").as_str()));
		assert_eq!(index["src/main.rs"].size, 12);
	}
}
