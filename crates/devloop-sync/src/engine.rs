// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Upstream and downstream halves of one sync connection.
//!
//! Downstream applies the agent's batches to the local tree and records every
//! written file in the shared index. Upstream rescans the local tree, diffs it
//! against that index and sends what changed. The index is what keeps a file
//! that just arrived from the container from being echoed back.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use devloop_session::{ConnectionEvent, ConnectionHandle};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::exclude::ExcludeMatcher;
use crate::index::{checksum, diff, scan_local, Changes, CompareBy, FileIndex, FileMeta, SharedIndex};
use crate::path::clean_path;
use crate::protocol::{Message, MessageReader, MessageWriter};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct EngineOptions {
	pub compare_by: CompareBy,
	pub scan_interval: Duration,
	/// Bytes per second, `None` for unlimited.
	pub upload_limit: Option<u64>,
	pub download_limit: Option<u64>,
	pub batch_cmd: Option<String>,
	pub batch_args: Vec<String>,
	/// Restart the container process after every uploaded batch with changes.
	pub restart_container: bool,
}

impl Default for EngineOptions {
	fn default() -> Self {
		Self {
			compare_by: CompareBy::default(),
			scan_interval: DEFAULT_SCAN_INTERVAL,
			upload_limit: None,
			download_limit: None,
			batch_cmd: None,
			batch_args: Vec::new(),
			restart_container: false,
		}
	}
}

pub struct SyncEngine {
	root: PathBuf,
	options: EngineOptions,
	upload_excludes: ExcludeMatcher,
	download_excludes: ExcludeMatcher,
	index: SharedIndex,
}

impl SyncEngine {
	pub fn new(
		root: impl Into<PathBuf>,
		options: EngineOptions,
		upload_excludes: ExcludeMatcher,
		download_excludes: ExcludeMatcher,
	) -> Self {
		Self {
			root: root.into(),
			options,
			upload_excludes,
			download_excludes,
			index: Arc::new(Mutex::new(FileIndex::new())),
		}
	}

	pub fn index(&self) -> SharedIndex {
		self.index.clone()
	}

	/// Send local changes until the stream fails.
	///
	/// Nothing is sent before downstream applied its initial batch, so the
	/// first diff already knows what the container has.
	pub async fn run_upstream<R, W>(
		&self,
		reader: R,
		writer: W,
		mut snapshot: watch::Receiver<bool>,
		handle: &ConnectionHandle,
	) -> SyncResult<()>
	where
		R: AsyncRead + Unpin,
		W: AsyncWrite + Unpin,
	{
		snapshot
			.wait_for(|ready| *ready)
			.await
			.map_err(|_| SyncError::protocol("downstream stopped before its initial batch"))?;

		let mut writer = MessageWriter::new(writer, self.options.upload_limit);
		let mut reader = MessageReader::new(reader, None);
		let mut initial = true;

		loop {
			let local = scan_local(
				self.root.clone(),
				self.upload_excludes.clone(),
				self.options.compare_by,
			)
			.await?;
			let mut changes = {
				let known = self.index.lock().await;
				diff(&local, &known, self.options.compare_by)
			};
			// The scan skips upload-excluded files, which must not read as deleted.
			changes
				.removes
				.retain(|path| !self.upload_excludes.is_excluded(path, false));

			if initial || !changes.is_empty() {
				let sent = self.send_batch(&mut writer, &local, &changes).await?;
				wait_ack(&mut reader).await?;
				self.record_sent(&local, sent, &changes.removes).await;

				if self.options.restart_container && !changes.is_empty() {
					info!("restarting container");
					writer.send(&Message::RestartContainer).await?;
					wait_ack(&mut reader).await?;
				}

				if initial {
					info!(root = %self.root.display(), "initial upload done");
					handle.notify(ConnectionEvent::UploadInitialDone).await;
					initial = false;
				}
			}

			tokio::time::sleep(self.options.scan_interval).await;
		}
	}

	async fn send_batch<W: AsyncWrite + Unpin>(
		&self,
		writer: &mut MessageWriter<W>,
		local: &FileIndex,
		changes: &Changes,
	) -> SyncResult<Vec<String>> {
		let mut sent = Vec::with_capacity(changes.uploads.len());
		for path in &changes.uploads {
			let Some(meta) = local.get(path) else { continue };
			let contents = match tokio::fs::read(self.root.join(path)).await {
				Ok(contents) => contents,
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
				Err(e) => return Err(SyncError::io(self.root.join(path), e)),
			};
			debug!(%path, size = contents.len(), "upload");
			writer
				.send(&Message::upload(path.as_str(), meta.mode, meta.mtime, &contents))
				.await?;
			sent.push(path.clone());
		}
		for path in &changes.removes {
			debug!(%path, "remove");
			writer.send(&Message::remove(path.as_str())).await?;
		}
		writer.send(&Message::BatchEnd).await?;
		Ok(sent)
	}

	async fn record_sent(&self, local: &FileIndex, sent: Vec<String>, removed: &[String]) {
		let mut index = self.index.lock().await;
		for path in sent {
			if let Some(meta) = local.get(&path) {
				index.insert(path, meta.clone());
			}
		}
		for path in removed {
			index.remove(path);
		}
	}

	/// Apply remote batches until the stream fails. End of stream is an error.
	pub async fn run_downstream<R>(
		&self,
		reader: R,
		snapshot: watch::Sender<bool>,
		handle: &ConnectionHandle,
	) -> SyncResult<()>
	where
		R: AsyncRead + Unpin,
	{
		let mut reader = MessageReader::new(reader, self.options.download_limit);
		let mut initial = true;
		let mut applied = 0usize;

		loop {
			let message = reader.recv().await?;
			match &message {
				Message::Upload { .. } => {
					if self.apply_upload(&message, initial).await? {
						applied += 1;
					}
				}
				Message::Remove { path } => {
					if self.apply_remove(path).await? {
						applied += 1;
					}
				}
				Message::BatchEnd => {
					if initial {
						initial = false;
						info!(root = %self.root.display(), "initial download done");
						snapshot.send_replace(true);
						handle.notify(ConnectionEvent::DownloadInitialDone).await;
					}
					if applied > 0 {
						self.run_batch_command().await;
					}
					applied = 0;
				}
				Message::Ping => {}
				Message::Ack | Message::RestartContainer => {
					return Err(SyncError::protocol(format!("unexpected {message:?} on downstream")))
				}
			}
		}
	}

	fn local_rel(&self, path: &str) -> SyncResult<String> {
		let rel = clean_path(&path.replace('\\', "/"));
		if rel.starts_with('/') || rel == "." || rel == ".." || rel.starts_with("../") {
			return Err(SyncError::protocol(format!("path {path:?} escapes the sync root")));
		}
		Ok(rel)
	}

	async fn local_meta(&self, dest: &std::path::Path) -> SyncResult<Option<FileMeta>> {
		let meta = match tokio::fs::metadata(dest).await {
			Ok(meta) if meta.is_file() => meta,
			Ok(_) => return Ok(None),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(SyncError::io(dest, e)),
		};
		let mut local = FileMeta::from_metadata(&meta);
		if self.options.compare_by == CompareBy::Checksum {
			let contents = tokio::fs::read(dest).await.map_err(|e| SyncError::io(dest, e))?;
			local = local.with_checksum(&contents);
		}
		Ok(Some(local))
	}

	async fn apply_upload(&self, message: &Message, initial: bool) -> SyncResult<bool> {
		let Message::Upload { path, mode, mtime, .. } = message else {
			return Ok(false);
		};
		let rel = self.local_rel(path)?;
		if self.download_excludes.is_excluded(&rel, false) {
			debug!(path = %rel, "download excluded");
			return Ok(false);
		}

		let contents = message.contents()?;
		let dest = self.root.join(&rel);
		let remote = FileMeta {
			size: contents.len() as u64,
			mtime: *mtime,
			mtime_nanos: 0,
			mode: *mode,
			sha256: (self.options.compare_by == CompareBy::Checksum).then(|| checksum(&contents)),
		};

		if initial {
			if let Some(local) = self.local_meta(&dest).await? {
				if !local.clone().whole_seconds().differs(&remote, self.options.compare_by) {
					self.index.lock().await.insert(rel, local);
					return Ok(false);
				}
				if local.mtime > remote.mtime {
					debug!(path = %rel, "keeping newer local file");
					return Ok(false);
				}
			}
		}

		if let Some(parent) = dest.parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| SyncError::io(parent, e))?;
		}
		tokio::fs::write(&dest, &contents)
			.await
			.map_err(|e| SyncError::io(&dest, e))?;
		set_mode(&dest, *mode).await?;

		let written = tokio::fs::metadata(&dest)
			.await
			.map_err(|e| SyncError::io(&dest, e))?;
		let mut meta = FileMeta::from_metadata(&written);
		if self.options.compare_by == CompareBy::Checksum {
			meta = meta.with_checksum(&contents);
		}
		debug!(path = %rel, size = meta.size, "downloaded");
		self.index.lock().await.insert(rel, meta);
		Ok(true)
	}

	async fn apply_remove(&self, path: &str) -> SyncResult<bool> {
		let rel = self.local_rel(path)?;
		if self.download_excludes.is_excluded(&rel, false) {
			return Ok(false);
		}
		let dest = self.root.join(&rel);
		{
			let mut index = self.index.lock().await;
			let prefix = format!("{rel}/");
			index.retain(|p, _| p != &rel && !p.starts_with(&prefix));
		}

		let result = match tokio::fs::symlink_metadata(&dest).await {
			Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&dest).await,
			Ok(_) => tokio::fs::remove_file(&dest).await,
			Err(e) => Err(e),
		};
		match result {
			Ok(()) => {
				debug!(path = %rel, "removed");
				Ok(true)
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(SyncError::io(dest, e)),
		}
	}

	async fn run_batch_command(&self) {
		let Some(cmd) = self.options.batch_cmd.as_deref().filter(|c| !c.is_empty()) else {
			return;
		};
		debug!(%cmd, "running batch command");
		let status = tokio::process::Command::new(cmd)
			.args(&self.options.batch_args)
			.current_dir(&self.root)
			.kill_on_drop(true)
			.status()
			.await;
		match status {
			Ok(status) if status.success() => {}
			Ok(status) => warn!(%cmd, code = ?status.code(), "batch command failed"),
			Err(e) => warn!(%cmd, error = %e, "couldn't run batch command"),
		}
	}
}

async fn wait_ack<R: AsyncRead + Unpin>(reader: &mut MessageReader<R>) -> SyncResult<()> {
	loop {
		match reader.recv().await? {
			Message::Ack => return Ok(()),
			Message::Ping => {}
			other => {
				return Err(SyncError::protocol(format!(
					"expected ack on upstream, got {other:?}"
				)))
			}
		}
	}
}

#[cfg(unix)]
async fn set_mode(path: &std::path::Path, mode: u32) -> SyncResult<()> {
	use std::os::unix::fs::PermissionsExt;
	if mode == 0 {
		return Ok(());
	}
	tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
		.await
		.map_err(|e| SyncError::io(path, e))
}

#[cfg(not(unix))]
async fn set_mode(_path: &std::path::Path, _mode: u32) -> SyncResult<()> {
	Ok(())
}
