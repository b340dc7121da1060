// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! JSON lines spoken with the sync agent.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::Instant;

use crate::error::{SyncError, SyncResult};

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
	Upload {
		path: String,
		mode: u32,
		mtime: i64,
		data: String,
	},
	Remove {
		path: String,
	},
	BatchEnd,
	/// Ask the agent to restart the container's main process. Acknowledged
	/// like a batch.
	RestartContainer,
	Ack,
	Ping,
}

impl Message {
	pub fn upload(path: impl Into<String>, mode: u32, mtime: i64, contents: &[u8]) -> Self {
		Message::Upload {
			path: path.into(),
			mode,
			mtime,
			data: STANDARD.encode(contents),
		}
	}

	pub fn remove(path: impl Into<String>) -> Self {
		Message::Remove { path: path.into() }
	}

	/// Decoded file contents of an upload.
	pub fn contents(&self) -> SyncResult<Vec<u8>> {
		match self {
			Message::Upload { path, data, .. } => STANDARD
				.decode(data)
				.map_err(|e| SyncError::protocol(format!("invalid data for {path}: {e}"))),
			_ => Ok(Vec::new()),
		}
	}
}

/// Limits a stream to `bytes_per_sec`.
#[derive(Debug)]
pub struct Throttle {
	bytes_per_sec: u64,
	started: Instant,
	sent: u64,
}

impl Throttle {
	pub fn new(bytes_per_sec: u64) -> Self {
		Self {
			bytes_per_sec: bytes_per_sec.max(1),
			started: Instant::now(),
			sent: 0,
		}
	}

	/// Account for `bytes` and sleep until the average rate is back under the cap.
	pub async fn consume(&mut self, bytes: usize) {
		self.sent += bytes as u64;
		let due = Duration::from_secs_f64(self.sent as f64 / self.bytes_per_sec as f64);
		let elapsed = self.started.elapsed();
		if due > elapsed {
			tokio::time::sleep(due - elapsed).await;
		}
	}
}

pub struct MessageWriter<W> {
	inner: W,
	throttle: Option<Throttle>,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
	pub fn new(inner: W, bytes_per_sec: Option<u64>) -> Self {
		Self {
			inner,
			throttle: bytes_per_sec.map(Throttle::new),
		}
	}

	pub async fn send(&mut self, message: &Message) -> SyncResult<()> {
		let mut line = serde_json::to_vec(message).map_err(|e| SyncError::protocol(e.to_string()))?;
		line.push(b'\n');
		if let Some(throttle) = &mut self.throttle {
			throttle.consume(line.len()).await;
		}
		self.inner.write_all(&line).await?;
		self.inner.flush().await?;
		Ok(())
	}

	pub async fn close(&mut self) -> SyncResult<()> {
		self.inner.shutdown().await?;
		Ok(())
	}
}

pub struct MessageReader<R> {
	inner: BufReader<R>,
	throttle: Option<Throttle>,
	line: String,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
	pub fn new(inner: R, bytes_per_sec: Option<u64>) -> Self {
		Self {
			inner: BufReader::new(inner),
			throttle: bytes_per_sec.map(Throttle::new),
			line: String::new(),
		}
	}

	/// Next message; `SyncError::Eof` when the agent closed its stdout.
	pub async fn recv(&mut self) -> SyncResult<Message> {
		loop {
			self.line.clear();
			let n = self.inner.read_line(&mut self.line).await?;
			if n == 0 {
				return Err(SyncError::Eof);
			}
			if let Some(throttle) = &mut self.throttle {
				throttle.consume(n).await;
			}
			let line = self.line.trim();
			if line.is_empty() {
				continue;
			}
			return serde_json::from_str(line)
				.map_err(|e| SyncError::protocol(format!("invalid message {line:?}: {e}")));
		}
	}
}
