// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delay between failed restart attempts.

use std::time::Duration;

pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
	pub base_delay: Duration,
	pub max_delay: Duration,
	/// 1.0 keeps the delay fixed.
	pub factor: f64,
	/// Scale each delay by a random factor in `[0.5, 1.5)`.
	pub jitter: bool,
}

impl Default for BackoffConfig {
	fn default() -> Self {
		Self {
			base_delay: DEFAULT_RESTART_DELAY,
			max_delay: DEFAULT_RESTART_DELAY,
			factor: 1.0,
			jitter: false,
		}
	}
}

/// Unbounded back-off sequence; there is no attempt limit.
#[derive(Debug, Clone)]
pub struct Backoff {
	config: BackoffConfig,
	attempt: u32,
}

impl Backoff {
	pub fn new(config: BackoffConfig) -> Self {
		Self { config, attempt: 0 }
	}

	pub fn attempt(&self) -> u32 {
		self.attempt
	}

	pub fn reset(&mut self) {
		self.attempt = 0;
	}

	pub fn next_delay(&mut self) -> Duration {
		let delay = calculate_delay(&self.config, self.attempt);
		self.attempt = self.attempt.saturating_add(1);
		delay
	}
}

fn calculate_delay(cfg: &BackoffConfig, attempt: u32) -> Duration {
	let exponent = attempt.min(32) as i32;
	let exponential = cfg.base_delay.as_secs_f64() * cfg.factor.max(1.0).powi(exponent);
	let capped = exponential.min(cfg.max_delay.max(cfg.base_delay).as_secs_f64());

	let delay = if cfg.jitter {
		capped * (0.5 + fastrand::f64())
	} else {
		capped
	};
	Duration::from_secs_f64(delay)
}
