// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{SelectorError, SelectorResult};

pub const DEFAULT_POD_QUESTION: &str = "Select a pod";
pub const DEFAULT_CONTAINER_QUESTION: &str = "Select a container";

/// Asks the user to choose one of several candidates.
///
/// Implementations may block; callers run them off the async runtime.
pub trait Picker: Send + Sync {
	/// Returns the index of the chosen option.
	fn pick(&self, question: &str, options: &[String]) -> SelectorResult<usize>;
}

/// Terminal picker backed by dialoguer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPicker;

impl Picker for TerminalPicker {
	fn pick(&self, question: &str, options: &[String]) -> SelectorResult<usize> {
		dialoguer::Select::new()
			.with_prompt(question)
			.items(options)
			.default(0)
			.interact()
			.map_err(|e| SelectorError::Pick {
				message: e.to_string(),
			})
	}
}
