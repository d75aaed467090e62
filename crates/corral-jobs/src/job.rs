// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use crate::context::JobContext;
use crate::error::Result;

/// A unit of periodic background work.
#[async_trait]
pub trait Job: Send + Sync {
	/// Stable identifier, used as the health key.
	fn id(&self) -> &str;

	/// Human-readable name.
	fn name(&self) -> &str;

	/// One-line description for health output.
	fn description(&self) -> &str;

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput>;
}

/// What a successful run produced, for logging and health reporting.
#[derive(Debug, Clone)]
pub struct JobOutput {
	pub message: String,
}

impl JobOutput {
	#[must_use]
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
		}
	}
}
