// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use corral_jobs::{Job, JobContext, JobError, JobOutput};
use corral_ranch::{Ranch, RanchError};
use tracing::instrument;

/// Moves expired leases to the dirty state so the pool recycles them.
///
/// The sweep period must be strictly less than the minimum lease duration
/// or released resources are not recycled in time; the server enforces that
/// at startup.
pub struct ReaperJob {
	ranch: Arc<Ranch>,
	dirty_state: String,
}

impl ReaperJob {
	pub fn new(ranch: Arc<Ranch>, dirty_state: impl Into<String>) -> Self {
		Self {
			ranch,
			dirty_state: dirty_state.into(),
		}
	}
}

#[async_trait]
impl Job for ReaperJob {
	fn id(&self) -> &str {
		"lease-reaper"
	}

	fn name(&self) -> &str {
		"Lease Reaper"
	}

	fn description(&self) -> &str {
		"Reclaim resources whose lease expired without a release"
	}

	#[instrument(skip(self, ctx), fields(job_id = "lease-reaper"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.cancellation_token.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let reaped = self
			.ranch
			.reap(&self.dirty_state)
			.await
			.map_err(|e| JobError::Failed {
				message: e.to_string(),
				retryable: matches!(e, RanchError::Storage(_)),
			})?;

		Ok(JobOutput::new(format!(
			"Reclaimed {} expired leases",
			reaped.len()
		)))
	}
}
