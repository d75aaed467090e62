// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use corral_jobs::{Job, JobContext, JobError, JobOutput};
use corral_ranch::Ranch;
use tracing::instrument;

/// Collects queued requests whose client stopped polling.
pub struct RequestGcJob {
	ranch: Arc<Ranch>,
}

impl RequestGcJob {
	pub fn new(ranch: Arc<Ranch>) -> Self {
		Self { ranch }
	}
}

#[async_trait]
impl Job for RequestGcJob {
	fn id(&self) -> &str {
		"request-gc"
	}

	fn name(&self) -> &str {
		"Request GC"
	}

	fn description(&self) -> &str {
		"Expire queued requests past their TTL"
	}

	#[instrument(skip(self, ctx), fields(job_id = "request-gc"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.cancellation_token.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let removed = self.ranch.prune_requests().await;
		Ok(JobOutput::new(format!("Expired {removed} stale requests")))
	}
}
