// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("job was cancelled")]
	Cancelled,

	#[error("job not found: {0}")]
	NotFound(String),

	#[error("job failed: {message}")]
	Failed { message: String, retryable: bool },
}

impl JobError {
	#[must_use]
	pub fn is_retryable(&self) -> bool {
		matches!(self, JobError::Failed { retryable: true, .. })
	}
}

pub type Result<T> = std::result::Result<T, JobError>;
