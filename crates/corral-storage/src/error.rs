// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	#[error("database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("already exists: {0}")]
	AlreadyExists(String),

	#[error("version conflict on {name}: expected version {expected}")]
	Conflict { name: String, expected: u64 },

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("internal: {0}")]
	Internal(String),
}

impl StorageError {
	/// Whether the caller should re-read the object and retry the write.
	#[must_use]
	pub fn is_conflict(&self) -> bool {
		matches!(self, StorageError::Conflict { .. })
	}
}

pub type Result<T> = std::result::Result<T, StorageError>;
