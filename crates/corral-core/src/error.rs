// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
	#[error("invalid config: {0}")]
	InvalidConfig(String),

	#[error("failed to parse config: {0}")]
	Parse(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
