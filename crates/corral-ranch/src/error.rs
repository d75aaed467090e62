// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use corral_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by the leasing state machine.
///
/// `Queued` is a non-error outcome riding the error channel: the request was
/// parked and the caller should re-poll. The front-end maps it to 404 with a
/// queued marker, like `NotFound`.
#[derive(Debug, Error)]
pub enum RanchError {
	/// No resource matches `(type, state, owner = "")`.
	#[error("no {resource_type} resource available in state {state}")]
	NotFound {
		resource_type: String,
		state: String,
	},

	/// A by-name verb named a resource the broker does not track.
	#[error("resource not found: {0}")]
	ResourceNotFound(String),

	/// Metrics were requested for a type the broker does not track.
	#[error("resource type not found: {0}")]
	TypeNotFound(String),

	/// The request is parked in the queue; re-poll with the same id.
	#[error("request {request_id} is queued for {resource_type}/{state}")]
	Queued {
		request_id: String,
		resource_type: String,
		state: String,
	},

	/// The caller does not hold the lease it claims to hold, or the
	/// resource is held when it was expected to be free.
	#[error("resource {name} is owned by {actual:?}, not {requested:?}")]
	OwnerMismatch {
		name: String,
		requested: String,
		actual: String,
	},

	/// The resource was not in the expected state at commit time.
	#[error("resource {name} is in state {actual}, expected {expected}")]
	StateMismatch {
		name: String,
		expected: String,
		actual: String,
	},

	/// Optimistic version conflicts exhausted the retry budget.
	#[error("storage conflict on {name} after {attempts} attempts")]
	Conflict { name: String, attempts: u32 },

	/// The pool config was rejected; the previous pool is retained.
	#[error(transparent)]
	ConfigInvalid(#[from] corral_core::CoreError),

	/// The pool config file could not be read.
	#[error("failed to read config {path}: {source}")]
	ConfigRead {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("storage unavailable: {0}")]
	Storage(StorageError),
}

impl From<StorageError> for RanchError {
	fn from(e: StorageError) -> Self {
		RanchError::Storage(e)
	}
}

pub type Result<T> = std::result::Result<T, RanchError>;
