// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error responses for the verb routes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use corral_ranch::RanchError;
use serde_json::json;

/// HTTP-facing error. All bodies are `{ "error": … }` JSON; a parked
/// acquire additionally carries `"queued": true` so clients can tell a
/// missing pool from a fair-queue wait.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	#[error("{0}")]
	BadRequest(String),

	/// A batch precondition failed (409 on the wire).
	#[error("{0}")]
	Conflict(String),

	#[error(transparent)]
	Ranch(#[from] RanchError),
}

impl ServerError {
	/// Map batch-acquire preconditions to 409 while leaving genuine
	/// not-found as 404.
	#[must_use]
	pub fn from_batch_acquire(e: RanchError) -> Self {
		match e {
			RanchError::StateMismatch { .. } | RanchError::OwnerMismatch { .. } => {
				ServerError::Conflict(e.to_string())
			}
			e => ServerError::Ranch(e),
		}
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		let (status, body) = match &self {
			ServerError::BadRequest(message) => {
				(StatusCode::BAD_REQUEST, json!({ "error": message }))
			}
			ServerError::Conflict(message) => (StatusCode::CONFLICT, json!({ "error": message })),
			ServerError::Ranch(e) => match e {
				RanchError::NotFound { .. }
				| RanchError::ResourceNotFound(_)
				| RanchError::TypeNotFound(_) => {
					(StatusCode::NOT_FOUND, json!({ "error": e.to_string() }))
				}
				RanchError::Queued { request_id, .. } => (
					StatusCode::NOT_FOUND,
					json!({
						"error": e.to_string(),
						"queued": true,
						"request_id": request_id,
					}),
				),
				RanchError::OwnerMismatch { .. } | RanchError::StateMismatch { .. } => (
					StatusCode::PRECONDITION_FAILED,
					json!({ "error": e.to_string() }),
				),
				RanchError::Conflict { .. } => {
					(StatusCode::CONFLICT, json!({ "error": e.to_string() }))
				}
				RanchError::ConfigInvalid(_) | RanchError::ConfigRead { .. } => {
					(StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }))
				}
				RanchError::Storage(_) => (
					StatusCode::SERVICE_UNAVAILABLE,
					json!({ "error": e.to_string() }),
				),
			},
		};

		if status.is_server_error() {
			tracing::error!(status = %status, error = %self, "request failed");
		} else {
			tracing::debug!(status = %status, error = %self, "request rejected");
		}
		(status, Json(body)).into_response()
	}
}
