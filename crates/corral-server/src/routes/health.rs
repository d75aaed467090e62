// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Health HTTP handler.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use corral_jobs::{HealthState, JobsHealthStatus};
use serde::Serialize;

use crate::api::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub status: HealthState,
	pub timestamp: String,
	pub pending_requests: usize,
	pub jobs: JobsHealthStatus,
}

/// GET /health - broker liveness plus background-job health.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
	let jobs = state.scheduler.health_status();
	let pending_requests = state.ranch.pending_requests().await;

	let status = jobs.status;
	let response = HealthResponse {
		status,
		timestamp: chrono::Utc::now().to_rfc3339(),
		pending_requests,
		jobs,
	};

	let http_status = match status {
		HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
		HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
	};

	(http_status, Json(response))
}
