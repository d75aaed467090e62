// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! GET /metric and GET /metrics.

use axum::extract::{Query, State};
use axum::Json;
use corral_ranch::ResourceMetric;
use serde::Deserialize;

use crate::api::AppState;
use crate::error::ServerError;
use crate::routes::require;

#[derive(Debug, Deserialize)]
pub struct MetricParams {
	#[serde(rename = "type", default)]
	pub resource_type: String,
}

/// GET /metric?type=… - per-state and per-owner counts for one type.
pub async fn metric(
	State(state): State<AppState>,
	Query(params): Query<MetricParams>,
) -> Result<Json<ResourceMetric>, ServerError> {
	require(&params.resource_type, "type")?;
	let metric = state.ranch.metric(&params.resource_type).await?;
	Ok(Json(metric))
}

/// GET /metrics - snapshot of every type the broker tracks.
pub async fn all_metrics(State(state): State<AppState>) -> Json<Vec<ResourceMetric>> {
	Json(state.ranch.all_metrics().await)
}
