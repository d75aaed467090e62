// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! POST /acquire and POST /acquirebystate.

use axum::extract::{Query, State};
use axum::Json;
use corral_core::Resource;
use serde::Deserialize;

use crate::api::AppState;
use crate::error::ServerError;
use crate::routes::require;

// Required parameters default to empty so a missing one produces the
// JSON 400 from `require` rather than an extractor rejection.
#[derive(Debug, Deserialize)]
pub struct AcquireParams {
	#[serde(rename = "type", default)]
	pub resource_type: String,
	#[serde(default)]
	pub state: String,
	#[serde(default)]
	pub dest: String,
	#[serde(default)]
	pub owner: String,
	/// Join the fair queue under this id when nothing is free. Without it
	/// the call is best-effort and never queues.
	pub request_id: Option<String>,
	/// Requested lease term; capped by server policy.
	pub lease_secs: Option<u64>,
}

/// POST /acquire - lease one resource of a type/state pair.
///
/// 200 with the resource on success; 404 when nothing matches, with
/// `queued: true` when the request was parked instead.
pub async fn acquire(
	State(state): State<AppState>,
	Query(params): Query<AcquireParams>,
) -> Result<Json<Resource>, ServerError> {
	require(&params.resource_type, "type")?;
	require(&params.state, "state")?;
	require(&params.dest, "dest")?;
	require(&params.owner, "owner")?;

	let lease = state.lease_policy.effective(params.lease_secs);
	let resource = state
		.ranch
		.acquire(
			&params.resource_type,
			&params.state,
			&params.dest,
			&params.owner,
			lease,
			params.request_id.as_deref(),
		)
		.await?;
	Ok(Json(resource))
}

#[derive(Debug, Deserialize)]
pub struct AcquireByStateParams {
	#[serde(default)]
	pub state: String,
	#[serde(default)]
	pub dest: String,
	#[serde(default)]
	pub owner: String,
	/// Comma-separated resource names.
	#[serde(default)]
	pub names: String,
}

/// POST /acquirebystate - atomically lease exactly the named resources.
///
/// All-or-nothing: 409 when any named resource is not in `state` with an
/// empty owner.
pub async fn acquire_by_state(
	State(state): State<AppState>,
	Query(params): Query<AcquireByStateParams>,
) -> Result<Json<Vec<Resource>>, ServerError> {
	require(&params.state, "state")?;
	require(&params.dest, "dest")?;
	require(&params.owner, "owner")?;

	let names: Vec<String> = params
		.names
		.split(',')
		.map(str::trim)
		.filter(|n| !n.is_empty())
		.map(String::from)
		.collect();
	if names.is_empty() {
		return Err(ServerError::BadRequest(
			"missing required parameter: names".to_string(),
		));
	}

	let resources = state
		.ranch
		.acquire_by_state(&params.state, &params.dest, &params.owner, &names)
		.await
		.map_err(ServerError::from_batch_acquire)?;
	Ok(Json(resources))
}
