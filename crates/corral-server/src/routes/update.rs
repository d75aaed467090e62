// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! POST /update.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::Json;
use corral_core::{Resource, UserData};
use serde::Deserialize;

use crate::api::AppState;
use crate::error::ServerError;
use crate::routes::require;

#[derive(Debug, Deserialize)]
pub struct UpdateParams {
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub owner: String,
	#[serde(default)]
	pub state: String,
}

/// POST /update - heartbeat a lease.
///
/// Refreshes `last_update`, extends the expiration by the lease term
/// granted at acquire, and merges the optional JSON body into the
/// resource's user data (an empty value deletes the key).
pub async fn update(
	State(state): State<AppState>,
	Query(params): Query<UpdateParams>,
	body: Bytes,
) -> Result<Json<Resource>, ServerError> {
	require(&params.name, "name")?;
	require(&params.owner, "owner")?;
	require(&params.state, "state")?;

	let user_data: UserData = if body.is_empty() {
		UserData::default()
	} else {
		serde_json::from_slice(&body)
			.map_err(|e| ServerError::BadRequest(format!("invalid user data body: {e}")))?
	};
	let resource = state
		.ranch
		.update(&params.name, &params.owner, &params.state, &user_data)
		.await?;
	Ok(Json(resource))
}
