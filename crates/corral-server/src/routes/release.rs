// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! POST /release.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::api::AppState;
use crate::error::ServerError;
use crate::routes::require;

#[derive(Debug, Deserialize)]
pub struct ReleaseParams {
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub owner: String,
	#[serde(default)]
	pub dest: String,
}

/// POST /release - end a lease and move the resource to `dest`.
///
/// 404 for an unknown resource, 412 when the caller is not the owner.
pub async fn release(
	State(state): State<AppState>,
	Query(params): Query<ReleaseParams>,
) -> Result<StatusCode, ServerError> {
	require(&params.name, "name")?;
	require(&params.owner, "owner")?;
	require(&params.dest, "dest")?;

	state
		.ranch
		.release(&params.name, &params.owner, &params.dest)
		.await?;
	Ok(StatusCode::OK)
}
