// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! POST /reset.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::Json;
use chrono::Duration;
use serde::Deserialize;

use crate::api::AppState;
use crate::error::ServerError;
use crate::routes::require;

#[derive(Debug, Deserialize)]
pub struct ResetParams {
	#[serde(rename = "type", default)]
	pub resource_type: String,
	#[serde(default)]
	pub state: String,
	#[serde(default)]
	pub dest: String,
	/// Grace period: only leases expired at least this many seconds ago
	/// are reset. Defaults to zero (every expired lease).
	#[serde(default)]
	pub expire_secs: u64,
}

/// POST /reset - clear expired leases of a type/state pair.
///
/// Returns name → prior owner for every transitioned resource.
pub async fn reset(
	State(state): State<AppState>,
	Query(params): Query<ResetParams>,
) -> Result<Json<BTreeMap<String, String>>, ServerError> {
	require(&params.resource_type, "type")?;
	require(&params.state, "state")?;
	require(&params.dest, "dest")?;

	let expire_before =
		chrono::Utc::now() - Duration::seconds(params.expire_secs.min(i64::MAX as u64) as i64);
	let reset = state
		.ranch
		.reset(
			&params.resource_type,
			&params.state,
			expire_before,
			&params.dest,
		)
		.await?;
	Ok(Json(reset))
}
