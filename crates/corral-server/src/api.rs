// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Application state and router construction.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use corral_jobs::JobScheduler;
use corral_ranch::Ranch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;

/// Bounds on client-supplied lease terms.
#[derive(Debug, Clone, Copy)]
pub struct LeasePolicy {
	pub default: Duration,
	pub max: Duration,
}

impl LeasePolicy {
	/// The lease term to grant: the client's ask capped at `max`, or
	/// `default` when the client did not ask.
	#[must_use]
	pub fn effective(&self, requested_secs: Option<u64>) -> Duration {
		match requested_secs {
			Some(secs) => Duration::from_secs(secs).min(self.max),
			None => self.default,
		}
	}
}

/// Shared state for the verb handlers.
#[derive(Clone)]
pub struct AppState {
	pub ranch: Arc<Ranch>,
	pub scheduler: Arc<JobScheduler>,
	pub lease_policy: LeasePolicy,
}

/// Build the verb router.
pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/acquire", post(routes::acquire::acquire))
		.route("/acquirebystate", post(routes::acquire::acquire_by_state))
		.route("/release", post(routes::release::release))
		.route("/update", post(routes::update::update))
		.route("/reset", post(routes::reset::reset))
		.route("/metric", get(routes::metric::metric))
		.route("/metrics", get(routes::metric::all_metrics))
		.route("/health", get(routes::health::health_check))
		.layer(TraceLayer::new_for_http())
		.layer(
			CorsLayer::new()
				.allow_origin(Any)
				.allow_methods(Any)
				.allow_headers(Any),
		)
		.with_state(state)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_lease_policy_defaults_and_caps() {
		let policy = LeasePolicy {
			default: Duration::from_secs(300),
			max: Duration::from_secs(3600),
		};

		assert_eq!(policy.effective(None), Duration::from_secs(300));
		assert_eq!(policy.effective(Some(60)), Duration::from_secs(60));
		assert_eq!(policy.effective(Some(86400)), Duration::from_secs(3600));
	}
}
