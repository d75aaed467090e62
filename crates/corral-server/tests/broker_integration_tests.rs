// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Integration tests for the verb routes.
//!
//! Tests cover:
//! - Acquire / release round trips over the wire
//! - Queued-request signalling on contended acquires
//! - Batch acquire preconditions
//! - Heartbeat user-data merging
//! - Reset of expired leases
//! - Metric and health endpoints

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use corral_core::PoolConfig;
use corral_jobs::JobScheduler;
use corral_ranch::{Ranch, SystemClock};
use corral_server::{create_router, AppState, LeasePolicy};
use corral_storage::testing::memory_storage;
use http_body_util::BodyExt;
use tower::ServiceExt;

const POOL: &str = r"
resources:
  - {name: r1, type: t, state: free}
  - {name: r2, type: t, state: free}
";

async fn setup(config: &str) -> (Router, Arc<Ranch>) {
	let storage = Arc::new(memory_storage().await);
	let ranch = Arc::new(Ranch::new(
		storage,
		Arc::new(SystemClock),
		Duration::from_secs(30),
	));
	ranch.load().await.unwrap();
	ranch
		.sync_config(PoolConfig::from_yaml(config).unwrap())
		.await
		.unwrap();

	let state = AppState {
		ranch: Arc::clone(&ranch),
		scheduler: Arc::new(JobScheduler::new()),
		lease_policy: LeasePolicy {
			default: Duration::from_secs(300),
			max: Duration::from_secs(3600),
		},
	};
	(create_router(state), ranch)
}

async fn post(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
	let response = app
		.clone()
		.oneshot(
			Request::builder()
				.method("POST")
				.uri(uri)
				.body(Body::empty())
				.unwrap(),
		)
		.await
		.unwrap();
	let status = response.status();
	let bytes = response.into_body().collect().await.unwrap().to_bytes();
	let body = if bytes.is_empty() {
		serde_json::Value::Null
	} else {
		serde_json::from_slice(&bytes).unwrap()
	};
	(status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
	let response = app
		.clone()
		.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
		.await
		.unwrap();
	let status = response.status();
	let bytes = response.into_body().collect().await.unwrap().to_bytes();
	(status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_acquire_release_roundtrip() {
	let (app, _ranch) = setup(POOL).await;

	let (status, body) = post(&app, "/acquire?type=t&state=free&dest=busy&owner=A").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["name"], "r1");
	assert_eq!(body["state"], "busy");
	assert_eq!(body["owner"], "A");
	assert!(body["expiration"].is_string());

	let (status, _) = post(&app, "/release?name=r1&owner=A&dest=dirty").await;
	assert_eq!(status, StatusCode::OK);

	let (status, body) = get(&app, "/metric?type=t").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["current"]["dirty"], 1);
	assert_eq!(body["current"]["free"], 1);
}

#[tokio::test]
async fn test_acquire_missing_parameter_is_bad_request() {
	let (app, _ranch) = setup(POOL).await;

	let (status, body) = post(&app, "/acquire?type=t&state=free&dest=busy").await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_acquire_exhausted_pool_is_not_found() {
	let (app, _ranch) = setup(POOL).await;

	post(&app, "/acquire?type=t&state=free&dest=busy&owner=A").await;
	post(&app, "/acquire?type=t&state=free&dest=busy&owner=B").await;

	let (status, body) = post(&app, "/acquire?type=t&state=free&dest=busy&owner=C").await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert!(body.get("queued").is_none());
}

#[tokio::test]
async fn test_acquire_with_request_id_reports_queued() {
	let (app, _ranch) = setup(POOL).await;

	let (status, body) =
		post(&app, "/acquire?type=t&state=free&dest=busy&owner=A&request_id=ri-1").await;
	// A first-time request parks for one poll cycle.
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(body["queued"], true);
	assert_eq!(body["request_id"], "ri-1");

	// The second poll is served.
	let (status, body) =
		post(&app, "/acquire?type=t&state=free&dest=busy&owner=A&request_id=ri-1").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["owner"], "A");
}

#[tokio::test]
async fn test_acquire_by_state_transitions_named_resources() {
	let (app, _ranch) = setup(POOL).await;

	let (status, body) = post(
		&app,
		"/acquirebystate?state=free&dest=busy&owner=batch&names=r1,r2",
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	let resources = body.as_array().unwrap();
	assert_eq!(resources.len(), 2);
	assert!(resources.iter().all(|r| r["owner"] == "batch"));
}

#[tokio::test]
async fn test_acquire_by_state_precondition_failure_is_conflict() {
	let (app, _ranch) = setup(POOL).await;
	post(&app, "/acquire?type=t&state=free&dest=busy&owner=A").await;

	let (status, _) = post(
		&app,
		"/acquirebystate?state=free&dest=busy&owner=batch&names=r1,r2",
	)
	.await;
	assert_eq!(status, StatusCode::CONFLICT);

	// r2 must be untouched by the failed batch.
	let (_, body) = get(&app, "/metric?type=t").await;
	assert_eq!(body["current"]["free"], 1);
}

#[tokio::test]
async fn test_release_by_non_owner_is_precondition_failed() {
	let (app, _ranch) = setup(POOL).await;
	post(&app, "/acquire?type=t&state=free&dest=busy&owner=A").await;

	let (status, _) = post(&app, "/release?name=r1&owner=B&dest=dirty").await;
	assert_eq!(status, StatusCode::PRECONDITION_FAILED);

	let (status, _) = post(&app, "/release?name=ghost&owner=A&dest=dirty").await;
	assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_merges_user_data() {
	let (app, _ranch) = setup(POOL).await;
	post(&app, "/acquire?type=t&state=free&dest=busy&owner=A").await;

	let response = app
		.clone()
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/update?name=r1&owner=A&state=busy")
				.header("content-type", "application/json")
				.body(Body::from(r#"{"phase": "deploy"}"#))
				.unwrap(),
		)
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let bytes = response.into_body().collect().await.unwrap().to_bytes();
	let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
	assert_eq!(body["user_data"]["phase"], "deploy");

	// Heartbeat against the wrong state is rejected.
	let (status, _) = post(&app, "/update?name=r1&owner=A&state=free").await;
	assert_eq!(status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_reset_reclaims_expired_leases() {
	let (app, _ranch) = setup(POOL).await;

	// A zero-length lease expires immediately.
	post(&app, "/acquire?type=t&state=free&dest=busy&owner=A&lease_secs=0").await;
	tokio::time::sleep(Duration::from_millis(20)).await;

	let (status, body) = post(&app, "/reset?type=t&state=busy&dest=dirty").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["r1"], "A");

	let (_, body) = get(&app, "/metric?type=t").await;
	assert_eq!(body["current"]["dirty"], 1);
}

#[tokio::test]
async fn test_metric_unknown_type_is_not_found() {
	let (app, _ranch) = setup(POOL).await;
	let (status, _) = get(&app, "/metric?type=nope").await;
	assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_lists_every_type() {
	let (app, _ranch) = setup(
		r"
resources:
  - {name: r1, type: t, state: free}
dynamic-resources:
  - {type: d, initial-state: free, min-count: 1, max-count: 2}
",
	)
	.await;

	let (status, body) = get(&app, "/metrics").await;
	assert_eq!(status, StatusCode::OK);
	let types: Vec<&str> = body
		.as_array()
		.unwrap()
		.iter()
		.map(|m| m["type"].as_str().unwrap())
		.collect();
	assert_eq!(types, ["d", "t"]);
}

#[tokio::test]
async fn test_health_reports_ok() {
	let (app, _ranch) = setup(POOL).await;

	let (status, body) = get(&app, "/health").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["status"], "healthy");
	assert_eq!(body["pending_requests"], 0);
}
