// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP front-end for the Corral resource broker.
//!
//! Translates the external verbs — acquire, acquire-by-state, release,
//! update, reset, metric — into calls on the ranch, wires up the periodic
//! maintenance jobs (lease reaper, request GC), and reconciles the pool
//! config on file changes and storage events.

pub mod api;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod watcher;

pub use api::{create_router, AppState, LeasePolicy};
pub use error::ServerError;
