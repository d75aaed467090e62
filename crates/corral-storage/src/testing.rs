// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Test helpers for crates that need a throwaway storage backend.

use crate::sqlite::{create_memory_pool, SqliteStorage};

/// Create an in-memory storage with the schema applied.
///
/// # Panics
///
/// Panics on connection or migration failure; this is a test-only helper.
pub async fn memory_storage() -> SqliteStorage {
	let pool = create_memory_pool()
		.await
		.expect("failed to create in-memory pool");
	let storage = SqliteStorage::new(pool);
	storage
		.run_migrations()
		.await
		.expect("failed to run migrations");
	storage
}
