// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The storage capability the broker core is written against.

use async_trait::async_trait;
use corral_core::{DynamicResourceLifeCycle, Resource};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::event::StorageEvent;

/// An object together with the version token storage assigned to it.
///
/// The token is opaque to callers beyond equality: pass it back on update or
/// delete to assert the object has not moved underneath you.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
	pub version: u64,
	pub item: T,
}

impl<T> Versioned<T> {
	#[must_use]
	pub fn new(version: u64, item: T) -> Self {
		Self { version, item }
	}
}

/// Typed CRUD with optimistic concurrency over the two stored object kinds,
/// plus a watch stream of change events.
///
/// `update_*` and `delete_*` fail with a conflict when `expected_version`
/// no longer matches the stored version; the caller re-reads and retries.
#[async_trait]
pub trait Storage: Send + Sync {
	async fn get_resource(&self, name: &str) -> Result<Option<Versioned<Resource>>>;
	async fn list_resources(&self) -> Result<Vec<Versioned<Resource>>>;
	async fn create_resource(&self, resource: &Resource) -> Result<Versioned<Resource>>;
	async fn update_resource(
		&self,
		resource: &Resource,
		expected_version: u64,
	) -> Result<Versioned<Resource>>;
	async fn delete_resource(&self, name: &str, expected_version: u64) -> Result<()>;

	async fn get_lifecycle(
		&self,
		resource_type: &str,
	) -> Result<Option<Versioned<DynamicResourceLifeCycle>>>;
	async fn list_lifecycles(&self) -> Result<Vec<Versioned<DynamicResourceLifeCycle>>>;
	async fn create_lifecycle(
		&self,
		lifecycle: &DynamicResourceLifeCycle,
	) -> Result<Versioned<DynamicResourceLifeCycle>>;
	async fn update_lifecycle(
		&self,
		lifecycle: &DynamicResourceLifeCycle,
		expected_version: u64,
	) -> Result<Versioned<DynamicResourceLifeCycle>>;
	async fn delete_lifecycle(&self, resource_type: &str, expected_version: u64) -> Result<()>;

	/// Subscribe to change events. Events are emitted after the mutation has
	/// been accepted by the store.
	fn watch(&self) -> broadcast::Receiver<StorageEvent>;
}
