// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Config reconciliation and dynamic class management.
//!
//! The reconciler folds the declarative pool config into the live catalog:
//! static resources are created or tombstoned by diff, dynamic classes are
//! upserted and then sized to their `[min_count, max_count]` targets. An
//! owned resource is never touched — removal converges through the
//! owner-clear storage event, which re-triggers reconciliation after the
//! lease ends.
//!
//! Reconciliations serialize on the registry write lock, so at most one is
//! ever in flight.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use corral_core::{state, DynamicResourceLifeCycle, PoolConfig, Resource};
use corral_storage::{StorageError, Versioned};
use uuid::Uuid;

use crate::error::{RanchError, Result};
use crate::ranch::{Ranch, Registry};

impl Ranch {
	/// Read, parse, and fold the pool config file into the catalog.
	pub async fn sync_config_file(&self, path: impl AsRef<Path>) -> Result<()> {
		let path = path.as_ref();
		let document =
			tokio::fs::read_to_string(path)
				.await
				.map_err(|source| RanchError::ConfigRead {
					path: path.display().to_string(),
					source,
				})?;
		let config = PoolConfig::from_yaml(&document)?;
		self.sync_config(config).await
	}

	/// Fold a pool config into the catalog.
	///
	/// A rejected config leaves the previous pool untouched. Storage
	/// conflicts on individual objects are skipped; the next reconciliation
	/// converges.
	#[tracing::instrument(skip(self, config), fields(
		static_resources = config.resources.len(),
		dynamic_classes = config.dynamic_resources.len(),
	))]
	pub async fn sync_config(&self, config: PoolConfig) -> Result<()> {
		config.validate()?;
		let now = self.clock.now();
		let mut registry = self.inner.write().await;

		self.sync_static_resources(&mut registry, &config, now).await?;
		self.sync_lifecycles(&mut registry, &config).await?;

		let declared: BTreeSet<String> = config
			.dynamic_resources
			.iter()
			.map(|e| e.resource_type.clone())
			.collect();
		let types: Vec<String> = registry.lifecycles.keys().cloned().collect();
		for resource_type in &types {
			self.reconcile_lifecycle(
				&mut registry,
				resource_type,
				!declared.contains(resource_type),
				now,
			)
			.await?;
		}

		self.sweep_tombstones(&mut registry).await?;
		tracing::debug!("config sync complete");
		Ok(())
	}

	/// Create declared static resources that are missing and tombstone
	/// unowned stored resources the config no longer declares.
	async fn sync_static_resources(
		&self,
		registry: &mut Registry,
		config: &PoolConfig,
		now: DateTime<Utc>,
	) -> Result<()> {
		for entry in &config.resources {
			if registry.resources.contains_key(&entry.name) {
				continue;
			}
			let mut resource =
				Resource::new(&entry.name, &entry.resource_type, &entry.state, now);
			resource.user_data = entry.user_data.clone();

			match self.storage.create_resource(&resource).await {
				Ok(stored) => {
					tracing::info!(name = %entry.name, resource_type = %entry.resource_type, "static resource created");
					registry.resources.insert(entry.name.clone(), stored);
				}
				Err(StorageError::AlreadyExists(_)) => {
					self.refresh_resource(registry, &entry.name).await?;
				}
				Err(e) => return Err(e.into()),
			}
		}

		let declared: BTreeSet<&str> =
			config.resources.iter().map(|e| e.name.as_str()).collect();
		// A type is dynamic if either the new config or a still-stored
		// lifecycle claims it; those resources belong to the class manager.
		let dynamic_types: BTreeSet<String> = config
			.dynamic_resources
			.iter()
			.map(|e| e.resource_type.clone())
			.chain(registry.lifecycles.keys().cloned())
			.collect();

		let strays: Vec<Versioned<Resource>> = registry
			.resources
			.values()
			.filter(|v| {
				!declared.contains(v.item.name.as_str())
					&& !dynamic_types.contains(&v.item.resource_type)
					&& !v.item.is_owned()
					&& !state::is_tombstone(&v.item.state)
			})
			.cloned()
			.collect();

		for v in strays {
			self.tombstone_resource(registry, v, now).await?;
		}
		Ok(())
	}

	/// Upsert declared lifecycle records and scale retired ones to zero.
	/// The record of a retired class survives until its population drains.
	async fn sync_lifecycles(
		&self,
		registry: &mut Registry,
		config: &PoolConfig,
	) -> Result<()> {
		for entry in &config.dynamic_resources {
			let lifecycle = entry.clone().into_lifecycle();
			match registry.lifecycles.get(&lifecycle.resource_type) {
				None => match self.storage.create_lifecycle(&lifecycle).await {
					Ok(stored) => {
						tracing::info!(resource_type = %lifecycle.resource_type, "dynamic class registered");
						registry
							.lifecycles
							.insert(lifecycle.resource_type.clone(), stored);
					}
					Err(StorageError::AlreadyExists(_)) => {
						self.refresh_lifecycle(registry, &lifecycle.resource_type)
							.await?;
					}
					Err(e) => return Err(e.into()),
				},
				Some(current) if current.item != lifecycle => {
					let version = current.version;
					match self.storage.update_lifecycle(&lifecycle, version).await {
						Ok(stored) => {
							registry
								.lifecycles
								.insert(lifecycle.resource_type.clone(), stored);
						}
						Err(e) if e.is_conflict() => {
							self.refresh_lifecycle(registry, &lifecycle.resource_type)
								.await?;
						}
						Err(e) => return Err(e.into()),
					}
				}
				Some(_) => {}
			}
		}

		let declared: BTreeSet<&str> = config
			.dynamic_resources
			.iter()
			.map(|e| e.resource_type.as_str())
			.collect();
		let retired: Vec<Versioned<DynamicResourceLifeCycle>> = registry
			.lifecycles
			.values()
			.filter(|v| {
				!declared.contains(v.item.resource_type.as_str())
					&& (v.item.min_count != 0 || v.item.max_count != 0)
			})
			.cloned()
			.collect();

		for v in retired {
			let mut lifecycle = v.item.clone();
			lifecycle.min_count = 0;
			lifecycle.max_count = 0;
			tracing::info!(resource_type = %lifecycle.resource_type, "dynamic class retired, draining");
			match self.storage.update_lifecycle(&lifecycle, v.version).await {
				Ok(stored) => {
					registry
						.lifecycles
						.insert(lifecycle.resource_type.clone(), stored);
				}
				Err(e) if e.is_conflict() => {
					self.refresh_lifecycle(registry, &lifecycle.resource_type)
						.await?;
				}
				Err(e) => return Err(e.into()),
			}
		}
		Ok(())
	}

	/// Size one dynamic class to its targets: age out lifespanned idle
	/// instances, materialize up to `min_count`, tombstone down to
	/// `max_count` (unowned only), delete drained tombstones, and drop a
	/// retired class record once its population reaches zero.
	async fn reconcile_lifecycle(
		&self,
		registry: &mut Registry,
		resource_type: &str,
		retired: bool,
		now: DateTime<Utc>,
	) -> Result<()> {
		let Some(lifecycle) = registry.lifecycles.get(resource_type).cloned() else {
			return Ok(());
		};

		let aged_out: Vec<Versioned<Resource>> = registry
			.resources
			.values()
			.filter(|v| {
				v.item.resource_type == resource_type
					&& !v.item.is_owned()
					&& !state::is_tombstone(&v.item.state)
					&& v.item.is_expired(now)
			})
			.cloned()
			.collect();
		for v in aged_out {
			tracing::info!(name = %v.item.name, "lifespan elapsed, retiring instance");
			self.tombstone_resource(registry, v, now).await?;
		}

		let live: Vec<Versioned<Resource>> = registry
			.resources
			.values()
			.filter(|v| {
				v.item.resource_type == resource_type
					&& !state::is_tombstone(&v.item.state)
			})
			.cloned()
			.collect();
		let count = live.len() as i64;

		if count < lifecycle.item.min_count {
			for _ in count..lifecycle.item.min_count {
				let name = format!("{}-{}", resource_type, Uuid::now_v7());
				let mut resource =
					Resource::new(&name, resource_type, &lifecycle.item.initial_state, now);
				resource.expiration = lifecycle.item.lifespan().map(|lifespan| now + lifespan);

				let stored = self.storage.create_resource(&resource).await?;
				tracing::info!(name = %name, resource_type, "dynamic resource materialized");
				registry.resources.insert(name, stored);
			}
		} else if count > lifecycle.item.max_count {
			let excess = (count - lifecycle.item.max_count) as usize;
			// Largest names go first so the long-lived low end of the
			// population stays stable. Owned resources are left alone and
			// collected after release.
			let mut victims: Vec<Versioned<Resource>> =
				live.into_iter().filter(|v| !v.item.is_owned()).collect();
			victims.sort_by(|a, b| b.item.name.cmp(&a.item.name));
			victims.truncate(excess);

			for v in victims {
				tracing::info!(name = %v.item.name, resource_type, "dynamic resource over target, retiring");
				self.tombstone_resource(registry, v, now).await?;
			}
		}

		let drained: Vec<Versioned<Resource>> = registry
			.resources
			.values()
			.filter(|v| {
				v.item.resource_type == resource_type
					&& state::is_tombstone(&v.item.state)
					&& !v.item.is_owned()
			})
			.cloned()
			.collect();
		for v in drained {
			self.delete_resource(registry, v).await?;
		}

		if retired
			&& !registry
				.resources
				.values()
				.any(|v| v.item.resource_type == resource_type)
		{
			let Some(v) = registry.lifecycles.get(resource_type).cloned() else {
				return Ok(());
			};
			match self
				.storage
				.delete_lifecycle(resource_type, v.version)
				.await
			{
				Ok(()) => {
					tracing::info!(resource_type, "dynamic class drained, record removed");
					registry.lifecycles.remove(resource_type);
				}
				Err(e) if e.is_conflict() => {
					self.refresh_lifecycle(registry, resource_type).await?;
				}
				Err(StorageError::NotFound(_)) => {
					registry.lifecycles.remove(resource_type);
				}
				Err(e) => return Err(e.into()),
			}
		}
		Ok(())
	}

	/// Delete every unowned tombstone left in the catalog.
	async fn sweep_tombstones(&self, registry: &mut Registry) -> Result<()> {
		let drained: Vec<Versioned<Resource>> = registry
			.resources
			.values()
			.filter(|v| state::is_tombstone(&v.item.state) && !v.item.is_owned())
			.cloned()
			.collect();
		for v in drained {
			self.delete_resource(registry, v).await?;
		}
		Ok(())
	}

	async fn tombstone_resource(
		&self,
		registry: &mut Registry,
		v: Versioned<Resource>,
		now: DateTime<Utc>,
	) -> Result<()> {
		let mut updated = v.item;
		updated.state = state::TOMBSTONE.to_string();
		updated.last_update = now;
		updated.expiration = None;

		let name = updated.name.clone();
		match self.storage.update_resource(&updated, v.version).await {
			Ok(stored) => {
				registry.resources.insert(name, stored);
				Ok(())
			}
			Err(e) if e.is_conflict() => {
				tracing::debug!(name = %name, "conflict while tombstoning, skipping");
				self.refresh_resource(registry, &name).await
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn delete_resource(
		&self,
		registry: &mut Registry,
		v: Versioned<Resource>,
	) -> Result<()> {
		let name = v.item.name.clone();
		match self.storage.delete_resource(&name, v.version).await {
			Ok(()) => {
				tracing::info!(name = %name, "tombstoned resource deleted");
				registry.resources.remove(&name);
				Ok(())
			}
			Err(e) if e.is_conflict() => {
				tracing::debug!(name = %name, "conflict while deleting, skipping");
				self.refresh_resource(registry, &name).await
			}
			Err(StorageError::NotFound(_)) => {
				registry.resources.remove(&name);
				Ok(())
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn refresh_lifecycle(
		&self,
		registry: &mut Registry,
		resource_type: &str,
	) -> Result<()> {
		match self.storage.get_lifecycle(resource_type).await? {
			Some(v) => {
				registry.lifecycles.insert(resource_type.to_string(), v);
			}
			None => {
				registry.lifecycles.remove(resource_type);
			}
		}
		Ok(())
	}
}
