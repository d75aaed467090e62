// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The ranch: registry and lifecycle engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use corral_core::{state, DynamicResourceLifeCycle, Resource, UserData};
use corral_storage::{Storage, Versioned};
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::{RanchError, Result};
use crate::metric::ResourceMetric;
use crate::requests::{RequestKey, RequestQueue};

/// Optimistic writes are retried this many times before the conflict is
/// surfaced to the caller. Conflicts only arise from writers outside this
/// process, so the budget is small.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

pub(crate) struct Registry {
	pub(crate) resources: BTreeMap<String, Versioned<Resource>>,
	pub(crate) lifecycles: BTreeMap<String, Versioned<DynamicResourceLifeCycle>>,
	pub(crate) requests: RequestQueue,
}

/// The broker core: authoritative view of the catalog plus the request
/// queues, writing through to storage under a single registry lock.
///
/// Every verb takes the write guard, decides the transition against the
/// in-memory view, and persists it before the guard drops. Readers
/// (metric snapshots) take the read guard and therefore never observe a
/// transition storage has not accepted.
pub struct Ranch {
	pub(crate) storage: Arc<dyn Storage>,
	pub(crate) clock: Arc<dyn Clock>,
	pub(crate) inner: RwLock<Registry>,
}

impl Ranch {
	#[must_use]
	pub fn new(
		storage: Arc<dyn Storage>,
		clock: Arc<dyn Clock>,
		request_ttl: StdDuration,
	) -> Self {
		Self {
			storage,
			clock,
			inner: RwLock::new(Registry {
				resources: BTreeMap::new(),
				lifecycles: BTreeMap::new(),
				requests: RequestQueue::new(Duration::milliseconds(
					request_ttl.as_millis() as i64
				)),
			}),
		}
	}

	/// Load the catalog from storage. Called once at startup, before any
	/// verb is served.
	pub async fn load(&self) -> Result<()> {
		let resources = self.storage.list_resources().await?;
		let lifecycles = self.storage.list_lifecycles().await?;

		let mut registry = self.inner.write().await;
		registry.resources = resources
			.into_iter()
			.map(|v| (v.item.name.clone(), v))
			.collect();
		registry.lifecycles = lifecycles
			.into_iter()
			.map(|v| (v.item.resource_type.clone(), v))
			.collect();

		tracing::info!(
			resources = registry.resources.len(),
			lifecycles = registry.lifecycles.len(),
			"catalog loaded"
		);
		Ok(())
	}

	/// Lease a resource of `resource_type` currently in `state`, moving it
	/// to `dest_state` under `owner` for `lease_duration`.
	///
	/// Candidates are scanned in name order so acquisition is reproducible.
	/// When no candidate is free, a caller with a `request_id` is enrolled
	/// in the queue and gets [`RanchError::Queued`]; an anonymous caller
	/// gets [`RanchError::NotFound`] and never queues. A queued request is
	/// honored on a later poll once it ranks first among fresh requests.
	#[tracing::instrument(skip(self))]
	pub async fn acquire(
		&self,
		resource_type: &str,
		state: &str,
		dest_state: &str,
		owner: &str,
		lease_duration: StdDuration,
		request_id: Option<&str>,
	) -> Result<Resource> {
		let now = self.clock.now();
		let key = RequestKey::new(resource_type, state);
		let mut registry = self.inner.write().await;

		if let Some(id) = request_id {
			let known = registry.requests.contains(&key, id);
			let rank = registry.requests.rank(&key, id, now);
			// A brand-new request always parks for one poll cycle so two
			// racing submitters resolve by submission order, not arrival
			// luck.
			if !known || rank != 1 {
				return Err(RanchError::Queued {
					request_id: id.to_string(),
					resource_type: resource_type.to_string(),
					state: state.to_string(),
				});
			}
		} else if registry.requests.has_fresh(&key, now) {
			return Err(RanchError::NotFound {
				resource_type: resource_type.to_string(),
				state: state.to_string(),
			});
		}

		let lease = Duration::milliseconds(lease_duration.as_millis() as i64);
		let mut last_name = String::new();

		for attempt in 1..=MAX_COMMIT_ATTEMPTS {
			let candidate = registry
				.resources
				.values()
				.find(|v| {
					v.item.resource_type == resource_type
						&& v.item.state == state
						&& !v.item.is_owned()
				})
				.cloned();

			let Some(Versioned {
				version,
				item: mut resource,
			}) = candidate
			else {
				return Err(match request_id {
					Some(id) => RanchError::Queued {
						request_id: id.to_string(),
						resource_type: resource_type.to_string(),
						state: state.to_string(),
					},
					None => RanchError::NotFound {
						resource_type: resource_type.to_string(),
						state: state.to_string(),
					},
				});
			};

			last_name = resource.name.clone();
			resource.state = dest_state.to_string();
			resource.owner = owner.to_string();
			resource.last_update = now;
			resource.expiration = Some(now + lease);
			resource.lease_duration_secs = Some(lease_duration.as_secs() as i64);

			match self.storage.update_resource(&resource, version).await {
				Ok(stored) => {
					registry
						.resources
						.insert(stored.item.name.clone(), stored.clone());
					if let Some(id) = request_id {
						registry.requests.remove(&key, id);
					}
					tracing::info!(name = %stored.item.name, owner, "resource acquired");
					return Ok(stored.item);
				}
				Err(e) if e.is_conflict() => {
					tracing::debug!(name = %last_name, attempt, "conflict during acquire, rescanning");
					self.refresh_resource(&mut registry, &last_name).await?;
				}
				Err(e) => return Err(e.into()),
			}
		}

		Err(RanchError::Conflict {
			name: last_name,
			attempts: MAX_COMMIT_ATTEMPTS,
		})
	}

	/// Atomically lease exactly the named resources, all-or-nothing.
	///
	/// Every name must exist, sit in `state`, and be unowned; otherwise
	/// nothing transitions. No lease term is recorded — callers of this
	/// verb manage their own horizon and release explicitly.
	#[tracing::instrument(skip(self, names), fields(count = names.len()))]
	pub async fn acquire_by_state(
		&self,
		state: &str,
		dest_state: &str,
		owner: &str,
		names: &[String],
	) -> Result<Vec<Resource>> {
		let now = self.clock.now();
		let mut registry = self.inner.write().await;

		let mut batch = Vec::with_capacity(names.len());
		for name in names {
			let v = registry
				.resources
				.get(name)
				.ok_or_else(|| RanchError::ResourceNotFound(name.clone()))?;
			if v.item.state != state {
				return Err(RanchError::StateMismatch {
					name: name.clone(),
					expected: state.to_string(),
					actual: v.item.state.clone(),
				});
			}
			if v.item.is_owned() {
				return Err(RanchError::OwnerMismatch {
					name: name.clone(),
					requested: String::new(),
					actual: v.item.owner.clone(),
				});
			}
			batch.push(v.clone());
		}

		let mut committed: Vec<(Versioned<Resource>, Versioned<Resource>)> = Vec::new();
		for original in batch {
			let mut updated = original.item.clone();
			updated.state = dest_state.to_string();
			updated.owner = owner.to_string();
			updated.last_update = now;
			updated.expiration = None;
			updated.lease_duration_secs = None;

			match self.storage.update_resource(&updated, original.version).await {
				Ok(stored) => committed.push((original, stored)),
				Err(e) => {
					// Undo what already went through, then refresh the
					// cache from storage so the registry reflects whatever
					// the store settled on.
					for (original, stored) in &committed {
						if let Err(revert) = self
							.storage
							.update_resource(&original.item, stored.version)
							.await
						{
							tracing::error!(
								name = %original.item.name,
								error = %revert,
								"failed to roll back partial batch acquire"
							);
						}
					}
					for name in names {
						self.refresh_resource(&mut registry, name).await?;
					}
					return Err(match e {
						e if e.is_conflict() => RanchError::Conflict {
							name: updated.name,
							attempts: 1,
						},
						e => e.into(),
					});
				}
			}
		}

		let mut acquired = Vec::with_capacity(committed.len());
		for (_, stored) in committed {
			registry
				.resources
				.insert(stored.item.name.clone(), stored.clone());
			acquired.push(stored.item);
		}
		tracing::info!(count = acquired.len(), owner, "resources acquired by state");
		Ok(acquired)
	}

	/// End a lease: clear the owner and move the resource to `dest_state`.
	/// Only the current owner may release.
	#[tracing::instrument(skip(self))]
	pub async fn release(&self, name: &str, owner: &str, dest_state: &str) -> Result<()> {
		let now = self.clock.now();
		let mut registry = self.inner.write().await;

		for attempt in 1..=MAX_COMMIT_ATTEMPTS {
			let v = registry
				.resources
				.get(name)
				.cloned()
				.ok_or_else(|| RanchError::ResourceNotFound(name.to_string()))?;
			if v.item.owner != owner {
				return Err(RanchError::OwnerMismatch {
					name: name.to_string(),
					requested: owner.to_string(),
					actual: v.item.owner,
				});
			}

			let mut updated = v.item;
			updated.state = dest_state.to_string();
			updated.owner.clear();
			updated.last_update = now;
			updated.lease_duration_secs = None;
			updated.expiration = idle_expiration(&registry, &updated.resource_type, now);

			match self.storage.update_resource(&updated, v.version).await {
				Ok(stored) => {
					registry.resources.insert(stored.item.name.clone(), stored);
					tracing::info!(name, owner, dest_state, "resource released");
					return Ok(());
				}
				Err(e) if e.is_conflict() => {
					tracing::debug!(name, attempt, "conflict during release, revalidating");
					self.refresh_resource(&mut registry, name).await?;
				}
				Err(e) => return Err(e.into()),
			}
		}

		Err(RanchError::Conflict {
			name: name.to_string(),
			attempts: MAX_COMMIT_ATTEMPTS,
		})
	}

	/// Heartbeat a lease: refresh `last_update`, merge `user_data`, and
	/// extend the expiration by the lease duration recorded at acquire.
	#[tracing::instrument(skip(self, user_data))]
	pub async fn update(
		&self,
		name: &str,
		owner: &str,
		state: &str,
		user_data: &UserData,
	) -> Result<Resource> {
		let now = self.clock.now();
		let mut registry = self.inner.write().await;

		for attempt in 1..=MAX_COMMIT_ATTEMPTS {
			let v = registry
				.resources
				.get(name)
				.cloned()
				.ok_or_else(|| RanchError::ResourceNotFound(name.to_string()))?;
			if v.item.owner != owner {
				return Err(RanchError::OwnerMismatch {
					name: name.to_string(),
					requested: owner.to_string(),
					actual: v.item.owner,
				});
			}
			if v.item.state != state {
				return Err(RanchError::StateMismatch {
					name: name.to_string(),
					expected: state.to_string(),
					actual: v.item.state,
				});
			}

			let mut updated = v.item;
			updated.last_update = now;
			updated.user_data.merge(user_data);
			if let Some(lease) = updated.lease_duration() {
				updated.expiration = Some(now + lease);
			}

			match self.storage.update_resource(&updated, v.version).await {
				Ok(stored) => {
					let resource = stored.item.clone();
					registry.resources.insert(stored.item.name.clone(), stored);
					return Ok(resource);
				}
				Err(e) if e.is_conflict() => {
					tracing::debug!(name, attempt, "conflict during update, revalidating");
					self.refresh_resource(&mut registry, name).await?;
				}
				Err(e) => return Err(e.into()),
			}
		}

		Err(RanchError::Conflict {
			name: name.to_string(),
			attempts: MAX_COMMIT_ATTEMPTS,
		})
	}

	/// Move every owned resource of `(resource_type, state)` whose
	/// expiration precedes `expire_before` to `dest_state`, clearing the
	/// owner. Returns name → prior owner for the transitioned resources.
	///
	/// Conflicted entries are skipped rather than failing the sweep; the
	/// next sweep picks them up.
	#[tracing::instrument(skip(self))]
	pub async fn reset(
		&self,
		resource_type: &str,
		state: &str,
		expire_before: DateTime<Utc>,
		dest_state: &str,
	) -> Result<BTreeMap<String, String>> {
		let now = self.clock.now();
		let mut registry = self.inner.write().await;

		let candidates: Vec<Versioned<Resource>> = registry
			.resources
			.values()
			.filter(|v| {
				v.item.resource_type == resource_type
					&& v.item.state == state
					&& v.item.is_owned()
					&& v.item.expiration.is_some_and(|e| e < expire_before)
			})
			.cloned()
			.collect();

		let mut reset = BTreeMap::new();
		for v in candidates {
			let prior_owner = v.item.owner.clone();
			let mut updated = v.item;
			updated.state = dest_state.to_string();
			updated.owner.clear();
			updated.last_update = now;
			updated.lease_duration_secs = None;
			updated.expiration = idle_expiration(&registry, &updated.resource_type, now);

			let name = updated.name.clone();
			match self.storage.update_resource(&updated, v.version).await {
				Ok(stored) => {
					registry.resources.insert(name.clone(), stored);
					reset.insert(name, prior_owner);
				}
				Err(e) if e.is_conflict() => {
					tracing::debug!(name = %name, "conflict during reset, skipping");
					self.refresh_resource(&mut registry, &name).await?;
				}
				Err(e) => return Err(e.into()),
			}
		}

		if !reset.is_empty() {
			tracing::info!(count = reset.len(), resource_type, state, "resources reset");
		}
		Ok(reset)
	}

	/// Reaper sweep: every owned resource whose lease has expired moves to
	/// `dirty_state` with the owner cleared, regardless of type or state.
	/// Returns (name, prior owner) pairs.
	#[tracing::instrument(skip(self))]
	pub async fn reap(&self, dirty_state: &str) -> Result<Vec<(String, String)>> {
		let now = self.clock.now();
		let mut registry = self.inner.write().await;

		let candidates: Vec<Versioned<Resource>> = registry
			.resources
			.values()
			.filter(|v| {
				v.item.is_owned()
					&& v.item.is_expired(now)
					&& !state::is_tombstone(&v.item.state)
			})
			.cloned()
			.collect();

		let mut reaped = Vec::new();
		for v in candidates {
			let prior_owner = v.item.owner.clone();
			let mut updated = v.item;
			updated.state = dirty_state.to_string();
			updated.owner.clear();
			updated.last_update = now;
			updated.lease_duration_secs = None;
			updated.expiration = idle_expiration(&registry, &updated.resource_type, now);

			let name = updated.name.clone();
			match self.storage.update_resource(&updated, v.version).await {
				Ok(stored) => {
					tracing::warn!(name = %name, owner = %prior_owner, "lease expired, reclaiming");
					registry.resources.insert(name.clone(), stored);
					reaped.push((name, prior_owner));
				}
				Err(e) if e.is_conflict() => {
					self.refresh_resource(&mut registry, &name).await?;
				}
				Err(e) => return Err(e.into()),
			}
		}

		Ok(reaped)
	}

	/// Per-type counts by state and owner.
	pub async fn metric(&self, resource_type: &str) -> Result<ResourceMetric> {
		let registry = self.inner.read().await;
		let mut metric = ResourceMetric::new(resource_type);
		for v in registry.resources.values() {
			if v.item.resource_type == resource_type {
				metric.record(&v.item.state, &v.item.owner);
			}
		}

		if metric.total() == 0 && !registry.lifecycles.contains_key(resource_type) {
			return Err(RanchError::TypeNotFound(resource_type.to_string()));
		}
		Ok(metric)
	}

	/// Snapshot of every type the broker tracks.
	pub async fn all_metrics(&self) -> Vec<ResourceMetric> {
		let registry = self.inner.read().await;
		let mut by_type: BTreeMap<String, ResourceMetric> = BTreeMap::new();

		for v in registry.lifecycles.values() {
			by_type
				.entry(v.item.resource_type.clone())
				.or_insert_with(|| ResourceMetric::new(&v.item.resource_type));
		}
		for v in registry.resources.values() {
			by_type
				.entry(v.item.resource_type.clone())
				.or_insert_with(|| ResourceMetric::new(&v.item.resource_type))
				.record(&v.item.state, &v.item.owner);
		}

		by_type.into_values().collect()
	}

	/// Drop queued requests that stopped polling. Returns how many were
	/// collected.
	pub async fn prune_requests(&self) -> usize {
		let now = self.clock.now();
		let mut registry = self.inner.write().await;
		let removed = registry.requests.prune_stale(now);
		if removed > 0 {
			tracing::info!(removed, "pruned stale requests");
		}
		removed
	}

	/// Total queued requests, fresh or stale.
	pub async fn pending_requests(&self) -> usize {
		self.inner.read().await.requests.len()
	}

	pub(crate) async fn refresh_resource(
		&self,
		registry: &mut Registry,
		name: &str,
	) -> Result<()> {
		match self.storage.get_resource(name).await? {
			Some(v) => {
				registry.resources.insert(name.to_string(), v);
			}
			None => {
				registry.resources.remove(name);
			}
		}
		Ok(())
	}
}

/// Expiration to stamp on a resource that just went idle: lifespanned
/// dynamic classes keep aging, everything else carries none.
fn idle_expiration(
	registry: &Registry,
	resource_type: &str,
	now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
	registry
		.lifecycles
		.get(resource_type)
		.and_then(|lc| lc.item.lifespan())
		.map(|lifespan| now + lifespan)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use corral_storage::testing::memory_storage;

	const TTL: StdDuration = StdDuration::from_secs(30);
	const LEASE: StdDuration = StdDuration::from_secs(30);

	async fn ranch_with(resources: &[(&str, &str, &str)]) -> (Ranch, Arc<ManualClock>) {
		let storage = Arc::new(memory_storage().await);
		let clock = Arc::new(ManualClock::new(Utc::now()));
		let now = clock.now();

		for (name, resource_type, state) in resources {
			storage
				.create_resource(&Resource::new(*name, *resource_type, *state, now))
				.await
				.unwrap();
		}

		let ranch = Ranch::new(storage, clock.clone(), TTL);
		ranch.load().await.unwrap();
		(ranch, clock)
	}

	#[tokio::test]
	async fn test_acquire_then_release_roundtrip() {
		let (ranch, clock) = ranch_with(&[("r1", "t", "free")]).await;

		let resource = ranch
			.acquire("t", "free", "busy", "A", LEASE, None)
			.await
			.unwrap();
		assert_eq!(resource.name, "r1");
		assert_eq!(resource.state, "busy");
		assert_eq!(resource.owner, "A");
		assert_eq!(resource.expiration, Some(clock.now() + Duration::seconds(30)));
		assert_eq!(resource.lease_duration_secs, Some(30));

		ranch.release("r1", "A", "dirty").await.unwrap();
		let metric = ranch.metric("t").await.unwrap();
		assert_eq!(metric.current.get("dirty"), Some(&1));
		assert!(metric.owners.is_empty());
	}

	#[tokio::test]
	async fn test_acquire_prefers_smallest_name() {
		let (ranch, _) = ranch_with(&[("b", "t", "free"), ("a", "t", "free")]).await;

		let first = ranch
			.acquire("t", "free", "busy", "A", LEASE, None)
			.await
			.unwrap();
		assert_eq!(first.name, "a");

		let second = ranch
			.acquire("t", "free", "busy", "B", LEASE, None)
			.await
			.unwrap();
		assert_eq!(second.name, "b");
	}

	#[tokio::test]
	async fn test_acquire_no_match_without_request_id_is_not_found() {
		let (ranch, _) = ranch_with(&[("r1", "t", "dirty")]).await;

		let err = ranch
			.acquire("t", "free", "busy", "A", LEASE, None)
			.await
			.unwrap_err();
		assert!(matches!(err, RanchError::NotFound { .. }));
		assert_eq!(ranch.pending_requests().await, 0);
	}

	#[tokio::test]
	async fn test_fifo_under_contention() {
		let (ranch, clock) = ranch_with(&[("r1", "t", "free")]).await;

		// First poll always parks the request, even with a free resource.
		let err = ranch
			.acquire("t", "free", "busy", "B", LEASE, Some("req-b"))
			.await
			.unwrap_err();
		assert!(matches!(err, RanchError::Queued { .. }));

		clock.advance(Duration::seconds(1));
		let err = ranch
			.acquire("t", "free", "busy", "C", LEASE, Some("req-c"))
			.await
			.unwrap_err();
		assert!(matches!(err, RanchError::Queued { .. }));

		// B re-polls first and wins.
		clock.advance(Duration::seconds(1));
		let resource = ranch
			.acquire("t", "free", "busy", "B", LEASE, Some("req-b"))
			.await
			.unwrap();
		assert_eq!(resource.owner, "B");

		// C ranks first now but the resource is held.
		clock.advance(Duration::seconds(1));
		let err = ranch
			.acquire("t", "free", "busy", "C", LEASE, Some("req-c"))
			.await
			.unwrap_err();
		assert!(matches!(err, RanchError::Queued { .. }));

		clock.advance(Duration::seconds(1));
		ranch.release("r1", "B", "free").await.unwrap();

		let resource = ranch
			.acquire("t", "free", "busy", "C", LEASE, Some("req-c"))
			.await
			.unwrap();
		assert_eq!(resource.owner, "C");
		assert_eq!(ranch.pending_requests().await, 0);
	}

	#[tokio::test]
	async fn test_anonymous_acquire_yields_to_fresh_queue() {
		let (ranch, clock) = ranch_with(&[("r1", "t", "free")]).await;

		let _ = ranch
			.acquire("t", "free", "busy", "B", LEASE, Some("req-b"))
			.await;

		clock.advance(Duration::seconds(1));
		let err = ranch
			.acquire("t", "free", "busy", "scrubber", LEASE, None)
			.await
			.unwrap_err();
		assert!(matches!(err, RanchError::NotFound { .. }));

		// Once the queued request goes stale the anonymous caller competes
		// again.
		clock.advance(Duration::seconds(31));
		let resource = ranch
			.acquire("t", "free", "busy", "scrubber", LEASE, None)
			.await
			.unwrap();
		assert_eq!(resource.owner, "scrubber");
	}

	#[tokio::test]
	async fn test_ttl_demotion_of_silent_requester() {
		let (ranch, clock) = ranch_with(&[("r1", "t", "free")]).await;

		// A queues at t=0 and goes silent.
		let _ = ranch
			.acquire("t", "free", "busy", "A", LEASE, Some("req-a"))
			.await;

		// B queues at t=5.
		clock.advance(Duration::seconds(5));
		let err = ranch
			.acquire("t", "free", "busy", "B", LEASE, Some("req-b"))
			.await
			.unwrap_err();
		assert!(matches!(err, RanchError::Queued { .. }));

		// At t=31 A's request is stale and B wins.
		clock.advance(Duration::seconds(26));
		let resource = ranch
			.acquire("t", "free", "busy", "B", LEASE, Some("req-b"))
			.await
			.unwrap();
		assert_eq!(resource.owner, "B");
	}

	#[tokio::test]
	async fn test_reap_reclaims_expired_lease() {
		let (ranch, clock) = ranch_with(&[("r1", "t", "free")]).await;

		ranch
			.acquire("t", "free", "busy", "A", StdDuration::from_secs(1), None)
			.await
			.unwrap();

		// Nothing to reap while the lease is live.
		assert!(ranch.reap("dirty").await.unwrap().is_empty());

		clock.advance(Duration::seconds(2));
		let reaped = ranch.reap("dirty").await.unwrap();
		assert_eq!(reaped, vec![("r1".to_string(), "A".to_string())]);

		let resource = ranch
			.acquire("t", "dirty", "cleaning", "janitor", LEASE, None)
			.await
			.unwrap();
		assert_eq!(resource.name, "r1");
		assert_eq!(resource.owner, "janitor");
	}

	#[tokio::test]
	async fn test_release_requires_exact_owner() {
		let (ranch, _) = ranch_with(&[("r1", "t", "free")]).await;
		ranch
			.acquire("t", "free", "busy", "A", LEASE, None)
			.await
			.unwrap();

		let err = ranch.release("r1", "B", "dirty").await.unwrap_err();
		assert!(matches!(err, RanchError::OwnerMismatch { .. }));

		let err = ranch.release("ghost", "A", "dirty").await.unwrap_err();
		assert!(matches!(err, RanchError::ResourceNotFound(_)));
	}

	#[tokio::test]
	async fn test_update_extends_lease_by_recorded_duration() {
		let (ranch, clock) = ranch_with(&[("r1", "t", "free")]).await;
		ranch
			.acquire("t", "free", "busy", "A", StdDuration::from_secs(60), None)
			.await
			.unwrap();

		clock.advance(Duration::seconds(40));
		let mut user_data = UserData::new();
		user_data.set("phase", "deploy");
		let resource = ranch
			.update("r1", "A", "busy", &user_data)
			.await
			.unwrap();

		assert_eq!(resource.expiration, Some(clock.now() + Duration::seconds(60)));
		assert_eq!(resource.user_data.get("phase"), Some("deploy"));
		assert_eq!(resource.last_update, clock.now());
	}

	#[tokio::test]
	async fn test_update_rejects_wrong_owner_or_state() {
		let (ranch, _) = ranch_with(&[("r1", "t", "free")]).await;
		ranch
			.acquire("t", "free", "busy", "A", LEASE, None)
			.await
			.unwrap();

		let err = ranch
			.update("r1", "B", "busy", &UserData::new())
			.await
			.unwrap_err();
		assert!(matches!(err, RanchError::OwnerMismatch { .. }));

		let err = ranch
			.update("r1", "A", "free", &UserData::new())
			.await
			.unwrap_err();
		assert!(matches!(err, RanchError::StateMismatch { .. }));
	}

	#[tokio::test]
	async fn test_update_merge_deletes_empty_values() {
		let (ranch, _) = ranch_with(&[("r1", "t", "free")]).await;
		ranch
			.acquire("t", "free", "busy", "A", LEASE, None)
			.await
			.unwrap();

		let mut user_data = UserData::new();
		user_data.set("keep", "1");
		user_data.set("drop", "2");
		ranch.update("r1", "A", "busy", &user_data).await.unwrap();

		let mut retract = UserData::new();
		retract.set("drop", "");
		let resource = ranch.update("r1", "A", "busy", &retract).await.unwrap();
		assert_eq!(resource.user_data.get("keep"), Some("1"));
		assert_eq!(resource.user_data.get("drop"), None);
	}

	#[tokio::test]
	async fn test_acquire_by_state_transitions_all_named() {
		let (ranch, _) =
			ranch_with(&[("a", "t", "free"), ("b", "t", "free"), ("c", "t", "free")]).await;

		let acquired = ranch
			.acquire_by_state(
				"free",
				"busy",
				"batch",
				&["a".to_string(), "c".to_string()],
			)
			.await
			.unwrap();

		assert_eq!(acquired.len(), 2);
		assert!(acquired.iter().all(|r| r.owner == "batch" && r.state == "busy"));

		let metric = ranch.metric("t").await.unwrap();
		assert_eq!(metric.current.get("free"), Some(&1));
		assert_eq!(metric.current.get("busy"), Some(&2));
	}

	#[tokio::test]
	async fn test_acquire_by_state_is_all_or_nothing() {
		let (ranch, _) = ranch_with(&[("a", "t", "free"), ("b", "t", "dirty")]).await;

		let err = ranch
			.acquire_by_state(
				"free",
				"busy",
				"batch",
				&["a".to_string(), "b".to_string()],
			)
			.await
			.unwrap_err();
		assert!(matches!(err, RanchError::StateMismatch { .. }));

		// a must be untouched.
		let metric = ranch.metric("t").await.unwrap();
		assert_eq!(metric.current.get("free"), Some(&1));
		assert!(metric.owners.is_empty());
	}

	#[tokio::test]
	async fn test_acquire_by_state_rejects_owned_resource() {
		let (ranch, _) = ranch_with(&[("a", "t", "free")]).await;
		ranch
			.acquire("t", "free", "free", "A", LEASE, None)
			.await
			.unwrap();

		let err = ranch
			.acquire_by_state("free", "busy", "batch", &["a".to_string()])
			.await
			.unwrap_err();
		assert!(matches!(err, RanchError::OwnerMismatch { .. }));
	}

	#[tokio::test]
	async fn test_reset_returns_prior_owners() {
		let (ranch, clock) = ranch_with(&[("a", "t", "free"), ("b", "t", "free")]).await;
		ranch
			.acquire("t", "free", "busy", "A", StdDuration::from_secs(1), None)
			.await
			.unwrap();

		clock.advance(Duration::seconds(5));
		let reset = ranch
			.reset("t", "busy", clock.now(), "dirty")
			.await
			.unwrap();
		assert_eq!(reset.get("a"), Some(&"A".to_string()));
		assert_eq!(reset.len(), 1);

		let metric = ranch.metric("t").await.unwrap();
		assert_eq!(metric.current.get("dirty"), Some(&1));
		assert_eq!(metric.current.get("free"), Some(&1));
	}

	#[tokio::test]
	async fn test_metric_unknown_type_is_not_found() {
		let (ranch, _) = ranch_with(&[("r1", "t", "free")]).await;
		let err = ranch.metric("nope").await.unwrap_err();
		assert!(matches!(err, RanchError::TypeNotFound(_)));
	}

	#[tokio::test]
	async fn test_request_gc_prunes_silent_requesters() {
		let (ranch, clock) = ranch_with(&[]).await;

		let _ = ranch
			.acquire("t", "free", "busy", "A", LEASE, Some("req-a"))
			.await;
		assert_eq!(ranch.pending_requests().await, 1);

		clock.advance(Duration::seconds(61));
		assert_eq!(ranch.prune_requests().await, 1);
		assert_eq!(ranch.pending_requests().await, 0);
	}

	#[tokio::test]
	async fn test_no_two_owners_for_one_resource() {
		let (ranch, _) = ranch_with(&[("r1", "t", "free")]).await;
		ranch
			.acquire("t", "free", "busy", "A", LEASE, None)
			.await
			.unwrap();

		// Same (type, state) has no free resource left.
		let err = ranch
			.acquire("t", "free", "busy", "B", LEASE, None)
			.await
			.unwrap_err();
		assert!(matches!(err, RanchError::NotFound { .. }));

		// Acquiring from the held state also fails: the resource is owned.
		let err = ranch
			.acquire("t", "busy", "cleaning", "B", LEASE, None)
			.await
			.unwrap_err();
		assert!(matches!(err, RanchError::NotFound { .. }));
	}
}
