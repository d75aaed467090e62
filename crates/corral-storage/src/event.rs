// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Change events published by the storage adapter.

use corral_core::state;

/// A change to one of the stored object kinds.
///
/// Resource update events carry the new state and owner so subscribers can
/// decide relevance without a read-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
	ResourceCreated {
		name: String,
	},
	ResourceUpdated {
		name: String,
		state: String,
		owner: String,
	},
	ResourceDeleted {
		name: String,
	},
	/// A dynamic resource life cycle was created, updated, or deleted.
	LifecycleChanged {
		resource_type: String,
	},
}

impl StorageEvent {
	/// Whether this event can change the shape of the pool.
	///
	/// Resource updates fire on every lease heartbeat; the reconciler must
	/// ignore that churn or it feeds back into itself. The only updates that
	/// matter are tombstone ingress and owner-clear (a resource removed from
	/// config while leased can only be collected once its owner lets go).
	/// Creates, deletes, and lifecycle changes always matter.
	#[must_use]
	pub fn affects_pool_shape(&self) -> bool {
		match self {
			StorageEvent::ResourceUpdated { state, owner, .. } => {
				state::is_tombstone(state) || owner.is_empty()
			}
			_ => true,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_in_lease_churn_is_filtered() {
		let event = StorageEvent::ResourceUpdated {
			name: "r1".to_string(),
			state: "busy".to_string(),
			owner: "client-a".to_string(),
		};
		assert!(!event.affects_pool_shape());
	}

	#[test]
	fn test_owner_clear_is_relevant() {
		let event = StorageEvent::ResourceUpdated {
			name: "r1".to_string(),
			state: "dirty".to_string(),
			owner: String::new(),
		};
		assert!(event.affects_pool_shape());
	}

	#[test]
	fn test_tombstone_ingress_is_relevant() {
		let event = StorageEvent::ResourceUpdated {
			name: "r1".to_string(),
			state: "tombstone".to_string(),
			owner: "client-a".to_string(),
		};
		assert!(event.affects_pool_shape());
	}

	#[test]
	fn test_create_delete_lifecycle_always_relevant() {
		assert!(StorageEvent::ResourceCreated {
			name: "r1".to_string()
		}
		.affects_pool_shape());
		assert!(StorageEvent::ResourceDeleted {
			name: "r1".to_string()
		}
		.affects_pool_shape());
		assert!(StorageEvent::LifecycleChanged {
			resource_type: "cluster".to_string()
		}
		.affects_pool_shape());
	}
}
