// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dynamic resource life cycle records.

use std::collections::BTreeMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::state;

/// Declarative template for a dynamically sized population of resources of
/// one type.
///
/// The broker materializes resources of `resource_type` until at least
/// `min_count` exist and tombstones the excess above `max_count`, never
/// touching a leased resource. A declared `lifespan_secs` bounds how long an
/// idle instance lives before the reaper recycles it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicResourceLifeCycle {
	#[serde(rename = "type")]
	pub resource_type: String,
	pub initial_state: String,
	pub min_count: i64,
	pub max_count: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub lifespan_secs: Option<i64>,
	/// Sub-resources consumed to construct one instance, by type.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub needs: BTreeMap<String, i64>,
	/// Opaque construction spec handed to whatever provisions instances.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub config: Option<ResourceConfigSpec>,
}

impl DynamicResourceLifeCycle {
	#[must_use]
	pub fn lifespan(&self) -> Option<Duration> {
		self.lifespan_secs.map(Duration::seconds)
	}

	/// Validate the record.
	///
	/// # Errors
	///
	/// Returns [`CoreError::InvalidConfig`] when the type or initial state is
	/// empty, the initial state is the reserved tombstone state, or the count
	/// bounds are inconsistent.
	pub fn validate(&self) -> Result<(), CoreError> {
		if self.resource_type.is_empty() {
			return Err(CoreError::InvalidConfig(
				"dynamic resource type must not be empty".to_string(),
			));
		}
		if self.initial_state.is_empty() {
			return Err(CoreError::InvalidConfig(format!(
				"dynamic resource {}: initial state must not be empty",
				self.resource_type
			)));
		}
		if state::is_tombstone(&self.initial_state) {
			return Err(CoreError::InvalidConfig(format!(
				"dynamic resource {}: initial state {} is reserved",
				self.resource_type,
				state::TOMBSTONE
			)));
		}
		if self.min_count < 0 || self.max_count < self.min_count {
			return Err(CoreError::InvalidConfig(format!(
				"dynamic resource {}: expected 0 <= min-count <= max-count, got {}..{}",
				self.resource_type, self.min_count, self.max_count
			)));
		}
		Ok(())
	}
}

/// Opaque construction spec for dynamic resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfigSpec {
	#[serde(rename = "type")]
	pub spec_type: String,
	#[serde(default)]
	pub content: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn lifecycle(min: i64, max: i64) -> DynamicResourceLifeCycle {
		DynamicResourceLifeCycle {
			resource_type: "cluster".to_string(),
			initial_state: "free".to_string(),
			min_count: min,
			max_count: max,
			lifespan_secs: None,
			needs: BTreeMap::new(),
			config: None,
		}
	}

	#[test]
	fn test_validate_accepts_sane_bounds() {
		assert!(lifecycle(0, 0).validate().is_ok());
		assert!(lifecycle(2, 4).validate().is_ok());
	}

	#[test]
	fn test_validate_rejects_inverted_bounds() {
		assert!(lifecycle(4, 2).validate().is_err());
		assert!(lifecycle(-1, 2).validate().is_err());
	}

	#[test]
	fn test_validate_rejects_tombstone_initial_state() {
		let mut lc = lifecycle(1, 1);
		lc.initial_state = "tombstone".to_string();
		assert!(lc.validate().is_err());
	}

	#[test]
	fn test_lifespan_conversion() {
		let mut lc = lifecycle(1, 1);
		assert_eq!(lc.lifespan(), None);
		lc.lifespan_secs = Some(300);
		assert_eq!(lc.lifespan(), Some(Duration::seconds(300)));
	}
}
