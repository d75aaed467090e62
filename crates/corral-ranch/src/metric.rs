// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Telemetry snapshots of the catalog.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-type counts by state and by owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetric {
	#[serde(rename = "type")]
	pub resource_type: String,
	/// state → number of resources currently in it.
	pub current: BTreeMap<String, usize>,
	/// owner → number of resources currently held. Unowned resources are
	/// not counted here.
	pub owners: BTreeMap<String, usize>,
}

impl ResourceMetric {
	#[must_use]
	pub fn new(resource_type: impl Into<String>) -> Self {
		Self {
			resource_type: resource_type.into(),
			current: BTreeMap::new(),
			owners: BTreeMap::new(),
		}
	}

	pub fn record(&mut self, state: &str, owner: &str) {
		*self.current.entry(state.to_string()).or_default() += 1;
		if !owner.is_empty() {
			*self.owners.entry(owner.to_string()).or_default() += 1;
		}
	}

	/// Total resources of this type, regardless of state.
	#[must_use]
	pub fn total(&self) -> usize {
		self.current.values().sum()
	}
}
