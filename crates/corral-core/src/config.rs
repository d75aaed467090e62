// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Declarative pool configuration.
//!
//! Operators describe the fleet in a YAML document with two arrays:
//!
//! ```yaml
//! resources:
//!   - name: cluster-1
//!     type: cluster
//!     state: free
//! dynamic-resources:
//!   - type: project
//!     initial-state: dirty
//!     min-count: 2
//!     max-count: 4
//!     lifespan-secs: 3600
//! ```
//!
//! The reconciler folds this document into the live catalog: static entries
//! are created or tombstoned by diff, dynamic entries drive the class
//! manager.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::lifecycle::{DynamicResourceLifeCycle, ResourceConfigSpec};
use crate::resource::UserData;
use crate::state;

/// Root of the pool config document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
	#[serde(default)]
	pub resources: Vec<StaticResourceEntry>,
	#[serde(default, rename = "dynamic-resources")]
	pub dynamic_resources: Vec<DynamicResourceEntry>,
}

/// A statically declared resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StaticResourceEntry {
	pub name: String,
	#[serde(rename = "type")]
	pub resource_type: String,
	pub state: String,
	#[serde(default, skip_serializing_if = "UserData::is_empty")]
	pub user_data: UserData,
}

/// A dynamically sized resource class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DynamicResourceEntry {
	#[serde(rename = "type")]
	pub resource_type: String,
	pub initial_state: String,
	pub min_count: i64,
	pub max_count: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub lifespan_secs: Option<i64>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub needs: BTreeMap<String, i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub config: Option<ResourceConfigSpec>,
}

impl DynamicResourceEntry {
	/// Convert the config entry into the stored lifecycle record.
	#[must_use]
	pub fn into_lifecycle(self) -> DynamicResourceLifeCycle {
		DynamicResourceLifeCycle {
			resource_type: self.resource_type,
			initial_state: self.initial_state,
			min_count: self.min_count,
			max_count: self.max_count,
			lifespan_secs: self.lifespan_secs,
			needs: self.needs,
			config: self.config,
		}
	}
}

impl PoolConfig {
	/// Parse and validate a YAML pool config document.
	///
	/// # Errors
	///
	/// Returns [`CoreError::Parse`] on malformed YAML and
	/// [`CoreError::InvalidConfig`] when the document fails validation.
	pub fn from_yaml(document: &str) -> Result<Self> {
		let config: PoolConfig = serde_yaml::from_str(document)?;
		config.validate()?;
		Ok(config)
	}

	/// Validate the document: names and types must be unique and non-empty,
	/// the tombstone state is reserved, and no type may be both static and
	/// dynamic.
	pub fn validate(&self) -> Result<()> {
		let mut names = BTreeSet::new();
		for entry in &self.resources {
			if entry.name.is_empty() {
				return Err(CoreError::InvalidConfig(
					"resource name must not be empty".to_string(),
				));
			}
			if entry.resource_type.is_empty() {
				return Err(CoreError::InvalidConfig(format!(
					"resource {}: type must not be empty",
					entry.name
				)));
			}
			if state::is_tombstone(&entry.state) {
				return Err(CoreError::InvalidConfig(format!(
					"resource {}: state {} is reserved",
					entry.name,
					state::TOMBSTONE
				)));
			}
			if !names.insert(entry.name.as_str()) {
				return Err(CoreError::InvalidConfig(format!(
					"duplicate resource name: {}",
					entry.name
				)));
			}
		}

		let mut types = BTreeSet::new();
		for entry in &self.dynamic_resources {
			if !types.insert(entry.resource_type.as_str()) {
				return Err(CoreError::InvalidConfig(format!(
					"duplicate dynamic resource type: {}",
					entry.resource_type
				)));
			}
			entry.clone().into_lifecycle().validate()?;
		}

		for entry in &self.resources {
			if types.contains(entry.resource_type.as_str()) {
				return Err(CoreError::InvalidConfig(format!(
					"type {} is declared both statically and dynamically",
					entry.resource_type
				)));
			}
		}

		Ok(())
	}
}
