// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resource types for the broker catalog.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A leasable unit tracked by the broker.
///
/// `owner` is non-empty exactly while the resource is leased. `expiration`
/// is set while a bounded lease is in flight, or when the resource belongs
/// to a dynamic class with a declared lifespan. `lease_duration_secs`
/// records the term granted at acquire time so that heartbeats extend the
/// lease by the original length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
	pub name: String,
	#[serde(rename = "type")]
	pub resource_type: String,
	pub state: String,
	#[serde(default)]
	pub owner: String,
	pub last_update: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "UserData::is_empty")]
	pub user_data: UserData,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expiration: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub lease_duration_secs: Option<i64>,
}

impl Resource {
	/// Create an unowned resource in the given state.
	#[must_use]
	pub fn new(
		name: impl Into<String>,
		resource_type: impl Into<String>,
		state: impl Into<String>,
		now: DateTime<Utc>,
	) -> Self {
		Self {
			name: name.into(),
			resource_type: resource_type.into(),
			state: state.into(),
			owner: String::new(),
			last_update: now,
			user_data: UserData::default(),
			expiration: None,
			lease_duration_secs: None,
		}
	}

	#[must_use]
	pub fn is_owned(&self) -> bool {
		!self.owner.is_empty()
	}

	/// Whether the resource carries an expiration that has already passed.
	#[must_use]
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expiration.is_some_and(|e| e < now)
	}

	/// The lease term recorded at acquire time, if any.
	#[must_use]
	pub fn lease_duration(&self) -> Option<Duration> {
		self.lease_duration_secs.map(Duration::seconds)
	}
}

/// Free-form string map clients attach to a leased resource.
///
/// Merge semantics follow the heartbeat contract: setting a key to an empty
/// value deletes it, so clients can retract entries without a separate verb.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserData(BTreeMap<String, String>);

impl UserData {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(String::as_str)
	}

	pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.0.insert(key.into(), value.into());
	}

	/// Merge `other` into `self`. An empty value deletes the key.
	pub fn merge(&mut self, other: &UserData) {
		for (key, value) in &other.0 {
			if value.is_empty() {
				self.0.remove(key);
			} else {
				self.0.insert(key.clone(), value.clone());
			}
		}
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
		self.0.iter()
	}
}

impl FromIterator<(String, String)> for UserData {
	fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}
