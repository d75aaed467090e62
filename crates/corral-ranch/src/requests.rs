// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! FIFO request queues with TTL-based demotion.
//!
//! One queue per `(resource_type, state)` pair. Order is fixed by first
//! submission; freshness is measured from the most recent poll, so a client
//! that keeps polling holds its place while a client that disappears loses
//! priority after the TTL and is eventually collected by the GC.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

/// Queue identity: what is being waited for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestKey {
	pub resource_type: String,
	pub state: String,
}

impl RequestKey {
	#[must_use]
	pub fn new(resource_type: impl Into<String>, state: impl Into<String>) -> Self {
		Self {
			resource_type: resource_type.into(),
			state: state.into(),
		}
	}
}

#[derive(Debug, Clone)]
struct QueuedRequest {
	id: String,
	submitted_at: DateTime<Utc>,
	last_polled: DateTime<Utc>,
}

impl QueuedRequest {
	fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
		now - self.last_polled < ttl
	}
}

/// All pending acquisition requests, by queue key.
///
/// In-memory only: a broker restart empties the queues and clients
/// re-submit on their next poll.
#[derive(Debug)]
pub struct RequestQueue {
	ttl: Duration,
	queues: BTreeMap<RequestKey, Vec<QueuedRequest>>,
}

impl RequestQueue {
	#[must_use]
	pub fn new(ttl: Duration) -> Self {
		Self {
			ttl,
			queues: BTreeMap::new(),
		}
	}

	/// Rank `request_id` among the fresh requests for `key`, enqueueing it
	/// on first sight and refreshing its poll time. Rank 1 is the head and
	/// wins the next matching resource.
	pub fn rank(&mut self, key: &RequestKey, request_id: &str, now: DateTime<Utc>) -> usize {
		let queue = self.queues.entry(key.clone()).or_default();

		if let Some(request) = queue.iter_mut().find(|r| r.id == request_id) {
			request.last_polled = now;
		} else {
			queue.push(QueuedRequest {
				id: request_id.to_string(),
				submitted_at: now,
				last_polled: now,
			});
		}

		// Entries are append-ordered by submission; stale ones do not count
		// toward rank but keep their slot until the GC removes them.
		let mut rank = 0;
		for request in queue.iter() {
			if !request.is_fresh(now, self.ttl) {
				continue;
			}
			rank += 1;
			if request.id == request_id {
				break;
			}
		}
		rank
	}

	/// Whether `request_id` is already enqueued for `key`. A brand-new
	/// request is parked for one poll cycle before it can win, so two
	/// clients racing to submit cannot leapfrog an earlier requester that
	/// has not re-polled yet.
	#[must_use]
	pub fn contains(&self, key: &RequestKey, request_id: &str) -> bool {
		self.queues
			.get(key)
			.is_some_and(|q| q.iter().any(|r| r.id == request_id))
	}

	/// Whether any fresh request is waiting on `key`. Anonymous acquires
	/// check this so they never starve queued callers.
	#[must_use]
	pub fn has_fresh(&self, key: &RequestKey, now: DateTime<Utc>) -> bool {
		self.queues
			.get(key)
			.is_some_and(|q| q.iter().any(|r| r.is_fresh(now, self.ttl)))
	}

	/// Drop a satisfied request.
	pub fn remove(&mut self, key: &RequestKey, request_id: &str) {
		if let Some(queue) = self.queues.get_mut(key) {
			queue.retain(|r| r.id != request_id);
			if queue.is_empty() {
				self.queues.remove(key);
			}
		}
	}

	/// Drop every request that has not polled within the TTL. Returns how
	/// many were collected.
	pub fn prune_stale(&mut self, now: DateTime<Utc>) -> usize {
		let ttl = self.ttl;
		let mut removed = 0;
		self.queues.retain(|_, queue| {
			let before = queue.len();
			queue.retain(|r| r.is_fresh(now, ttl));
			removed += before - queue.len();
			!queue.is_empty()
		});
		removed
	}

	/// Total queued requests, fresh or stale.
	#[must_use]
	pub fn len(&self) -> usize {
		self.queues.values().map(Vec::len).sum()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const TTL_SECS: i64 = 30;

	fn queue() -> RequestQueue {
		RequestQueue::new(Duration::seconds(TTL_SECS))
	}

	fn at(start: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
		start + Duration::seconds(secs)
	}

	#[test]
	fn test_first_request_ranks_first() {
		let mut queue = queue();
		let key = RequestKey::new("cluster", "free");
		let t0 = Utc::now();

		assert_eq!(queue.rank(&key, "a", t0), 1);
		assert_eq!(queue.rank(&key, "b", at(t0, 1)), 2);
		assert_eq!(queue.rank(&key, "a", at(t0, 2)), 1);
	}

	#[test]
	fn test_fifo_order_survives_repolling() {
		let mut queue = queue();
		let key = RequestKey::new("cluster", "free");
		let t0 = Utc::now();

		queue.rank(&key, "a", t0);
		queue.rank(&key, "b", at(t0, 1));
		// b polling again does not overtake a.
		assert_eq!(queue.rank(&key, "b", at(t0, 2)), 2);
		assert_eq!(queue.rank(&key, "a", at(t0, 3)), 1);
	}

	#[test]
	fn test_silent_requester_goes_stale_and_loses_priority() {
		let mut queue = queue();
		let key = RequestKey::new("cluster", "free");
		let t0 = Utc::now();

		queue.rank(&key, "a", t0);
		queue.rank(&key, "b", at(t0, 5));

		// At t=31 a has not polled for 31s > TTL; b is the head.
		assert_eq!(queue.rank(&key, "b", at(t0, 31)), 1);
	}

	#[test]
	fn test_stale_requester_revives_with_original_position() {
		let mut queue = queue();
		let key = RequestKey::new("cluster", "free");
		let t0 = Utc::now();

		queue.rank(&key, "a", t0);
		queue.rank(&key, "b", at(t0, 5));
		assert_eq!(queue.rank(&key, "b", at(t0, 40)), 1);

		// a comes back before the GC ran: fresh again, original slot.
		assert_eq!(queue.rank(&key, "a", at(t0, 41)), 1);
		assert_eq!(queue.rank(&key, "b", at(t0, 42)), 2);
	}

	#[test]
	fn test_has_fresh_ignores_stale_entries() {
		let mut queue = queue();
		let key = RequestKey::new("cluster", "free");
		let t0 = Utc::now();

		queue.rank(&key, "a", t0);
		assert!(queue.has_fresh(&key, at(t0, 10)));
		assert!(!queue.has_fresh(&key, at(t0, 31)));
	}

	#[test]
	fn test_remove_drops_only_the_named_request() {
		let mut queue = queue();
		let key = RequestKey::new("cluster", "free");
		let t0 = Utc::now();

		queue.rank(&key, "a", t0);
		queue.rank(&key, "b", at(t0, 1));
		queue.remove(&key, "a");

		assert_eq!(queue.len(), 1);
		assert_eq!(queue.rank(&key, "b", at(t0, 2)), 1);
	}

	#[test]
	fn test_prune_stale_collects_silent_requests() {
		let mut queue = queue();
		let key = RequestKey::new("cluster", "free");
		let t0 = Utc::now();

		queue.rank(&key, "a", t0);
		queue.rank(&key, "b", at(t0, 20));

		assert_eq!(queue.prune_stale(at(t0, 31)), 1);
		assert_eq!(queue.len(), 1);
		// The survivor is b; a fresh pruned map drops empty queues.
		assert_eq!(queue.rank(&key, "b", at(t0, 32)), 1);
	}

	#[test]
	fn test_queues_are_independent_per_key() {
		let mut queue = queue();
		let free = RequestKey::new("cluster", "free");
		let dirty = RequestKey::new("cluster", "dirty");
		let t0 = Utc::now();

		queue.rank(&free, "a", t0);
		assert_eq!(queue.rank(&dirty, "a", at(t0, 1)), 1);
		assert!(queue.has_fresh(&free, at(t0, 2)));
	}
}
