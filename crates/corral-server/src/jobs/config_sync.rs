// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Config reconciliation trigger.
//!
//! One task serializes every reconciliation. It wakes on pool-config file
//! changes and on storage events that can change pool shape; in-lease churn
//! is filtered out so heartbeats do not feed back into the reconciler.

use std::path::PathBuf;
use std::sync::Arc;

use corral_ranch::Ranch;
use corral_storage::StorageEvent;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Spawn the config-sync listener. A failed reconciliation is logged and
/// retried on the next trigger; the last good pool persists.
pub fn spawn_config_sync(
	ranch: Arc<Ranch>,
	config_path: PathBuf,
	mut file_events: mpsc::Receiver<()>,
	mut storage_events: broadcast::Receiver<StorageEvent>,
	mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut file_watch_alive = true;
		loop {
			let trigger = tokio::select! {
				_ = shutdown.recv() => break,
				event = file_events.recv(), if file_watch_alive => match event {
					Some(()) => "config file changed",
					None => {
						// The watcher died; storage events still drive
						// reconciliation.
						warn!("config file watch ended");
						file_watch_alive = false;
						continue;
					}
				},
				event = storage_events.recv() => match event {
					Ok(e) if e.affects_pool_shape() => "storage event",
					Ok(_) => continue,
					// Dropped events may have carried pool-shape changes;
					// a full sync covers whatever was missed.
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!(skipped, "storage event stream lagged, resyncing");
						"storage event stream lagged"
					}
					Err(broadcast::error::RecvError::Closed) => break,
				},
			};

			info!(trigger, "reconciling pool config");
			if let Err(e) = ranch.sync_config_file(&config_path).await {
				error!(error = %e, "config sync failed");
			}
		}
		info!("config sync listener stopped");
	})
}
