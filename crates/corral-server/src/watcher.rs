// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pool-config file watcher.

use std::path::Path;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use tokio::sync::mpsc;

/// Watch the pool config file and emit a unit event per debounced change
/// batch.
///
/// The debouncer is parked in a background task to keep it alive for the
/// life of the process.
///
/// # Errors
///
/// Returns a [`notify::Error`] when the watcher cannot be created or the
/// path cannot be watched (for example, the file does not exist yet).
pub fn watch_config(path: &Path, debounce: Duration) -> Result<mpsc::Receiver<()>, notify::Error> {
	let (tx, rx) = mpsc::channel(16);

	let mut debouncer = new_debouncer(
		debounce,
		move |result: notify_debouncer_mini::DebounceEventResult| {
			if let Ok(events) = result {
				if !events.is_empty() {
					let _ = tx.blocking_send(());
				}
			}
		},
	)?;

	debouncer.watcher().watch(path, RecursiveMode::NonRecursive)?;

	tokio::spawn(async move {
		let _debouncer = debouncer;
		tokio::time::sleep(Duration::from_secs(u64::MAX)).await;
	});

	Ok(rx)
}
