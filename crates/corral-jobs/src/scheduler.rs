// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::{CancellationToken, JobContext};
use crate::error::{JobError, Result};
use crate::health::{HealthState, JobHealthStatus, JobsHealthStatus, LastRunInfo, RunStatus};
use crate::job::Job;

const BASE_RETRY_DELAY_SECS: u64 = 1;
const MAX_RETRY_DELAY_SECS: u64 = 60;
const RETRY_FACTOR: f64 = 2.0;
const MAX_RETRIES: u32 = 3;

struct RegisteredJob {
	job: Arc<dyn Job>,
	interval: Duration,
	cancellation_token: CancellationToken,
}

#[derive(Default)]
struct JobRecord {
	name: String,
	consecutive_failures: u32,
	last_run: Option<LastRunInfo>,
}

type HealthMap = Arc<StdMutex<HashMap<String, JobRecord>>>;

/// Runs registered jobs on their periodic intervals until shutdown.
///
/// Every job loop listens on a shared broadcast channel; `shutdown` fans the
/// signal out and joins the loops. Failed runs are retried with exponential
/// backoff when the job marks the failure retryable.
pub struct JobScheduler {
	jobs: Vec<RegisteredJob>,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
	health: HealthMap,
}

impl JobScheduler {
	#[must_use]
	pub fn new() -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			jobs: Vec::new(),
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
			health: Arc::new(StdMutex::new(HashMap::new())),
		}
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		self.jobs.push(RegisteredJob {
			job,
			interval,
			cancellation_token: CancellationToken::new(),
		});
	}

	/// A receiver on the scheduler's shutdown channel, for auxiliary tasks
	/// that should drain alongside the jobs.
	#[must_use]
	pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
		self.shutdown_tx.subscribe()
	}

	/// Spawn one loop per registered job.
	pub async fn start(&self) {
		let mut handles = self.handles.lock().await;

		for registered in &self.jobs {
			{
				let mut health = self.health.lock().expect("health map poisoned");
				health.insert(
					registered.job.id().to_string(),
					JobRecord {
						name: registered.job.name().to_string(),
						..JobRecord::default()
					},
				);
			}

			let job = Arc::clone(&registered.job);
			let interval = registered.interval;
			let cancellation_token = registered.cancellation_token.clone();
			let health = Arc::clone(&self.health);
			let mut shutdown_rx = self.shutdown_tx.subscribe();

			let handle = tokio::spawn(async move {
				loop {
					tokio::select! {
						_ = tokio::time::sleep(interval) => {
							if cancellation_token.is_cancelled() {
								continue;
							}
							run_job_with_retry(&job, &health, &cancellation_token).await;
						}
						_ = shutdown_rx.recv() => {
							info!(job_id = %job.id(), "shutting down periodic job");
							break;
						}
					}
				}
			});
			handles.push(handle);
		}

		info!(jobs = self.jobs.len(), "job scheduler started");
	}

	/// Disable a job: its loop skips future runs and an in-flight run bails
	/// at its next cancellation check instead of retrying.
	#[tracing::instrument(skip(self))]
	pub fn cancel_job(&self, job_id: &str) -> Result<()> {
		let registered = self
			.jobs
			.iter()
			.find(|r| r.job.id() == job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		registered.cancellation_token.cancel();
		Ok(())
	}

	/// Cancel every job, signal shutdown, and wait for the loops to drain.
	/// Cancelling first means an in-flight run gives up instead of sitting
	/// out its retry backoff while the process waits on it.
	pub async fn shutdown(&self) {
		for registered in &self.jobs {
			registered.cancellation_token.cancel();
		}
		let _ = self.shutdown_tx.send(());
		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}
	}

	/// Health snapshot across all registered jobs.
	#[must_use]
	pub fn health_status(&self) -> JobsHealthStatus {
		let health = self.health.lock().expect("health map poisoned");
		let jobs = health
			.iter()
			.map(|(id, record)| JobHealthStatus {
				job_id: id.clone(),
				name: record.name.clone(),
				status: health_state(record.consecutive_failures),
				last_run: record.last_run.clone(),
				consecutive_failures: record.consecutive_failures,
			})
			.collect();
		JobsHealthStatus::aggregate(jobs)
	}
}

impl Default for JobScheduler {
	fn default() -> Self {
		Self::new()
	}
}

fn health_state(consecutive_failures: u32) -> HealthState {
	match consecutive_failures {
		0 => HealthState::Healthy,
		1..=2 => HealthState::Degraded,
		_ => HealthState::Unhealthy,
	}
}

async fn run_job_with_retry(
	job: &Arc<dyn Job>,
	health: &HealthMap,
	cancellation_token: &CancellationToken,
) {
	let run_id = Uuid::now_v7().to_string();
	let started_at = Utc::now();
	let start = Instant::now();

	let mut delay = BASE_RETRY_DELAY_SECS;
	let mut attempt = 0;
	let result = loop {
		let ctx = JobContext {
			run_id: run_id.clone(),
			cancellation_token: cancellation_token.clone(),
		};
		match job.run(&ctx).await {
			Ok(output) => break Ok(output),
			Err(e)
				if e.is_retryable()
					&& attempt < MAX_RETRIES
					&& !cancellation_token.is_cancelled() =>
			{
				attempt += 1;
				warn!(
					job_id = %job.id(),
					attempt,
					delay_secs = delay,
					error = %e,
					"job failed, retrying"
				);
				tokio::time::sleep(Duration::from_secs(delay)).await;
				delay = ((delay as f64 * RETRY_FACTOR) as u64).min(MAX_RETRY_DELAY_SECS);
			}
			Err(e) => break Err(e),
		}
	};

	let duration_ms = start.elapsed().as_millis() as i64;
	let mut health = health.lock().expect("health map poisoned");
	let record = health.entry(job.id().to_string()).or_default();

	match result {
		Ok(output) => {
			record.consecutive_failures = 0;
			record.last_run = Some(LastRunInfo {
				run_id,
				status: RunStatus::Succeeded,
				started_at,
				duration_ms: Some(duration_ms),
				error: None,
			});
			tracing::debug!(job_id = %job.id(), message = %output.message, "job run complete");
		}
		Err(e) => {
			let status = match e {
				JobError::Cancelled => RunStatus::Cancelled,
				JobError::Failed { .. } => RunStatus::Failed,
				JobError::NotFound(_) => RunStatus::Failed,
			};
			if status == RunStatus::Failed {
				record.consecutive_failures += 1;
			}
			record.last_run = Some(LastRunInfo {
				run_id,
				status,
				started_at,
				duration_ms: Some(duration_ms),
				error: Some(e.to_string()),
			});
			warn!(job_id = %job.id(), error = %e, "job run failed");
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use async_trait::async_trait;

	use super::*;
	use crate::error::Result;
	use crate::job::JobOutput;

	struct CountingJob {
		runs: Arc<AtomicU32>,
	}

	#[async_trait]
	impl Job for CountingJob {
		fn id(&self) -> &str {
			"counting"
		}

		fn name(&self) -> &str {
			"Counting"
		}

		fn description(&self) -> &str {
			"Counts its runs"
		}

		async fn run(&self, _ctx: &JobContext) -> Result<JobOutput> {
			self.runs.fetch_add(1, Ordering::SeqCst);
			Ok(JobOutput::new("counted"))
		}
	}

	struct FailingJob;

	#[async_trait]
	impl Job for FailingJob {
		fn id(&self) -> &str {
			"failing"
		}

		fn name(&self) -> &str {
			"Failing"
		}

		fn description(&self) -> &str {
			"Always fails"
		}

		async fn run(&self, _ctx: &JobContext) -> Result<JobOutput> {
			Err(JobError::Failed {
				message: "boom".to_string(),
				retryable: false,
			})
		}
	}

	#[tokio::test]
	async fn test_periodic_job_runs_until_shutdown() {
		let runs = Arc::new(AtomicU32::new(0));
		let mut scheduler = JobScheduler::new();
		scheduler.register_periodic(
			Arc::new(CountingJob {
				runs: Arc::clone(&runs),
			}),
			Duration::from_millis(10),
		);

		scheduler.start().await;
		tokio::time::sleep(Duration::from_millis(100)).await;
		scheduler.shutdown().await;

		let after_shutdown = runs.load(Ordering::SeqCst);
		assert!(after_shutdown >= 1);

		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
	}

	#[tokio::test]
	async fn test_failures_degrade_then_sicken_health() {
		let mut scheduler = JobScheduler::new();
		scheduler.register_periodic(Arc::new(FailingJob), Duration::from_millis(10));

		scheduler.start().await;
		tokio::time::sleep(Duration::from_millis(200)).await;
		scheduler.shutdown().await;

		let status = scheduler.health_status();
		assert_ne!(status.status, HealthState::Healthy);
		let job = &status.jobs[0];
		assert_eq!(job.job_id, "failing");
		assert!(job.consecutive_failures >= 1);
		assert_eq!(
			job.last_run.as_ref().map(|r| r.status),
			Some(RunStatus::Failed)
		);
	}

	#[tokio::test]
	async fn test_cancel_job_stops_future_runs() {
		let runs = Arc::new(AtomicU32::new(0));
		let mut scheduler = JobScheduler::new();
		scheduler.register_periodic(
			Arc::new(CountingJob {
				runs: Arc::clone(&runs),
			}),
			Duration::from_millis(10),
		);

		scheduler.start().await;
		tokio::time::sleep(Duration::from_millis(50)).await;
		scheduler.cancel_job("counting").unwrap();

		// Let any in-flight run settle, then the count must hold still.
		tokio::time::sleep(Duration::from_millis(30)).await;
		let after_cancel = runs.load(Ordering::SeqCst);
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(runs.load(Ordering::SeqCst), after_cancel);

		scheduler.shutdown().await;
	}

	#[tokio::test]
	async fn test_cancel_unknown_job_is_not_found() {
		let scheduler = JobScheduler::new();
		assert!(matches!(
			scheduler.cancel_job("nope"),
			Err(JobError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_health_is_healthy_before_first_run() {
		let mut scheduler = JobScheduler::new();
		scheduler.register_periodic(Arc::new(FailingJob), Duration::from_secs(3600));

		scheduler.start().await;
		let status = scheduler.health_status();
		scheduler.shutdown().await;

		assert_eq!(status.status, HealthState::Healthy);
	}
}
