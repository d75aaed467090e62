// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Corral resource broker server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use corral_jobs::JobScheduler;
use corral_ranch::{Ranch, SystemClock};
use corral_server::jobs::{spawn_config_sync, ReaperJob, RequestGcJob};
use corral_server::{create_router, watcher, AppState, LeasePolicy};
use corral_storage::sqlite::{create_memory_pool, create_pool};
use corral_storage::{SqliteStorage, Storage};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Corral - a resource leasing broker for ephemeral infrastructure.
#[derive(Parser, Debug)]
#[command(name = "corral-server", about = "Corral resource leasing broker", version)]
struct Args {
	/// Path to the declarative pool config.
	#[arg(long, default_value = "config.yaml")]
	config: PathBuf,

	/// SQLite connection string.
	#[arg(long, default_value = "sqlite:corral.db")]
	database_url: String,

	#[arg(long, default_value = "0.0.0.0")]
	host: String,

	#[arg(long, default_value_t = 8080)]
	port: u16,

	/// Queued requests lose priority after this long without a poll.
	#[arg(long, default_value_t = 30)]
	request_ttl_secs: u64,

	/// How often stale queued requests are collected.
	#[arg(long, default_value_t = 60)]
	request_gc_period_secs: u64,

	/// How often expired leases are swept. Must stay below the shortest
	/// lease the policy can grant.
	#[arg(long, default_value_t = 10)]
	reaper_period_secs: u64,

	/// State expired leases are reset to.
	#[arg(long, default_value = "dirty")]
	default_dirty_state: String,

	/// Lease term granted when the client does not ask for one.
	#[arg(long, default_value_t = 300)]
	default_lease_secs: u64,

	/// Upper bound on client-requested lease terms.
	#[arg(long, default_value_t = 3600)]
	max_lease_secs: u64,

	/// Debounce window for pool config file events.
	#[arg(long, default_value_t = 500)]
	config_debounce_ms: u64,

	#[arg(long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	dotenvy::dotenv().ok();

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| args.log_level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	tracing::info!(
		host = %args.host,
		port = args.port,
		config = %args.config.display(),
		database = %args.database_url,
		"starting corral-server"
	);

	if args.request_gc_period_secs < args.request_ttl_secs {
		tracing::warn!(
			gc_period_secs = args.request_gc_period_secs,
			request_ttl_secs = args.request_ttl_secs,
			"request GC period is below the request TTL; fresh requests may be collected"
		);
	}
	if args.reaper_period_secs * 2 > args.default_lease_secs {
		tracing::warn!(
			reaper_period_secs = args.reaper_period_secs,
			default_lease_secs = args.default_lease_secs,
			"reaper period is large relative to the default lease; recycling will lag"
		);
	}

	// Storage and catalog.
	let pool = if args.database_url.contains(":memory:") {
		create_memory_pool().await?
	} else {
		create_pool(&args.database_url).await?
	};
	let storage = Arc::new(SqliteStorage::new(pool));
	storage.run_migrations().await?;
	let storage_events = storage.watch();

	let ranch = Arc::new(Ranch::new(
		storage.clone(),
		Arc::new(SystemClock),
		Duration::from_secs(args.request_ttl_secs),
	));
	ranch.load().await?;

	// The broker must not come up with an empty pool: a broken config at
	// startup is fatal.
	ranch.sync_config_file(&args.config).await.map_err(|e| {
		tracing::error!(error = %e, config = %args.config.display(), "initial config sync failed");
		e
	})?;

	// Background jobs.
	let mut scheduler = JobScheduler::new();
	scheduler.register_periodic(
		Arc::new(ReaperJob::new(
			Arc::clone(&ranch),
			args.default_dirty_state.clone(),
		)),
		Duration::from_secs(args.reaper_period_secs),
	);
	scheduler.register_periodic(
		Arc::new(RequestGcJob::new(Arc::clone(&ranch))),
		Duration::from_secs(args.request_gc_period_secs),
	);
	let scheduler = Arc::new(scheduler);
	scheduler.start().await;

	// Config reconciliation triggers: file changes plus filtered storage
	// events.
	let file_events = match watcher::watch_config(
		&args.config,
		Duration::from_millis(args.config_debounce_ms),
	) {
		Ok(rx) => rx,
		Err(e) => {
			tracing::warn!(error = %e, "config file watch unavailable, relying on storage events");
			let (_tx, rx) = tokio::sync::mpsc::channel(1);
			rx
		}
	};
	let sync_task = spawn_config_sync(
		Arc::clone(&ranch),
		args.config.clone(),
		file_events,
		storage_events,
		scheduler.shutdown_receiver(),
	);

	let state = AppState {
		ranch: Arc::clone(&ranch),
		scheduler: Arc::clone(&scheduler),
		lease_policy: LeasePolicy {
			default: Duration::from_secs(args.default_lease_secs),
			max: Duration::from_secs(args.max_lease_secs),
		},
	};
	let router = create_router(state);

	let addr = format!("{}:{}", args.host, args.port);
	let listener = tokio::net::TcpListener::bind(&addr).await?;
	tracing::info!(addr = %addr, "serving");

	axum::serve(listener, router)
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	tracing::info!("draining background jobs");
	scheduler.shutdown().await;
	let _ = sync_task.await;

	Ok(())
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %e, "failed to listen for shutdown signal");
	}
	tracing::info!("shutdown signal received");
}
