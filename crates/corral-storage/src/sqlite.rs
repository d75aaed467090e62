// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite implementation of the [`Storage`] trait.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use corral_core::{DynamicResourceLifeCycle, Resource, ResourceConfigSpec, UserData};
use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tokio::sync::broadcast;

use crate::error::{Result, StorageError};
use crate::event::StorageEvent;
use crate::store::{Storage, Versioned};

/// Buffered change events per subscriber. A reconciler that falls this far
/// behind coalesces to a full resync anyway.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Create a SqlitePool with WAL mode and common settings.
///
/// # Errors
///
/// Returns `StorageError::Internal` if the URL is invalid or the connection
/// fails.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| StorageError::Internal(format!("invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

/// Create a single-connection in-memory pool. Used by tests and by the
/// server's `--database-url sqlite::memory:` mode.
pub async fn create_memory_pool() -> Result<SqlitePool> {
	let options = SqliteConnectOptions::from_str("sqlite::memory:")
		.map_err(|e| StorageError::Internal(format!("invalid database URL: {e}")))?;
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await?;
	Ok(pool)
}

/// SQLite-backed storage for the two broker object kinds.
///
/// Optimistic concurrency: every row carries a `resource_version` counter
/// that is bumped on each write, and updates/deletes are guarded by
/// `WHERE … AND resource_version = ?`. Change events are broadcast after the
/// statement commits.
#[derive(Clone)]
pub struct SqliteStorage {
	pool: SqlitePool,
	events: broadcast::Sender<StorageEvent>,
}

impl SqliteStorage {
	#[must_use]
	pub fn new(pool: SqlitePool) -> Self {
		let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
		Self { pool, events }
	}

	/// Create the schema if it does not exist yet.
	pub async fn run_migrations(&self) -> Result<()> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS resources (
				name TEXT PRIMARY KEY,
				type TEXT NOT NULL,
				state TEXT NOT NULL,
				owner TEXT NOT NULL DEFAULT '',
				last_update TEXT NOT NULL,
				expiration TEXT,
				lease_duration_secs INTEGER,
				user_data TEXT NOT NULL DEFAULT '{}',
				resource_version INTEGER NOT NULL DEFAULT 1
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		sqlx::query(
			"CREATE INDEX IF NOT EXISTS idx_resources_type_state ON resources (type, state)",
		)
		.execute(&self.pool)
		.await?;

		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS dynamic_lifecycles (
				type TEXT PRIMARY KEY,
				initial_state TEXT NOT NULL,
				min_count INTEGER NOT NULL,
				max_count INTEGER NOT NULL,
				lifespan_secs INTEGER,
				needs TEXT NOT NULL DEFAULT '{}',
				config TEXT,
				resource_version INTEGER NOT NULL DEFAULT 1
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		tracing::debug!("storage schema ready");
		Ok(())
	}

	fn publish(&self, event: StorageEvent) {
		// Nobody listening is fine; the reconciler may not be up yet.
		let _ = self.events.send(event);
	}
}

#[derive(sqlx::FromRow)]
struct ResourceRow {
	name: String,
	#[sqlx(rename = "type")]
	resource_type: String,
	state: String,
	owner: String,
	last_update: String,
	expiration: Option<String>,
	lease_duration_secs: Option<i64>,
	user_data: String,
	resource_version: i64,
}

impl TryFrom<ResourceRow> for Versioned<Resource> {
	type Error = StorageError;

	fn try_from(row: ResourceRow) -> Result<Self> {
		let user_data: UserData = serde_json::from_str(&row.user_data)?;
		let last_update = parse_timestamp(&row.name, &row.last_update)?;
		let expiration = row
			.expiration
			.as_deref()
			.map(|raw| parse_timestamp(&row.name, raw))
			.transpose()?;

		Ok(Versioned::new(
			row.resource_version as u64,
			Resource {
				name: row.name,
				resource_type: row.resource_type,
				state: row.state,
				owner: row.owner,
				last_update,
				user_data,
				expiration,
				lease_duration_secs: row.lease_duration_secs,
			},
		))
	}
}

#[derive(sqlx::FromRow)]
struct LifecycleRow {
	#[sqlx(rename = "type")]
	resource_type: String,
	initial_state: String,
	min_count: i64,
	max_count: i64,
	lifespan_secs: Option<i64>,
	needs: String,
	config: Option<String>,
	resource_version: i64,
}

impl TryFrom<LifecycleRow> for Versioned<DynamicResourceLifeCycle> {
	type Error = StorageError;

	fn try_from(row: LifecycleRow) -> Result<Self> {
		let needs = serde_json::from_str(&row.needs)?;
		let config: Option<ResourceConfigSpec> = row
			.config
			.as_deref()
			.map(serde_json::from_str)
			.transpose()?;

		Ok(Versioned::new(
			row.resource_version as u64,
			DynamicResourceLifeCycle {
				resource_type: row.resource_type,
				initial_state: row.initial_state,
				min_count: row.min_count,
				max_count: row.max_count,
				lifespan_secs: row.lifespan_secs,
				needs,
				config,
			},
		))
	}
}

fn parse_timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(raw)
		.map(|t| t.with_timezone(&Utc))
		.map_err(|e| StorageError::Internal(format!("bad timestamp on {name}: {e}")))
}

fn format_timestamp(t: DateTime<Utc>) -> String {
	t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn map_insert_error(name: &str, e: sqlx::Error) -> StorageError {
	if let sqlx::Error::Database(db) = &e {
		if db.is_unique_violation() {
			return StorageError::AlreadyExists(name.to_string());
		}
	}
	StorageError::Sqlx(e)
}

#[async_trait]
impl Storage for SqliteStorage {
	#[tracing::instrument(skip(self))]
	async fn get_resource(&self, name: &str) -> Result<Option<Versioned<Resource>>> {
		let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources WHERE name = ?")
			.bind(name)
			.fetch_optional(&self.pool)
			.await?;

		row.map(Versioned::try_from).transpose()
	}

	async fn list_resources(&self) -> Result<Vec<Versioned<Resource>>> {
		let rows = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resources ORDER BY name")
			.fetch_all(&self.pool)
			.await?;

		rows.into_iter().map(Versioned::try_from).collect()
	}

	#[tracing::instrument(skip(self, resource), fields(name = %resource.name))]
	async fn create_resource(&self, resource: &Resource) -> Result<Versioned<Resource>> {
		let user_data = serde_json::to_string(&resource.user_data)?;
		sqlx::query(
			r#"
			INSERT INTO resources
				(name, type, state, owner, last_update, expiration, lease_duration_secs, user_data, resource_version)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)
			"#,
		)
		.bind(&resource.name)
		.bind(&resource.resource_type)
		.bind(&resource.state)
		.bind(&resource.owner)
		.bind(format_timestamp(resource.last_update))
		.bind(resource.expiration.map(format_timestamp))
		.bind(resource.lease_duration_secs)
		.bind(&user_data)
		.execute(&self.pool)
		.await
		.map_err(|e| map_insert_error(&resource.name, e))?;

		self.publish(StorageEvent::ResourceCreated {
			name: resource.name.clone(),
		});
		Ok(Versioned::new(1, resource.clone()))
	}

	#[tracing::instrument(skip(self, resource), fields(name = %resource.name))]
	async fn update_resource(
		&self,
		resource: &Resource,
		expected_version: u64,
	) -> Result<Versioned<Resource>> {
		let user_data = serde_json::to_string(&resource.user_data)?;
		let result = sqlx::query(
			r#"
			UPDATE resources SET
				type = ?,
				state = ?,
				owner = ?,
				last_update = ?,
				expiration = ?,
				lease_duration_secs = ?,
				user_data = ?,
				resource_version = resource_version + 1
			WHERE name = ? AND resource_version = ?
			"#,
		)
		.bind(&resource.resource_type)
		.bind(&resource.state)
		.bind(&resource.owner)
		.bind(format_timestamp(resource.last_update))
		.bind(resource.expiration.map(format_timestamp))
		.bind(resource.lease_duration_secs)
		.bind(&user_data)
		.bind(&resource.name)
		.bind(expected_version as i64)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return match self.get_resource(&resource.name).await? {
				Some(_) => Err(StorageError::Conflict {
					name: resource.name.clone(),
					expected: expected_version,
				}),
				None => Err(StorageError::NotFound(resource.name.clone())),
			};
		}

		self.publish(StorageEvent::ResourceUpdated {
			name: resource.name.clone(),
			state: resource.state.clone(),
			owner: resource.owner.clone(),
		});
		Ok(Versioned::new(expected_version + 1, resource.clone()))
	}

	#[tracing::instrument(skip(self))]
	async fn delete_resource(&self, name: &str, expected_version: u64) -> Result<()> {
		let result = sqlx::query("DELETE FROM resources WHERE name = ? AND resource_version = ?")
			.bind(name)
			.bind(expected_version as i64)
			.execute(&self.pool)
			.await?;

		if result.rows_affected() == 0 {
			return match self.get_resource(name).await? {
				Some(_) => Err(StorageError::Conflict {
					name: name.to_string(),
					expected: expected_version,
				}),
				None => Err(StorageError::NotFound(name.to_string())),
			};
		}

		self.publish(StorageEvent::ResourceDeleted {
			name: name.to_string(),
		});
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	async fn get_lifecycle(
		&self,
		resource_type: &str,
	) -> Result<Option<Versioned<DynamicResourceLifeCycle>>> {
		let row =
			sqlx::query_as::<_, LifecycleRow>("SELECT * FROM dynamic_lifecycles WHERE type = ?")
				.bind(resource_type)
				.fetch_optional(&self.pool)
				.await?;

		row.map(Versioned::try_from).transpose()
	}

	async fn list_lifecycles(&self) -> Result<Vec<Versioned<DynamicResourceLifeCycle>>> {
		let rows =
			sqlx::query_as::<_, LifecycleRow>("SELECT * FROM dynamic_lifecycles ORDER BY type")
				.fetch_all(&self.pool)
				.await?;

		rows.into_iter().map(Versioned::try_from).collect()
	}

	#[tracing::instrument(skip(self, lifecycle), fields(resource_type = %lifecycle.resource_type))]
	async fn create_lifecycle(
		&self,
		lifecycle: &DynamicResourceLifeCycle,
	) -> Result<Versioned<DynamicResourceLifeCycle>> {
		let needs = serde_json::to_string(&lifecycle.needs)?;
		let config = lifecycle
			.config
			.as_ref()
			.map(serde_json::to_string)
			.transpose()?;

		sqlx::query(
			r#"
			INSERT INTO dynamic_lifecycles
				(type, initial_state, min_count, max_count, lifespan_secs, needs, config, resource_version)
			VALUES (?, ?, ?, ?, ?, ?, ?, 1)
			"#,
		)
		.bind(&lifecycle.resource_type)
		.bind(&lifecycle.initial_state)
		.bind(lifecycle.min_count)
		.bind(lifecycle.max_count)
		.bind(lifecycle.lifespan_secs)
		.bind(&needs)
		.bind(config)
		.execute(&self.pool)
		.await
		.map_err(|e| map_insert_error(&lifecycle.resource_type, e))?;

		self.publish(StorageEvent::LifecycleChanged {
			resource_type: lifecycle.resource_type.clone(),
		});
		Ok(Versioned::new(1, lifecycle.clone()))
	}

	#[tracing::instrument(skip(self, lifecycle), fields(resource_type = %lifecycle.resource_type))]
	async fn update_lifecycle(
		&self,
		lifecycle: &DynamicResourceLifeCycle,
		expected_version: u64,
	) -> Result<Versioned<DynamicResourceLifeCycle>> {
		let needs = serde_json::to_string(&lifecycle.needs)?;
		let config = lifecycle
			.config
			.as_ref()
			.map(serde_json::to_string)
			.transpose()?;

		let result = sqlx::query(
			r#"
			UPDATE dynamic_lifecycles SET
				initial_state = ?,
				min_count = ?,
				max_count = ?,
				lifespan_secs = ?,
				needs = ?,
				config = ?,
				resource_version = resource_version + 1
			WHERE type = ? AND resource_version = ?
			"#,
		)
		.bind(&lifecycle.initial_state)
		.bind(lifecycle.min_count)
		.bind(lifecycle.max_count)
		.bind(lifecycle.lifespan_secs)
		.bind(&needs)
		.bind(config)
		.bind(&lifecycle.resource_type)
		.bind(expected_version as i64)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return match self.get_lifecycle(&lifecycle.resource_type).await? {
				Some(_) => Err(StorageError::Conflict {
					name: lifecycle.resource_type.clone(),
					expected: expected_version,
				}),
				None => Err(StorageError::NotFound(lifecycle.resource_type.clone())),
			};
		}

		self.publish(StorageEvent::LifecycleChanged {
			resource_type: lifecycle.resource_type.clone(),
		});
		Ok(Versioned::new(expected_version + 1, lifecycle.clone()))
	}

	#[tracing::instrument(skip(self))]
	async fn delete_lifecycle(&self, resource_type: &str, expected_version: u64) -> Result<()> {
		let result =
			sqlx::query("DELETE FROM dynamic_lifecycles WHERE type = ? AND resource_version = ?")
				.bind(resource_type)
				.bind(expected_version as i64)
				.execute(&self.pool)
				.await?;

		if result.rows_affected() == 0 {
			return match self.get_lifecycle(resource_type).await? {
				Some(_) => Err(StorageError::Conflict {
					name: resource_type.to_string(),
					expected: expected_version,
				}),
				None => Err(StorageError::NotFound(resource_type.to_string())),
			};
		}

		self.publish(StorageEvent::LifecycleChanged {
			resource_type: resource_type.to_string(),
		});
		Ok(())
	}

	fn watch(&self) -> broadcast::Receiver<StorageEvent> {
		self.events.subscribe()
	}
}
