// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job persistence: store trait and Postgres implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use chime_core::{Job, JobFilter, JobId, JobPage, JobStats, JobStatus, TenantId};

use crate::error::{DbError, Result};

/// Persistence contract for jobs, consumed by the scheduling engine and the
/// HTTP surface.
#[async_trait]
pub trait JobStore: Send + Sync {
	async fn create(&self, job: &Job) -> Result<()>;
	async fn update(&self, job: &Job) -> Result<()>;
	async fn find_by_id(&self, id: JobId) -> Result<Option<Job>>;
	async fn find_by_tenant_and_id(&self, tenant_id: TenantId, id: JobId) -> Result<Option<Job>>;
	async fn query(&self, filter: &JobFilter) -> Result<JobPage>;

	/// Active jobs whose `next_run_at` has arrived, ordered
	/// `priority DESC, next_run_at ASC`.
	async fn find_due_for_execution(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Job>>;

	async fn update_next_run_at(&self, id: JobId, next_run_at: DateTime<Utc>) -> Result<()>;
	/// One-time jobs have their fire time cleared after dispatch so the
	/// sweep never selects them again.
	async fn clear_next_run_at(&self, id: JobId) -> Result<()>;
	/// Stamp `last_run_at` and bump `run_count` or `fail_count`. The
	/// increment happens inside the database so concurrent workers do not
	/// clobber each other.
	async fn update_last_run_at(&self, id: JobId, success: bool) -> Result<()>;
	async fn update_status(&self, id: JobId, status: JobStatus) -> Result<()>;
	/// Terminal: there is no transition out of `deleted`.
	async fn soft_delete(&self, id: JobId) -> Result<()>;

	async fn get_stats(&self, tenant_id: Option<TenantId>) -> Result<JobStats>;
}

const JOB_COLUMNS: &str = "id, tenant_id, name, description, \
	type AS job_type, status, schedule, timezone, \
	endpoint, method, headers, payload, \
	timeout AS timeout_secs, max_retries, retry_delay AS retry_delay_secs, priority, \
	tags, metadata, next_run_at, last_run_at, run_count, fail_count, \
	created_at, updated_at";

/// Postgres implementation of [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
	pool: PgPool,
}

impl PgJobStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl JobStore for PgJobStore {
	#[instrument(skip(self, job), fields(job_id = %job.id, tenant_id = %job.tenant_id))]
	async fn create(&self, job: &Job) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO jobs (
				id, tenant_id, name, description,
				type, status, schedule, timezone,
				endpoint, method, headers, payload,
				timeout, max_retries, retry_delay, priority,
				tags, metadata, next_run_at, last_run_at,
				run_count, fail_count, created_at, updated_at
			)
			VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
					$13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
			"#,
		)
		.bind(job.id.0)
		.bind(job.tenant_id.0)
		.bind(&job.name)
		.bind(&job.description)
		.bind(job.job_type.to_string())
		.bind(job.status.to_string())
		.bind(&job.schedule)
		.bind(&job.timezone)
		.bind(&job.endpoint)
		.bind(&job.method)
		.bind(&job.headers)
		.bind(&job.payload)
		.bind(job.timeout_secs)
		.bind(job.max_retries)
		.bind(job.retry_delay_secs)
		.bind(job.priority)
		.bind(&job.tags)
		.bind(&job.metadata)
		.bind(job.next_run_at)
		.bind(job.last_run_at)
		.bind(job.run_count)
		.bind(job.fail_count)
		.bind(job.created_at)
		.bind(job.updated_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self, job), fields(job_id = %job.id))]
	async fn update(&self, job: &Job) -> Result<()> {
		sqlx::query(
			r#"
			UPDATE jobs
			SET name = $2, description = $3,
				schedule = $4, timezone = $5,
				endpoint = $6, method = $7, headers = $8, payload = $9,
				timeout = $10, max_retries = $11, retry_delay = $12, priority = $13,
				tags = $14, metadata = $15,
				status = $16, next_run_at = $17,
				updated_at = $18
			WHERE id = $1
			"#,
		)
		.bind(job.id.0)
		.bind(&job.name)
		.bind(&job.description)
		.bind(&job.schedule)
		.bind(&job.timezone)
		.bind(&job.endpoint)
		.bind(&job.method)
		.bind(&job.headers)
		.bind(&job.payload)
		.bind(job.timeout_secs)
		.bind(job.max_retries)
		.bind(job.retry_delay_secs)
		.bind(job.priority)
		.bind(&job.tags)
		.bind(&job.metadata)
		.bind(job.status.to_string())
		.bind(job.next_run_at)
		.bind(job.updated_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self), fields(job_id = %id))]
	async fn find_by_id(&self, id: JobId) -> Result<Option<Job>> {
		let row = sqlx::query_as::<_, JobRow>(&format!(
			"SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
		))
		.bind(id.0)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self), fields(tenant_id = %tenant_id, job_id = %id))]
	async fn find_by_tenant_and_id(&self, tenant_id: TenantId, id: JobId) -> Result<Option<Job>> {
		let row = sqlx::query_as::<_, JobRow>(&format!(
			"SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 AND tenant_id = $2"
		))
		.bind(id.0)
		.bind(tenant_id.0)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self, filter))]
	async fn query(&self, filter: &JobFilter) -> Result<JobPage> {
		let (page, page_size) = filter.pagination();
		let offset = (page - 1) as i64 * page_size as i64;

		let tenant_id = filter.tenant_id.map(|t| t.0);
		let status = filter.status.map(|s| s.to_string());
		let job_type = filter.job_type.map(|t| t.to_string());
		let name = filter.name.as_ref().map(|n| format!("%{}%", n.to_lowercase()));

		// Deleted jobs are hidden unless explicitly asked for.
		let predicate = r#"
			($1::uuid IS NULL OR tenant_id = $1)
			AND (CASE WHEN $2::varchar IS NULL THEN status <> 'deleted' ELSE status = $2 END)
			AND ($3::varchar IS NULL OR type = $3)
			AND ($4::varchar IS NULL OR LOWER(name) LIKE $4)
		"#;

		let total_count: i64 =
			sqlx::query_scalar(&format!("SELECT COUNT(*) FROM jobs WHERE {predicate}"))
				.bind(tenant_id)
				.bind(&status)
				.bind(&job_type)
				.bind(&name)
				.fetch_one(&self.pool)
				.await?;

		let rows = sqlx::query_as::<_, JobRow>(&format!(
			"SELECT {JOB_COLUMNS} FROM jobs WHERE {predicate} \
			 ORDER BY created_at DESC LIMIT $5 OFFSET $6"
		))
		.bind(tenant_id)
		.bind(&status)
		.bind(&job_type)
		.bind(&name)
		.bind(page_size as i64)
		.bind(offset)
		.fetch_all(&self.pool)
		.await?;

		let jobs = rows
			.into_iter()
			.map(TryInto::try_into)
			.collect::<Result<Vec<_>>>()?;

		Ok(JobPage {
			jobs,
			total_count,
			page,
			page_size,
			has_more: (page as i64) * (page_size as i64) < total_count,
		})
	}

	#[instrument(skip(self))]
	async fn find_due_for_execution(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
		let rows = sqlx::query_as::<_, JobRow>(&format!(
			"SELECT {JOB_COLUMNS} FROM jobs \
			 WHERE status = 'active' AND next_run_at IS NOT NULL AND next_run_at <= $1 \
			 ORDER BY priority DESC, next_run_at ASC \
			 LIMIT $2"
		))
		.bind(before)
		.bind(limit)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self), fields(job_id = %id))]
	async fn update_next_run_at(&self, id: JobId, next_run_at: DateTime<Utc>) -> Result<()> {
		sqlx::query("UPDATE jobs SET next_run_at = $2, updated_at = now() WHERE id = $1")
			.bind(id.0)
			.bind(next_run_at)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[instrument(skip(self), fields(job_id = %id))]
	async fn clear_next_run_at(&self, id: JobId) -> Result<()> {
		sqlx::query("UPDATE jobs SET next_run_at = NULL, updated_at = now() WHERE id = $1")
			.bind(id.0)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[instrument(skip(self), fields(job_id = %id))]
	async fn update_last_run_at(&self, id: JobId, success: bool) -> Result<()> {
		let sql = if success {
			"UPDATE jobs SET last_run_at = now(), run_count = run_count + 1, updated_at = now() \
			 WHERE id = $1"
		} else {
			"UPDATE jobs SET last_run_at = now(), fail_count = fail_count + 1, updated_at = now() \
			 WHERE id = $1"
		};
		sqlx::query(sql).bind(id.0).execute(&self.pool).await?;
		Ok(())
	}

	#[instrument(skip(self), fields(job_id = %id, status = %status))]
	async fn update_status(&self, id: JobId, status: JobStatus) -> Result<()> {
		sqlx::query("UPDATE jobs SET status = $2, updated_at = now() WHERE id = $1")
			.bind(id.0)
			.bind(status.to_string())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[instrument(skip(self), fields(job_id = %id))]
	async fn soft_delete(&self, id: JobId) -> Result<()> {
		self.update_status(id, JobStatus::Deleted).await
	}

	#[instrument(skip(self))]
	async fn get_stats(&self, tenant_id: Option<TenantId>) -> Result<JobStats> {
		let tenant = tenant_id.map(|t| t.0);

		let counts: Vec<(String, String, i64)> = sqlx::query_as(
			r#"
			SELECT type, status, COUNT(*)
			FROM jobs
			WHERE ($1::uuid IS NULL OR tenant_id = $1)
			GROUP BY type, status
			"#,
		)
		.bind(tenant)
		.fetch_all(&self.pool)
		.await?;

		let mut stats = JobStats::default();
		for (job_type, status, count) in counts {
			*stats.jobs_by_status.entry(status.clone()).or_default() += count;
			match status.as_str() {
				"deleted" => continue,
				"active" => stats.active_jobs += count,
				"paused" => stats.paused_jobs += count,
				_ => {}
			}
			stats.total_jobs += count;
			*stats.jobs_by_type.entry(job_type).or_default() += count;
		}

		Ok(stats)
	}
}

#[derive(sqlx::FromRow)]
struct JobRow {
	id: Uuid,
	tenant_id: Uuid,
	name: String,
	description: Option<String>,
	job_type: String,
	status: String,
	schedule: String,
	timezone: String,
	endpoint: String,
	method: String,
	headers: Option<serde_json::Value>,
	payload: Option<serde_json::Value>,
	timeout_secs: i32,
	max_retries: i32,
	retry_delay_secs: i32,
	priority: i32,
	tags: Vec<String>,
	metadata: Option<serde_json::Value>,
	next_run_at: Option<DateTime<Utc>>,
	last_run_at: Option<DateTime<Utc>>,
	run_count: i64,
	fail_count: i64,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
	type Error = DbError;

	fn try_from(row: JobRow) -> Result<Job> {
		Ok(Job {
			id: JobId(row.id),
			tenant_id: TenantId(row.tenant_id),
			name: row.name,
			description: row.description,
			job_type: row
				.job_type
				.parse()
				.map_err(|e: chime_core::CoreError| DbError::Internal(e.to_string()))?,
			status: row.status.parse().map_err(DbError::Internal)?,
			schedule: row.schedule,
			timezone: row.timezone,
			endpoint: row.endpoint,
			method: row.method,
			headers: row.headers,
			payload: row.payload,
			timeout_secs: row.timeout_secs,
			max_retries: row.max_retries,
			retry_delay_secs: row.retry_delay_secs,
			priority: row.priority,
			tags: row.tags,
			metadata: row.metadata,
			next_run_at: row.next_run_at,
			last_run_at: row.last_run_at,
			run_count: row.run_count,
			fail_count: row.fail_count,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}
