// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Execution persistence: store trait and Postgres implementation.
//!
//! The `mark_as_*` transitions are guarded updates: they only fire when the
//! row is still in the expected source state and report whether they won.
//! That conditional update is what linearises `pending -> running` across
//! workers and lets a cancel silently beat a slow worker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use chime_core::{
	ExecutionFilter, ExecutionId, ExecutionPage, ExecutionStats, JobExecution, JobId, TenantId,
};

use crate::error::{DbError, Result};

/// Persistence contract for job executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
	async fn create(&self, execution: &JobExecution) -> Result<()>;
	async fn find_by_id(&self, id: ExecutionId) -> Result<Option<JobExecution>>;
	async fn find_by_tenant_and_id(
		&self,
		tenant_id: TenantId,
		id: ExecutionId,
	) -> Result<Option<JobExecution>>;
	async fn query(&self, filter: &ExecutionFilter) -> Result<ExecutionPage>;
	async fn find_by_job_id(&self, job_id: JobId, limit: i64) -> Result<Vec<JobExecution>>;
	/// Pending executions whose fire time has passed, oldest first. Used by
	/// the queue-overflow recovery sweep.
	async fn find_pending(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<JobExecution>>;

	/// `pending -> running`, stamping `started_at` and the worker identity.
	/// Returns false when another worker (or a cancel) already won the row.
	async fn mark_as_running(&self, id: ExecutionId, worker_id: &str) -> Result<bool>;
	/// `running -> completed` with the callback outcome.
	async fn mark_as_completed(&self, id: ExecutionId, status_code: i32, body: &str)
		-> Result<bool>;
	/// `running -> failed`.
	async fn mark_as_failed(
		&self,
		id: ExecutionId,
		error: &str,
		status_code: Option<i32>,
	) -> Result<bool>;
	/// `running -> timeout`. Accounted like a failure; the status records
	/// the cause.
	async fn mark_as_timed_out(&self, id: ExecutionId, error: &str) -> Result<bool>;
	/// `running -> retrying`, atomically incrementing `attempt`.
	async fn mark_as_retrying(&self, id: ExecutionId, error: &str) -> Result<bool>;
	/// `retrying -> pending` when the delayed re-submission lands, so the
	/// `mark_as_running` guard applies to the new attempt as well.
	async fn requeue_for_retry(&self, id: ExecutionId) -> Result<bool>;
	/// External cancel; only allowed from `pending` or `running`.
	async fn cancel(&self, id: ExecutionId) -> Result<bool>;

	async fn get_stats(
		&self,
		tenant_id: Option<TenantId>,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
	) -> Result<ExecutionStats>;
	/// Delete terminal executions created before the cutoff. Never touches
	/// pending/running/retrying rows.
	async fn cleanup_old(&self, before: DateTime<Utc>) -> Result<u64>;
}

const EXECUTION_COLUMNS: &str = "id, job_id, tenant_id, status, \
	scheduled_at, started_at, completed_at, duration AS duration_ms, \
	attempt, worker_id, status_code, response, error, created_at, updated_at";

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled', 'timeout')";

/// Postgres implementation of [`ExecutionStore`].
#[derive(Clone)]
pub struct PgExecutionStore {
	pool: PgPool,
}

impl PgExecutionStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
	#[instrument(skip(self, execution), fields(execution_id = %execution.id, job_id = %execution.job_id))]
	async fn create(&self, execution: &JobExecution) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO job_executions (
				id, job_id, tenant_id, status,
				scheduled_at, started_at, completed_at, duration,
				attempt, worker_id, status_code, response, error,
				created_at, updated_at
			)
			VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
			"#,
		)
		.bind(execution.id.0)
		.bind(execution.job_id.0)
		.bind(execution.tenant_id.0)
		.bind(execution.status.to_string())
		.bind(execution.scheduled_at)
		.bind(execution.started_at)
		.bind(execution.completed_at)
		.bind(execution.duration_ms)
		.bind(execution.attempt)
		.bind(&execution.worker_id)
		.bind(execution.status_code)
		.bind(&execution.response)
		.bind(&execution.error)
		.bind(execution.created_at)
		.bind(execution.updated_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self), fields(execution_id = %id))]
	async fn find_by_id(&self, id: ExecutionId) -> Result<Option<JobExecution>> {
		let row = sqlx::query_as::<_, ExecutionRow>(&format!(
			"SELECT {EXECUTION_COLUMNS} FROM job_executions WHERE id = $1"
		))
		.bind(id.0)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self), fields(tenant_id = %tenant_id, execution_id = %id))]
	async fn find_by_tenant_and_id(
		&self,
		tenant_id: TenantId,
		id: ExecutionId,
	) -> Result<Option<JobExecution>> {
		let row = sqlx::query_as::<_, ExecutionRow>(&format!(
			"SELECT {EXECUTION_COLUMNS} FROM job_executions WHERE id = $1 AND tenant_id = $2"
		))
		.bind(id.0)
		.bind(tenant_id.0)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self, filter))]
	async fn query(&self, filter: &ExecutionFilter) -> Result<ExecutionPage> {
		let (page, page_size) = filter.pagination();
		let offset = (page - 1) as i64 * page_size as i64;

		let job_id = filter.job_id.map(|j| j.0);
		let tenant_id = filter.tenant_id.map(|t| t.0);
		let status = filter.status.map(|s| s.to_string());

		let predicate = r#"
			($1::uuid IS NULL OR job_id = $1)
			AND ($2::uuid IS NULL OR tenant_id = $2)
			AND ($3::varchar IS NULL OR status = $3)
			AND ($4::timestamptz IS NULL OR scheduled_at >= $4)
			AND ($5::timestamptz IS NULL OR scheduled_at <= $5)
		"#;

		let total_count: i64 = sqlx::query_scalar(&format!(
			"SELECT COUNT(*) FROM job_executions WHERE {predicate}"
		))
		.bind(job_id)
		.bind(tenant_id)
		.bind(&status)
		.bind(filter.start_time)
		.bind(filter.end_time)
		.fetch_one(&self.pool)
		.await?;

		let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
			"SELECT {EXECUTION_COLUMNS} FROM job_executions WHERE {predicate} \
			 ORDER BY scheduled_at DESC LIMIT $6 OFFSET $7"
		))
		.bind(job_id)
		.bind(tenant_id)
		.bind(&status)
		.bind(filter.start_time)
		.bind(filter.end_time)
		.bind(page_size as i64)
		.bind(offset)
		.fetch_all(&self.pool)
		.await?;

		let executions = rows
			.into_iter()
			.map(TryInto::try_into)
			.collect::<Result<Vec<_>>>()?;

		Ok(ExecutionPage {
			executions,
			total_count,
			page,
			page_size,
			has_more: (page as i64) * (page_size as i64) < total_count,
		})
	}

	#[instrument(skip(self), fields(job_id = %job_id))]
	async fn find_by_job_id(&self, job_id: JobId, limit: i64) -> Result<Vec<JobExecution>> {
		let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
			"SELECT {EXECUTION_COLUMNS} FROM job_executions \
			 WHERE job_id = $1 ORDER BY scheduled_at DESC LIMIT $2"
		))
		.bind(job_id.0)
		.bind(limit)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self))]
	async fn find_pending(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<JobExecution>> {
		let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
			"SELECT {EXECUTION_COLUMNS} FROM job_executions \
			 WHERE status = 'pending' AND scheduled_at <= $1 \
			 ORDER BY scheduled_at ASC LIMIT $2"
		))
		.bind(before)
		.bind(limit)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self), fields(execution_id = %id, worker_id = %worker_id))]
	async fn mark_as_running(&self, id: ExecutionId, worker_id: &str) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE job_executions
			SET status = 'running', started_at = now(), worker_id = $2, updated_at = now()
			WHERE id = $1 AND status = 'pending'
			"#,
		)
		.bind(id.0)
		.bind(worker_id)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self, body), fields(execution_id = %id, status_code))]
	async fn mark_as_completed(
		&self,
		id: ExecutionId,
		status_code: i32,
		body: &str,
	) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE job_executions
			SET status = 'completed',
				completed_at = now(),
				duration = (EXTRACT(EPOCH FROM (now() - started_at)) * 1000)::bigint,
				status_code = $2,
				response = $3,
				updated_at = now()
			WHERE id = $1 AND status = 'running'
			"#,
		)
		.bind(id.0)
		.bind(status_code)
		.bind(body)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self, error), fields(execution_id = %id))]
	async fn mark_as_failed(
		&self,
		id: ExecutionId,
		error: &str,
		status_code: Option<i32>,
	) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE job_executions
			SET status = 'failed',
				completed_at = now(),
				duration = (EXTRACT(EPOCH FROM (now() - started_at)) * 1000)::bigint,
				error = $2,
				status_code = COALESCE($3, status_code),
				updated_at = now()
			WHERE id = $1 AND status = 'running'
			"#,
		)
		.bind(id.0)
		.bind(error)
		.bind(status_code)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self, error), fields(execution_id = %id))]
	async fn mark_as_timed_out(&self, id: ExecutionId, error: &str) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE job_executions
			SET status = 'timeout',
				completed_at = now(),
				duration = (EXTRACT(EPOCH FROM (now() - started_at)) * 1000)::bigint,
				error = $2,
				updated_at = now()
			WHERE id = $1 AND status = 'running'
			"#,
		)
		.bind(id.0)
		.bind(error)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self, error), fields(execution_id = %id))]
	async fn mark_as_retrying(&self, id: ExecutionId, error: &str) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE job_executions
			SET status = 'retrying', error = $2, attempt = attempt + 1, updated_at = now()
			WHERE id = $1 AND status = 'running'
			"#,
		)
		.bind(id.0)
		.bind(error)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self), fields(execution_id = %id))]
	async fn requeue_for_retry(&self, id: ExecutionId) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE job_executions
			SET status = 'pending', updated_at = now()
			WHERE id = $1 AND status = 'retrying'
			"#,
		)
		.bind(id.0)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self), fields(execution_id = %id))]
	async fn cancel(&self, id: ExecutionId) -> Result<bool> {
		let result = sqlx::query(
			r#"
			UPDATE job_executions
			SET status = 'cancelled', completed_at = now(), updated_at = now()
			WHERE id = $1 AND status IN ('pending', 'running')
			"#,
		)
		.bind(id.0)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self))]
	async fn get_stats(
		&self,
		tenant_id: Option<TenantId>,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
	) -> Result<ExecutionStats> {
		let counts: Vec<(String, i64)> = sqlx::query_as(
			r#"
			SELECT status, COUNT(*)
			FROM job_executions
			WHERE ($1::uuid IS NULL OR tenant_id = $1)
				AND scheduled_at >= $2 AND scheduled_at <= $3
			GROUP BY status
			"#,
		)
		.bind(tenant_id.map(|t| t.0))
		.bind(start)
		.bind(end)
		.fetch_all(&self.pool)
		.await?;

		let mut stats = ExecutionStats::default();
		for (status, count) in counts {
			stats.total += count;
			match status.as_str() {
				"completed" => stats.completed = count,
				"failed" => stats.failed = count,
				"cancelled" => stats.cancelled = count,
				"timeout" => stats.timeout = count,
				_ => {}
			}
		}

		Ok(stats)
	}

	#[instrument(skip(self))]
	async fn cleanup_old(&self, before: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query(&format!(
			"DELETE FROM job_executions WHERE created_at < $1 AND status IN {TERMINAL_STATUSES}"
		))
		.bind(before)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
	id: Uuid,
	job_id: Uuid,
	tenant_id: Uuid,
	status: String,
	scheduled_at: DateTime<Utc>,
	started_at: Option<DateTime<Utc>>,
	completed_at: Option<DateTime<Utc>>,
	duration_ms: Option<i64>,
	attempt: i32,
	worker_id: Option<String>,
	status_code: Option<i32>,
	response: Option<String>,
	error: Option<String>,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<ExecutionRow> for JobExecution {
	type Error = DbError;

	fn try_from(row: ExecutionRow) -> Result<JobExecution> {
		Ok(JobExecution {
			id: ExecutionId(row.id),
			job_id: JobId(row.job_id),
			tenant_id: TenantId(row.tenant_id),
			status: row.status.parse().map_err(DbError::Internal)?,
			scheduled_at: row.scheduled_at,
			started_at: row.started_at,
			completed_at: row.completed_at,
			duration_ms: row.duration_ms,
			attempt: row.attempt,
			worker_id: row.worker_id,
			status_code: row.status_code,
			response: row.response,
			error: row.error,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}
