// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Daily history persistence: store trait and Postgres implementation.
//!
//! Two workers can land outcomes for the same `(job_id, date)` in the same
//! instant, so both increments are single `INSERT ... ON CONFLICT` statements
//! evaluated inside the database rather than read-modify-write round trips.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use chime_core::{AggregatedHistoryStats, HistoryId, JobHistory, JobId, TenantId};

use crate::error::{DbError, Result};

/// Persistence contract for daily per-job aggregates.
#[async_trait]
pub trait HistoryStore: Send + Sync {
	/// Record one successful execution: bump `success_count` and fold the
	/// duration into total/avg/min/max. Atomic per call.
	async fn increment_success(
		&self,
		job_id: JobId,
		tenant_id: TenantId,
		date: NaiveDate,
		duration_ms: i64,
	) -> Result<()>;

	/// Record one failed execution. Duration stats only track successes.
	async fn increment_failure(
		&self,
		job_id: JobId,
		tenant_id: TenantId,
		date: NaiveDate,
	) -> Result<()>;

	async fn find_by_job_id(&self, job_id: JobId, days: i64) -> Result<Vec<JobHistory>>;
	async fn find_by_date_range(&self, start: NaiveDate, end: NaiveDate)
		-> Result<Vec<JobHistory>>;
	async fn get_aggregated_stats(
		&self,
		job_id: Option<JobId>,
		start: NaiveDate,
		end: NaiveDate,
	) -> Result<AggregatedHistoryStats>;
	async fn cleanup_old(&self, before: NaiveDate) -> Result<u64>;
}

const HISTORY_COLUMNS: &str = "id, job_id, tenant_id, date, \
	success_count, failure_count, \
	total_duration AS total_duration_ms, avg_duration AS avg_duration_ms, \
	min_duration AS min_duration_ms, max_duration AS max_duration_ms, \
	created_at, updated_at";

/// Postgres implementation of [`HistoryStore`].
#[derive(Clone)]
pub struct PgHistoryStore {
	pool: PgPool,
}

impl PgHistoryStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
	#[instrument(skip(self), fields(job_id = %job_id, %date, duration_ms))]
	async fn increment_success(
		&self,
		job_id: JobId,
		tenant_id: TenantId,
		date: NaiveDate,
		duration_ms: i64,
	) -> Result<()> {
		// A failure-only row carries min_duration = 0 as "no sample yet";
		// the CASE keeps it from pinning the minimum at zero forever.
		sqlx::query(
			r#"
			INSERT INTO job_histories (
				id, job_id, tenant_id, date,
				success_count, failure_count,
				total_duration, avg_duration, min_duration, max_duration,
				created_at, updated_at
			)
			VALUES ($1, $2, $3, $4, 1, 0, $5, $5, $5, $5, now(), now())
			ON CONFLICT (job_id, date) DO UPDATE SET
				success_count = job_histories.success_count + 1,
				total_duration = job_histories.total_duration + excluded.total_duration,
				avg_duration = (job_histories.total_duration + excluded.total_duration)
					/ (job_histories.success_count + 1),
				min_duration = CASE
					WHEN job_histories.success_count = 0 THEN excluded.min_duration
					ELSE LEAST(job_histories.min_duration, excluded.min_duration)
				END,
				max_duration = GREATEST(job_histories.max_duration, excluded.max_duration),
				updated_at = now()
			"#,
		)
		.bind(Uuid::new_v4())
		.bind(job_id.0)
		.bind(tenant_id.0)
		.bind(date)
		.bind(duration_ms)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self), fields(job_id = %job_id, %date))]
	async fn increment_failure(
		&self,
		job_id: JobId,
		tenant_id: TenantId,
		date: NaiveDate,
	) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO job_histories (
				id, job_id, tenant_id, date,
				success_count, failure_count,
				total_duration, avg_duration, min_duration, max_duration,
				created_at, updated_at
			)
			VALUES ($1, $2, $3, $4, 0, 1, 0, 0, 0, 0, now(), now())
			ON CONFLICT (job_id, date) DO UPDATE SET
				failure_count = job_histories.failure_count + 1,
				updated_at = now()
			"#,
		)
		.bind(Uuid::new_v4())
		.bind(job_id.0)
		.bind(tenant_id.0)
		.bind(date)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self), fields(job_id = %job_id, days))]
	async fn find_by_job_id(&self, job_id: JobId, days: i64) -> Result<Vec<JobHistory>> {
		let since = (Utc::now() - Duration::days(days)).date_naive();

		let rows = sqlx::query_as::<_, HistoryRow>(&format!(
			"SELECT {HISTORY_COLUMNS} FROM job_histories \
			 WHERE job_id = $1 AND date >= $2 ORDER BY date DESC"
		))
		.bind(job_id.0)
		.bind(since)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self))]
	async fn find_by_date_range(
		&self,
		start: NaiveDate,
		end: NaiveDate,
	) -> Result<Vec<JobHistory>> {
		let rows = sqlx::query_as::<_, HistoryRow>(&format!(
			"SELECT {HISTORY_COLUMNS} FROM job_histories \
			 WHERE date >= $1 AND date <= $2 ORDER BY date DESC, job_id"
		))
		.bind(start)
		.bind(end)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self))]
	async fn get_aggregated_stats(
		&self,
		job_id: Option<JobId>,
		start: NaiveDate,
		end: NaiveDate,
	) -> Result<AggregatedHistoryStats> {
		let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
			r#"
			SELECT
				COALESCE(SUM(success_count), 0)::bigint,
				COALESCE(SUM(failure_count), 0)::bigint,
				COALESCE(SUM(total_duration), 0)::bigint,
				COALESCE(MIN(NULLIF(min_duration, 0)), 0)::bigint,
				COALESCE(MAX(max_duration), 0)::bigint
			FROM job_histories
			WHERE ($1::uuid IS NULL OR job_id = $1)
				AND date >= $2 AND date <= $3
			"#,
		)
		.bind(job_id.map(|j| j.0))
		.bind(start)
		.bind(end)
		.fetch_one(&self.pool)
		.await?;

		Ok(AggregatedHistoryStats {
			total_success: row.0,
			total_failure: row.1,
			total_duration_ms: row.2,
			min_duration_ms: row.3,
			max_duration_ms: row.4,
			..Default::default()
		}
		.finalise())
	}

	#[instrument(skip(self))]
	async fn cleanup_old(&self, before: NaiveDate) -> Result<u64> {
		let result = sqlx::query("DELETE FROM job_histories WHERE date < $1")
			.bind(before)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
	id: Uuid,
	job_id: Uuid,
	tenant_id: Uuid,
	date: NaiveDate,
	success_count: i64,
	failure_count: i64,
	total_duration_ms: i64,
	avg_duration_ms: i64,
	min_duration_ms: i64,
	max_duration_ms: i64,
	created_at: chrono::DateTime<Utc>,
	updated_at: chrono::DateTime<Utc>,
}

impl TryFrom<HistoryRow> for JobHistory {
	type Error = DbError;

	fn try_from(row: HistoryRow) -> Result<JobHistory> {
		Ok(JobHistory {
			id: HistoryId(row.id),
			job_id: JobId(row.job_id),
			tenant_id: TenantId(row.tenant_id),
			date: row.date,
			success_count: row.success_count,
			failure_count: row.failure_count,
			total_duration_ms: row.total_duration_ms,
			avg_duration_ms: row.avg_duration_ms,
			min_duration_ms: row.min_duration_ms,
			max_duration_ms: row.max_duration_ms,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}
