// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Execution listing, inspection and cancellation handlers.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

use chime_core::{ExecutionFilter, ExecutionId, ExecutionStatus, JobId};

use crate::error::ServerError;
use crate::response::{self, Meta};
use crate::tenant::Tenant;
use crate::AppState;

const DEFAULT_STATS_WINDOW_DAYS: i64 = 7;
const DEFAULT_BY_JOB_LIMIT: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct ExecutionListParams {
	pub job_id: Option<Uuid>,
	pub status: Option<String>,
	pub start_time: Option<DateTime<Utc>>,
	pub end_time: Option<DateTime<Utc>>,
	pub page: Option<u32>,
	pub page_size: Option<u32>,
}

/// GET /api/v1/executions - paginated execution listing for the tenant.
#[instrument(skip(state), fields(tenant_id = %tenant))]
pub async fn list(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Query(params): Query<ExecutionListParams>,
) -> Result<Response, ServerError> {
	let status = params
		.status
		.as_deref()
		.map(ExecutionStatus::from_str)
		.transpose()
		.map_err(ServerError::Validation)?;

	let filter = ExecutionFilter {
		job_id: params.job_id.map(JobId),
		tenant_id: Some(tenant),
		status,
		start_time: params.start_time,
		end_time: params.end_time,
		page: params.page,
		page_size: params.page_size,
	};

	let page = state.executions.query(&filter).await?;
	Ok(response::ok_with_meta(
		page.executions,
		Meta {
			page: page.page,
			page_size: page.page_size,
			total_count: page.total_count,
			has_more: page.has_more,
		},
	))
}

/// GET /api/v1/executions/{id}
#[instrument(skip(state), fields(tenant_id = %tenant, execution_id = %id))]
pub async fn get(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Path(id): Path<Uuid>,
) -> Result<Response, ServerError> {
	let execution = state
		.executions
		.find_by_tenant_and_id(tenant, ExecutionId(id))
		.await?
		.ok_or_else(|| ServerError::NotFound("execution not found".to_string()))?;
	Ok(response::ok(execution))
}

/// POST /api/v1/executions/{id}/cancel - cooperative cancel, only from
/// `pending` or `running`.
#[instrument(skip(state), fields(tenant_id = %tenant, execution_id = %id))]
pub async fn cancel(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Path(id): Path<Uuid>,
) -> Result<Response, ServerError> {
	let execution = state
		.executions
		.find_by_tenant_and_id(tenant, ExecutionId(id))
		.await?
		.ok_or_else(|| ServerError::NotFound("execution not found".to_string()))?;

	if !state.executions.cancel(execution.id).await? {
		return Err(ServerError::Conflict(format!(
			"execution cannot be cancelled in status: {}",
			execution.status
		)));
	}

	let cancelled = state
		.executions
		.find_by_id(execution.id)
		.await?
		.ok_or_else(|| ServerError::NotFound("execution not found".to_string()))?;
	Ok(response::ok(cancelled))
}

#[derive(Debug, Deserialize)]
pub struct ExecutionStatsParams {
	pub start_time: Option<DateTime<Utc>>,
	pub end_time: Option<DateTime<Utc>>,
}

/// GET /api/v1/executions/stats - counts by status over a window
/// (default: the last seven days).
#[instrument(skip(state), fields(tenant_id = %tenant))]
pub async fn stats(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Query(params): Query<ExecutionStatsParams>,
) -> Result<Response, ServerError> {
	let end = params.end_time.unwrap_or_else(Utc::now);
	let start = params
		.start_time
		.unwrap_or_else(|| end - Duration::days(DEFAULT_STATS_WINDOW_DAYS));

	let stats = state.executions.get_stats(Some(tenant), start, end).await?;
	Ok(response::ok(stats))
}

#[derive(Debug, Deserialize)]
pub struct ByJobParams {
	pub limit: Option<i64>,
}

/// GET /api/v1/jobs/{id}/executions - recent executions of one job.
#[instrument(skip(state), fields(tenant_id = %tenant, job_id = %id))]
pub async fn list_by_job(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Path(id): Path<Uuid>,
	Query(params): Query<ByJobParams>,
) -> Result<Response, ServerError> {
	// Tenant scoping happens through the job lookup.
	let job = state
		.jobs
		.find_by_tenant_and_id(tenant, JobId(id))
		.await?
		.ok_or_else(|| ServerError::NotFound("job not found".to_string()))?;

	let limit = params.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_BY_JOB_LIMIT);
	let executions = state.executions.find_by_job_id(job.id, limit).await?;
	Ok(response::ok(executions))
}
