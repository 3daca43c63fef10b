// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Daily history handlers.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use chime_core::JobId;

use crate::error::ServerError;
use crate::response;
use crate::tenant::Tenant;
use crate::AppState;

const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct ByJobParams {
	pub days: Option<i64>,
}

/// GET /api/v1/jobs/{id}/history - daily aggregates for one job (default:
/// the last 30 days).
#[instrument(skip(state), fields(tenant_id = %tenant, job_id = %id))]
pub async fn by_job(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Path(id): Path<Uuid>,
	Query(params): Query<ByJobParams>,
) -> Result<Response, ServerError> {
	let job = state
		.jobs
		.find_by_tenant_and_id(tenant, JobId(id))
		.await?
		.ok_or_else(|| ServerError::NotFound("job not found".to_string()))?;

	let days = params.days.filter(|d| *d > 0).unwrap_or(DEFAULT_WINDOW_DAYS);
	let history = state.history.find_by_job_id(job.id, days).await?;
	Ok(response::ok(history))
}

#[derive(Debug, Deserialize)]
pub struct DateRangeParams {
	pub start_date: Option<NaiveDate>,
	pub end_date: Option<NaiveDate>,
}

/// GET /api/v1/history - history rows over a date range (default: the last
/// 30 days).
#[instrument(skip(state))]
pub async fn date_range(
	State(state): State<AppState>,
	Query(params): Query<DateRangeParams>,
) -> Result<Response, ServerError> {
	let end = params.end_date.unwrap_or_else(|| Utc::now().date_naive());
	let start = params
		.start_date
		.unwrap_or_else(|| end - Duration::days(DEFAULT_WINDOW_DAYS));

	let history = state.history.find_by_date_range(start, end).await?;
	Ok(response::ok(history))
}

#[derive(Debug, Deserialize)]
pub struct AggregatedParams {
	pub job_id: Option<Uuid>,
	pub start_date: Option<NaiveDate>,
	pub end_date: Option<NaiveDate>,
}

/// GET /api/v1/history/stats - aggregated statistics over a required date
/// range.
#[instrument(skip(state))]
pub async fn aggregated(
	State(state): State<AppState>,
	Query(params): Query<AggregatedParams>,
) -> Result<Response, ServerError> {
	let (Some(start), Some(end)) = (params.start_date, params.end_date) else {
		return Err(ServerError::Validation(
			"start_date and end_date are required (YYYY-MM-DD)".to_string(),
		));
	};

	let stats = state
		.history
		.get_aggregated_stats(params.job_id.map(JobId), start, end)
		.await?;
	Ok(response::ok(stats))
}
