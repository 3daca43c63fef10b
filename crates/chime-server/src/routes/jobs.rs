// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job CRUD and lifecycle handlers.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

use chime_core::{
	initial_run_at, CreateJobRequest, JobFilter, JobId, JobStatus, JobType, UpdateJobRequest,
};

use crate::error::ServerError;
use crate::response::{self, Meta};
use crate::tenant::Tenant;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct JobListParams {
	pub status: Option<String>,
	#[serde(rename = "type")]
	pub job_type: Option<String>,
	pub name: Option<String>,
	pub page: Option<u32>,
	pub page_size: Option<u32>,
}

/// GET /api/v1/jobs - paginated job listing for the tenant.
#[instrument(skip(state), fields(tenant_id = %tenant))]
pub async fn list(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Query(params): Query<JobListParams>,
) -> Result<Response, ServerError> {
	let status = params
		.status
		.as_deref()
		.map(JobStatus::from_str)
		.transpose()
		.map_err(ServerError::Validation)?;
	let job_type = params
		.job_type
		.as_deref()
		.map(JobType::from_str)
		.transpose()
		.map_err(|e| ServerError::Validation(e.to_string()))?;

	let filter = JobFilter {
		tenant_id: Some(tenant),
		status,
		job_type,
		name: params.name,
		page: params.page,
		page_size: params.page_size,
	};

	let page = state.jobs.query(&filter).await?;
	Ok(response::ok_with_meta(
		page.jobs,
		Meta {
			page: page.page,
			page_size: page.page_size,
			total_count: page.total_count,
			has_more: page.has_more,
		},
	))
}

/// POST /api/v1/jobs - create a job. Policy fields omitted in the request
/// fall back to the configured scheduler defaults.
#[instrument(skip(state, request), fields(tenant_id = %tenant))]
pub async fn create(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Json(mut request): Json<CreateJobRequest>,
) -> Result<Response, ServerError> {
	request.timeout.get_or_insert(state.job_defaults.timeout_secs);
	request
		.max_retries
		.get_or_insert(state.job_defaults.max_retries);
	request
		.retry_delay
		.get_or_insert(state.job_defaults.retry_delay_secs);
	if request.timezone.is_none() {
		request.timezone = Some(state.job_defaults.timezone.clone());
	}

	request.validate()?;

	let now = Utc::now();
	let mut job = request.into_job(tenant, now);
	job.next_run_at = initial_run_at(job.job_type, &job.schedule, &job.timezone, now)?;

	state.jobs.create(&job).await?;
	Ok(response::created(job))
}

/// GET /api/v1/jobs/{id}
#[instrument(skip(state), fields(tenant_id = %tenant, job_id = %id))]
pub async fn get(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Path(id): Path<Uuid>,
) -> Result<Response, ServerError> {
	let job = state
		.jobs
		.find_by_tenant_and_id(tenant, JobId(id))
		.await?
		.ok_or_else(|| ServerError::NotFound("job not found".to_string()))?;
	Ok(response::ok(job))
}

/// PUT /api/v1/jobs/{id} - partial update. A changed schedule or timezone
/// recomputes the next fire time.
#[instrument(skip(state, request), fields(tenant_id = %tenant, job_id = %id))]
pub async fn update(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Path(id): Path<Uuid>,
	Json(request): Json<UpdateJobRequest>,
) -> Result<Response, ServerError> {
	let mut job = state
		.jobs
		.find_by_tenant_and_id(tenant, JobId(id))
		.await?
		.ok_or_else(|| ServerError::NotFound("job not found".to_string()))?;

	if job.status == JobStatus::Deleted {
		return Err(ServerError::Conflict("job is deleted".to_string()));
	}

	let schedule_changed = request.schedule.is_some() || request.timezone.is_some();
	let now = Utc::now();
	request.apply(&mut job, now)?;

	if schedule_changed {
		job.next_run_at = initial_run_at(job.job_type, &job.schedule, &job.timezone, now)?;
	}

	state.jobs.update(&job).await?;
	Ok(response::ok(job))
}

/// DELETE /api/v1/jobs/{id} - soft delete; terminal.
#[instrument(skip(state), fields(tenant_id = %tenant, job_id = %id))]
pub async fn delete(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Path(id): Path<Uuid>,
) -> Result<Response, ServerError> {
	let job = state
		.jobs
		.find_by_tenant_and_id(tenant, JobId(id))
		.await?
		.ok_or_else(|| ServerError::NotFound("job not found".to_string()))?;

	state.jobs.soft_delete(job.id).await?;
	Ok(response::no_content())
}

/// POST /api/v1/jobs/{id}/trigger - fire now, regardless of schedule.
/// Allowed for active and paused jobs.
#[instrument(skip(state), fields(tenant_id = %tenant, job_id = %id))]
pub async fn trigger(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Path(id): Path<Uuid>,
) -> Result<Response, ServerError> {
	let job = state
		.jobs
		.find_by_tenant_and_id(tenant, JobId(id))
		.await?
		.ok_or_else(|| ServerError::NotFound("job not found".to_string()))?;

	let execution = state.scheduler.trigger(job.id).await?;
	Ok(response::created(execution))
}

/// POST /api/v1/jobs/{id}/pause
#[instrument(skip(state), fields(tenant_id = %tenant, job_id = %id))]
pub async fn pause(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Path(id): Path<Uuid>,
) -> Result<Response, ServerError> {
	set_status(&state, tenant, JobId(id), JobStatus::Paused).await
}

/// POST /api/v1/jobs/{id}/resume
#[instrument(skip(state), fields(tenant_id = %tenant, job_id = %id))]
pub async fn resume(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
	Path(id): Path<Uuid>,
) -> Result<Response, ServerError> {
	set_status(&state, tenant, JobId(id), JobStatus::Active).await
}

async fn set_status(
	state: &AppState,
	tenant: chime_core::TenantId,
	id: JobId,
	status: JobStatus,
) -> Result<Response, ServerError> {
	let mut job = state
		.jobs
		.find_by_tenant_and_id(tenant, id)
		.await?
		.ok_or_else(|| ServerError::NotFound("job not found".to_string()))?;

	if job.status == JobStatus::Deleted {
		return Err(ServerError::Conflict("job is deleted".to_string()));
	}

	state.jobs.update_status(job.id, status).await?;
	job.status = status;

	// A resumed recurring job needs a fire time to re-enter the sweep.
	if status == JobStatus::Active
		&& job.next_run_at.is_none()
		&& job.job_type != JobType::OneTime
	{
		let next = initial_run_at(job.job_type, &job.schedule, &job.timezone, Utc::now())?;
		if let Some(next) = next {
			state.jobs.update_next_run_at(job.id, next).await?;
			job.next_run_at = Some(next);
		}
	}

	Ok(response::ok(job))
}

/// GET /api/v1/jobs/stats
#[instrument(skip(state), fields(tenant_id = %tenant))]
pub async fn stats(
	State(state): State<AppState>,
	Tenant(tenant): Tenant,
) -> Result<Response, ServerError> {
	let stats = state.jobs.get_stats(Some(tenant)).await?;
	Ok(response::ok(stats))
}
