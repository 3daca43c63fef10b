// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job types for the callback scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::schedule::validate_schedule;

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for JobId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for JobId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Tenant ID (for multi-tenant isolation). The nil UUID is the anonymous
/// tenant used when no identity header is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}

	pub fn nil() -> Self {
		Self(Uuid::nil())
	}
}

impl Default for TenantId {
	fn default() -> Self {
		Self::nil()
	}
}

impl fmt::Display for TenantId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for TenantId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Temporal pattern of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
	/// Recurring 6-field cron expression (seconds first), with descriptors.
	Cron,
	/// Fixed interval, schedule is seconds as a JSON integer.
	Interval,
	/// Fires at most once, schedule is an RFC 3339 instant.
	OneTime,
}

impl fmt::Display for JobType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Cron => write!(f, "cron"),
			Self::Interval => write!(f, "interval"),
			Self::OneTime => write!(f, "one_time"),
		}
	}
}

impl FromStr for JobType {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"cron" => Ok(Self::Cron),
			"interval" => Ok(Self::Interval),
			"one_time" => Ok(Self::OneTime),
			_ => Err(CoreError::UnknownJobType(s.to_string())),
		}
	}
}

/// Lifecycle status of a job. Only `Active` jobs are eligible for dispatch;
/// `Deleted` is terminal (soft delete).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Active,
	Paused,
	Disabled,
	Deleted,
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Active => write!(f, "active"),
			Self::Paused => write!(f, "paused"),
			Self::Disabled => write!(f, "disabled"),
			Self::Deleted => write!(f, "deleted"),
		}
	}
}

impl FromStr for JobStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"active" => Ok(Self::Active),
			"paused" => Ok(Self::Paused),
			"disabled" => Ok(Self::Disabled),
			"deleted" => Ok(Self::Deleted),
			_ => Err(format!("unknown job status: {}", s)),
		}
	}
}

pub const DEFAULT_TIMEOUT_SECS: i32 = 30;
pub const DEFAULT_MAX_RETRIES: i32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: i32 = 60;
pub const DEFAULT_PRIORITY: i32 = 5;
pub const DEFAULT_METHOD: &str = "POST";
pub const DEFAULT_TIMEZONE: &str = "UTC";

pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 10;

/// A scheduled job: a temporal spec plus an HTTP callback spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
	pub id: JobId,
	pub tenant_id: TenantId,
	pub name: String,
	pub description: Option<String>,

	#[serde(rename = "type")]
	pub job_type: JobType,
	pub status: JobStatus,
	/// Interpreted per `job_type` (cron expression, interval seconds, or
	/// RFC 3339 instant).
	pub schedule: String,
	/// IANA timezone: "America/New_York". Only meaningful for cron jobs.
	pub timezone: String,

	/// Absolute URL the callback is sent to.
	pub endpoint: String,
	pub method: String,
	/// JSON object of header name -> value applied to the callback.
	pub headers: Option<serde_json::Value>,
	/// Raw JSON body sent with the callback.
	pub payload: Option<serde_json::Value>,

	/// Per-attempt deadline in seconds.
	pub timeout_secs: i32,
	pub max_retries: i32,
	/// Fixed delay between attempts, in seconds.
	pub retry_delay_secs: i32,
	/// 1-10, higher fires first when multiple jobs are due.
	pub priority: i32,

	pub tags: Vec<String>,
	pub metadata: Option<serde_json::Value>,

	pub next_run_at: Option<DateTime<Utc>>,
	pub last_run_at: Option<DateTime<Utc>>,
	pub run_count: i64,
	pub fail_count: i64,

	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Job {
	/// Serialize the payload to the raw bytes sent as the request body.
	/// Absent payload means an empty body.
	pub fn payload_bytes(&self) -> Vec<u8> {
		self
			.payload
			.as_ref()
			.map(|p| serde_json::to_vec(p).unwrap_or_default())
			.unwrap_or_default()
	}
}

/// Request to create a new job. Optional fields fall back to the defaults
/// above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
	pub name: String,
	pub description: Option<String>,
	#[serde(rename = "type")]
	pub job_type: JobType,
	pub schedule: String,
	pub timezone: Option<String>,
	pub endpoint: String,
	pub method: Option<String>,
	pub headers: Option<serde_json::Value>,
	pub payload: Option<serde_json::Value>,
	pub timeout: Option<i32>,
	pub max_retries: Option<i32>,
	pub retry_delay: Option<i32>,
	pub priority: Option<i32>,
	pub tags: Option<Vec<String>>,
	pub metadata: Option<serde_json::Value>,
}

impl CreateJobRequest {
	/// Validate the request against the schedule grammar and the policy
	/// bounds. Rejects exactly the schedules `next_run` rejects.
	pub fn validate(&self) -> Result<()> {
		if self.name.trim().is_empty() {
			return Err(CoreError::Validation("name must not be empty".to_string()));
		}
		if self.endpoint.trim().is_empty() {
			return Err(CoreError::Validation(
				"endpoint must not be empty".to_string(),
			));
		}
		if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
			return Err(CoreError::Validation(
				"endpoint must be an absolute http(s) URL".to_string(),
			));
		}
		if let Some(timeout) = self.timeout {
			if timeout < 1 {
				return Err(CoreError::Validation(
					"timeout must be at least 1 second".to_string(),
				));
			}
		}
		if let Some(max_retries) = self.max_retries {
			if max_retries < 0 {
				return Err(CoreError::Validation(
					"max_retries must not be negative".to_string(),
				));
			}
		}
		if let Some(retry_delay) = self.retry_delay {
			if retry_delay < 1 {
				return Err(CoreError::Validation(
					"retry_delay must be at least 1 second".to_string(),
				));
			}
		}
		if let Some(priority) = self.priority {
			if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
				return Err(CoreError::Validation(format!(
					"priority must be between {} and {}",
					MIN_PRIORITY, MAX_PRIORITY
				)));
			}
		}

		let timezone = self.timezone.as_deref().unwrap_or(DEFAULT_TIMEZONE);
		validate_schedule(self.job_type, &self.schedule, timezone)
	}

	/// Build a full job record from the request, applying defaults. The
	/// caller computes and sets `next_run_at`.
	pub fn into_job(self, tenant_id: TenantId, now: DateTime<Utc>) -> Job {
		Job {
			id: JobId::new(),
			tenant_id,
			name: self.name,
			description: self.description,
			job_type: self.job_type,
			status: JobStatus::Active,
			schedule: self.schedule,
			timezone: self
				.timezone
				.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
			endpoint: self.endpoint,
			method: self.method.unwrap_or_else(|| DEFAULT_METHOD.to_string()),
			headers: self.headers,
			payload: self.payload,
			timeout_secs: self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS),
			max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
			retry_delay_secs: self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY_SECS),
			priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
			tags: self.tags.unwrap_or_default(),
			metadata: self.metadata,
			next_run_at: None,
			last_run_at: None,
			run_count: 0,
			fail_count: 0,
			created_at: now,
			updated_at: now,
		}
	}
}

/// Partial update for a job. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateJobRequest {
	pub name: Option<String>,
	pub description: Option<String>,
	pub schedule: Option<String>,
	pub timezone: Option<String>,
	pub endpoint: Option<String>,
	pub method: Option<String>,
	pub headers: Option<serde_json::Value>,
	pub payload: Option<serde_json::Value>,
	pub timeout: Option<i32>,
	pub max_retries: Option<i32>,
	pub retry_delay: Option<i32>,
	pub priority: Option<i32>,
	pub tags: Option<Vec<String>>,
	pub metadata: Option<serde_json::Value>,
}

impl UpdateJobRequest {
	/// Apply the update to an existing job, re-validating any changed
	/// schedule under the job's (possibly also changed) timezone.
	pub fn apply(self, job: &mut Job, now: DateTime<Utc>) -> Result<()> {
		if let Some(name) = self.name {
			if name.trim().is_empty() {
				return Err(CoreError::Validation("name must not be empty".to_string()));
			}
			job.name = name;
		}
		if let Some(description) = self.description {
			job.description = Some(description);
		}
		if let Some(timezone) = self.timezone {
			job.timezone = timezone;
		}
		if let Some(schedule) = self.schedule {
			validate_schedule(job.job_type, &schedule, &job.timezone)?;
			job.schedule = schedule;
		}
		if let Some(endpoint) = self.endpoint {
			if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
				return Err(CoreError::Validation(
					"endpoint must be an absolute http(s) URL".to_string(),
				));
			}
			job.endpoint = endpoint;
		}
		if let Some(method) = self.method {
			job.method = method;
		}
		if let Some(headers) = self.headers {
			job.headers = Some(headers);
		}
		if let Some(payload) = self.payload {
			job.payload = Some(payload);
		}
		if let Some(timeout) = self.timeout {
			if timeout < 1 {
				return Err(CoreError::Validation(
					"timeout must be at least 1 second".to_string(),
				));
			}
			job.timeout_secs = timeout;
		}
		if let Some(max_retries) = self.max_retries {
			if max_retries < 0 {
				return Err(CoreError::Validation(
					"max_retries must not be negative".to_string(),
				));
			}
			job.max_retries = max_retries;
		}
		if let Some(retry_delay) = self.retry_delay {
			if retry_delay < 1 {
				return Err(CoreError::Validation(
					"retry_delay must be at least 1 second".to_string(),
				));
			}
			job.retry_delay_secs = retry_delay;
		}
		if let Some(priority) = self.priority {
			if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
				return Err(CoreError::Validation(format!(
					"priority must be between {} and {}",
					MIN_PRIORITY, MAX_PRIORITY
				)));
			}
			job.priority = priority;
		}
		if let Some(tags) = self.tags {
			job.tags = tags;
		}
		if let Some(metadata) = self.metadata {
			job.metadata = Some(metadata);
		}
		job.updated_at = now;
		Ok(())
	}
}

/// Query filters for job listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
	pub tenant_id: Option<TenantId>,
	pub status: Option<JobStatus>,
	#[serde(rename = "type")]
	pub job_type: Option<JobType>,
	/// Case-insensitive name substring match.
	pub name: Option<String>,
	pub page: Option<u32>,
	pub page_size: Option<u32>,
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

impl JobFilter {
	/// Normalised (page, page_size) with the documented bounds applied.
	pub fn pagination(&self) -> (u32, u32) {
		normalise_pagination(self.page, self.page_size)
	}
}

pub(crate) fn normalise_pagination(page: Option<u32>, page_size: Option<u32>) -> (u32, u32) {
	let page = page.filter(|p| *p >= 1).unwrap_or(1);
	let page_size = page_size
		.filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
		.unwrap_or(DEFAULT_PAGE_SIZE);
	(page, page_size)
}

/// One page of job results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPage {
	pub jobs: Vec<Job>,
	pub total_count: i64,
	pub page: u32,
	pub page_size: u32,
	pub has_more: bool,
}

/// Aggregate job statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
	pub total_jobs: i64,
	pub active_jobs: i64,
	pub paused_jobs: i64,
	pub jobs_by_type: std::collections::HashMap<String, i64>,
	pub jobs_by_status: std::collections::HashMap<String, i64>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn request(job_type: JobType, schedule: &str) -> CreateJobRequest {
		CreateJobRequest {
			name: "nightly-export".to_string(),
			description: None,
			job_type,
			schedule: schedule.to_string(),
			timezone: None,
			endpoint: "https://example.com/hook".to_string(),
			method: None,
			headers: None,
			payload: None,
			timeout: None,
			max_retries: None,
			retry_delay: None,
			priority: None,
			tags: None,
			metadata: None,
		}
	}

	#[test]
	fn create_request_applies_defaults() {
		let req = request(JobType::Interval, "300");
		req.validate().unwrap();
		let job = req.into_job(TenantId::nil(), chrono::Utc::now());
		assert_eq!(job.status, JobStatus::Active);
		assert_eq!(job.method, "POST");
		assert_eq!(job.timeout_secs, DEFAULT_TIMEOUT_SECS);
		assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
		assert_eq!(job.retry_delay_secs, DEFAULT_RETRY_DELAY_SECS);
		assert_eq!(job.priority, DEFAULT_PRIORITY);
		assert_eq!(job.timezone, "UTC");
	}

	#[test]
	fn create_request_rejects_bad_priority() {
		let mut req = request(JobType::Interval, "60");
		req.priority = Some(11);
		assert!(req.validate().is_err());
		req.priority = Some(0);
		assert!(req.validate().is_err());
		req.priority = Some(10);
		assert!(req.validate().is_ok());
	}

	#[test]
	fn create_request_rejects_zero_timeout() {
		let mut req = request(JobType::Interval, "60");
		req.timeout = Some(0);
		assert!(req.validate().is_err());
	}

	#[test]
	fn create_request_rejects_relative_endpoint() {
		let mut req = request(JobType::Interval, "60");
		req.endpoint = "/hook".to_string();
		assert!(req.validate().is_err());
	}

	#[test]
	fn update_recomputes_nothing_by_itself() {
		let req = request(JobType::Cron, "0 0 * * * *");
		let mut job = req.into_job(TenantId::nil(), chrono::Utc::now());
		let update = UpdateJobRequest {
			schedule: Some("bogus".to_string()),
			..Default::default()
		};
		assert!(update.apply(&mut job, chrono::Utc::now()).is_err());
		// Failed update leaves the schedule untouched.
		assert_eq!(job.schedule, "0 0 * * * *");
	}

	#[test]
	fn pagination_bounds() {
		assert_eq!(normalise_pagination(None, None), (1, DEFAULT_PAGE_SIZE));
		assert_eq!(normalise_pagination(Some(0), Some(0)), (1, DEFAULT_PAGE_SIZE));
		assert_eq!(normalise_pagination(Some(3), Some(500)), (3, DEFAULT_PAGE_SIZE));
		assert_eq!(normalise_pagination(Some(2), Some(100)), (2, 100));
	}

	proptest! {
		#[test]
		fn job_id_roundtrip(uuid_bytes in any::<[u8; 16]>()) {
			let id = JobId(Uuid::from_bytes(uuid_bytes));
			let parsed: JobId = id.to_string().parse().unwrap();
			prop_assert_eq!(id, parsed);
		}

		#[test]
		fn job_status_roundtrip(status in prop_oneof![
			Just(JobStatus::Active),
			Just(JobStatus::Paused),
			Just(JobStatus::Disabled),
			Just(JobStatus::Deleted),
		]) {
			let parsed: JobStatus = status.to_string().parse().unwrap();
			prop_assert_eq!(status, parsed);
		}

		#[test]
		fn job_type_roundtrip(job_type in prop_oneof![
			Just(JobType::Cron),
			Just(JobType::Interval),
			Just(JobType::OneTime),
		]) {
			let parsed: JobType = job_type.to_string().parse().unwrap();
			prop_assert_eq!(job_type, parsed);
		}
	}
}
