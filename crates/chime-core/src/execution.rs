// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Execution types: one row per attempt-series of a job at a fire time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::job::{normalise_pagination, JobId, TenantId};

/// Unique identifier for a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for ExecutionId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for ExecutionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ExecutionId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Lifecycle of an execution.
///
/// `pending → running → {completed, failed, retrying, cancelled, timeout}`.
/// `Retrying` re-enters pending semantics when the delayed re-submission
/// lands; all other non-pending, non-running states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
	Pending,
	Running,
	Completed,
	Failed,
	Retrying,
	Cancelled,
	Timeout,
}

impl ExecutionStatus {
	/// Terminal states never transition again.
	pub fn is_terminal(self) -> bool {
		matches!(
			self,
			Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
		)
	}
}

impl fmt::Display for ExecutionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Pending => write!(f, "pending"),
			Self::Running => write!(f, "running"),
			Self::Completed => write!(f, "completed"),
			Self::Failed => write!(f, "failed"),
			Self::Retrying => write!(f, "retrying"),
			Self::Cancelled => write!(f, "cancelled"),
			Self::Timeout => write!(f, "timeout"),
		}
	}
}

impl FromStr for ExecutionStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"pending" => Ok(Self::Pending),
			"running" => Ok(Self::Running),
			"completed" => Ok(Self::Completed),
			"failed" => Ok(Self::Failed),
			"retrying" => Ok(Self::Retrying),
			"cancelled" => Ok(Self::Cancelled),
			"timeout" => Ok(Self::Timeout),
			_ => Err(format!("unknown execution status: {}", s)),
		}
	}
}

/// One execution of a job at a scheduled fire time. Multiple HTTP attempts
/// compose a single execution; `attempt` is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
	pub id: ExecutionId,
	pub job_id: JobId,
	pub tenant_id: TenantId,
	pub status: ExecutionStatus,

	pub scheduled_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	pub duration_ms: Option<i64>,

	pub attempt: i32,
	/// Identity of the worker that picked the execution up.
	pub worker_id: Option<String>,

	pub status_code: Option<i32>,
	/// Response body, truncated to 1 MiB by the executor.
	pub response: Option<String>,
	pub error: Option<String>,

	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl JobExecution {
	/// A fresh pending execution for a fire at `scheduled_at`.
	pub fn pending(job_id: JobId, tenant_id: TenantId, scheduled_at: DateTime<Utc>) -> Self {
		Self {
			id: ExecutionId::new(),
			job_id,
			tenant_id,
			status: ExecutionStatus::Pending,
			scheduled_at,
			started_at: None,
			completed_at: None,
			duration_ms: None,
			attempt: 1,
			worker_id: None,
			status_code: None,
			response: None,
			error: None,
			created_at: scheduled_at,
			updated_at: scheduled_at,
		}
	}
}

/// Query filters for execution listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
	pub job_id: Option<JobId>,
	pub tenant_id: Option<TenantId>,
	pub status: Option<ExecutionStatus>,
	pub start_time: Option<DateTime<Utc>>,
	pub end_time: Option<DateTime<Utc>>,
	pub page: Option<u32>,
	pub page_size: Option<u32>,
}

impl ExecutionFilter {
	pub fn pagination(&self) -> (u32, u32) {
		normalise_pagination(self.page, self.page_size)
	}
}

/// One page of execution results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPage {
	pub executions: Vec<JobExecution>,
	pub total_count: i64,
	pub page: u32,
	pub page_size: u32,
	pub has_more: bool,
}

/// Execution counts by status over a time window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
	pub total: i64,
	pub completed: i64,
	pub failed: i64,
	pub cancelled: i64,
	pub timeout: i64,
}
