// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Daily per-job execution aggregates.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::job::{JobId, TenantId};

/// Unique identifier for a history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryId(pub Uuid);

impl HistoryId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for HistoryId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for HistoryId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for HistoryId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Daily aggregate of execution outcomes, one row per `(job_id, date)`.
///
/// Duration statistics cover successful executions only, so
/// `avg = total / success_count` whenever `success_count > 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHistory {
	pub id: HistoryId,
	pub job_id: JobId,
	pub tenant_id: TenantId,
	pub date: NaiveDate,

	pub success_count: i64,
	pub failure_count: i64,

	pub total_duration_ms: i64,
	pub avg_duration_ms: i64,
	pub min_duration_ms: i64,
	pub max_duration_ms: i64,

	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Aggregated history statistics over a date range.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedHistoryStats {
	pub total_success: i64,
	pub total_failure: i64,
	pub total_duration_ms: i64,
	pub avg_duration_ms: f64,
	pub min_duration_ms: i64,
	pub max_duration_ms: i64,
	/// Percentage of successful executions over the range, 0-100.
	pub success_rate: f64,
}

impl AggregatedHistoryStats {
	/// Derive the average and success rate from the raw sums.
	pub fn finalise(mut self) -> Self {
		if self.total_success > 0 {
			self.avg_duration_ms = self.total_duration_ms as f64 / self.total_success as f64;
		}
		let total = self.total_success + self.total_failure;
		if total > 0 {
			self.success_rate = self.total_success as f64 / total as f64 * 100.0;
		}
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn finalise_computes_rates() {
		let stats = AggregatedHistoryStats {
			total_success: 3,
			total_failure: 1,
			total_duration_ms: 300,
			..Default::default()
		}
		.finalise();
		assert_eq!(stats.avg_duration_ms, 100.0);
		assert_eq!(stats.success_rate, 75.0);
	}

	#[test]
	fn finalise_handles_empty_range() {
		let stats = AggregatedHistoryStats::default().finalise();
		assert_eq!(stats.avg_duration_ms, 0.0);
		assert_eq!(stats.success_rate, 0.0);
	}
}
