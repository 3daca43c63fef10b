// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory store implementations.
//!
//! Behavioural stand-ins for the Postgres stores: same guarded transitions,
//! same ordering, same atomic counter semantics, held in process-local maps.
//! Engine tests run against these; they are also usable for single-process
//! smoke setups where no database is available.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use chime_core::{
	AggregatedHistoryStats, ExecutionFilter, ExecutionId, ExecutionPage, ExecutionStats,
	ExecutionStatus, HistoryId, Job, JobExecution, JobFilter, JobHistory, JobId, JobPage,
	JobStats, JobStatus, TenantId,
};

use crate::error::Result;
use crate::executions::ExecutionStore;
use crate::history::HistoryStore;
use crate::jobs::JobStore;

/// In-memory [`JobStore`].
#[derive(Default)]
pub struct MemoryJobStore {
	jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl JobStore for MemoryJobStore {
	async fn create(&self, job: &Job) -> Result<()> {
		self.jobs.lock().unwrap().insert(job.id, job.clone());
		Ok(())
	}

	async fn update(&self, job: &Job) -> Result<()> {
		self.jobs.lock().unwrap().insert(job.id, job.clone());
		Ok(())
	}

	async fn find_by_id(&self, id: JobId) -> Result<Option<Job>> {
		Ok(self.jobs.lock().unwrap().get(&id).cloned())
	}

	async fn find_by_tenant_and_id(&self, tenant_id: TenantId, id: JobId) -> Result<Option<Job>> {
		Ok(self
			.jobs
			.lock()
			.unwrap()
			.get(&id)
			.filter(|j| j.tenant_id == tenant_id)
			.cloned())
	}

	async fn query(&self, filter: &JobFilter) -> Result<JobPage> {
		let (page, page_size) = filter.pagination();
		let jobs = self.jobs.lock().unwrap();

		let mut matches: Vec<Job> = jobs
			.values()
			.filter(|j| filter.tenant_id.is_none_or(|t| j.tenant_id == t))
			.filter(|j| match filter.status {
				Some(status) => j.status == status,
				None => j.status != JobStatus::Deleted,
			})
			.filter(|j| filter.job_type.is_none_or(|t| j.job_type == t))
			.filter(|j| {
				filter
					.name
					.as_ref()
					.is_none_or(|n| j.name.to_lowercase().contains(&n.to_lowercase()))
			})
			.cloned()
			.collect();
		matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));

		let total_count = matches.len() as i64;
		let offset = ((page - 1) * page_size) as usize;
		let page_jobs: Vec<Job> = matches
			.into_iter()
			.skip(offset)
			.take(page_size as usize)
			.collect();

		Ok(JobPage {
			jobs: page_jobs,
			total_count,
			page,
			page_size,
			has_more: (page as i64) * (page_size as i64) < total_count,
		})
	}

	async fn find_due_for_execution(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Job>> {
		let jobs = self.jobs.lock().unwrap();
		let mut due: Vec<Job> = jobs
			.values()
			.filter(|j| j.status == JobStatus::Active)
			.filter(|j| j.next_run_at.is_some_and(|n| n <= before))
			.cloned()
			.collect();
		due.sort_by(|a, b| {
			b.priority
				.cmp(&a.priority)
				.then(a.next_run_at.cmp(&b.next_run_at))
		});
		due.truncate(limit as usize);
		Ok(due)
	}

	async fn update_next_run_at(&self, id: JobId, next_run_at: DateTime<Utc>) -> Result<()> {
		if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
			job.next_run_at = Some(next_run_at);
			job.updated_at = Utc::now();
		}
		Ok(())
	}

	async fn clear_next_run_at(&self, id: JobId) -> Result<()> {
		if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
			job.next_run_at = None;
			job.updated_at = Utc::now();
		}
		Ok(())
	}

	async fn update_last_run_at(&self, id: JobId, success: bool) -> Result<()> {
		if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
			job.last_run_at = Some(Utc::now());
			if success {
				job.run_count += 1;
			} else {
				job.fail_count += 1;
			}
			job.updated_at = Utc::now();
		}
		Ok(())
	}

	async fn update_status(&self, id: JobId, status: JobStatus) -> Result<()> {
		if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
			job.status = status;
			job.updated_at = Utc::now();
		}
		Ok(())
	}

	async fn soft_delete(&self, id: JobId) -> Result<()> {
		self.update_status(id, JobStatus::Deleted).await
	}

	async fn get_stats(&self, tenant_id: Option<TenantId>) -> Result<JobStats> {
		let jobs = self.jobs.lock().unwrap();
		let mut stats = JobStats::default();
		for job in jobs
			.values()
			.filter(|j| tenant_id.is_none_or(|t| j.tenant_id == t))
		{
			*stats
				.jobs_by_status
				.entry(job.status.to_string())
				.or_default() += 1;
			match job.status {
				JobStatus::Deleted => continue,
				JobStatus::Active => stats.active_jobs += 1,
				JobStatus::Paused => stats.paused_jobs += 1,
				JobStatus::Disabled => {}
			}
			stats.total_jobs += 1;
			*stats
				.jobs_by_type
				.entry(job.job_type.to_string())
				.or_default() += 1;
		}
		Ok(stats)
	}
}

/// In-memory [`ExecutionStore`].
#[derive(Default)]
pub struct MemoryExecutionStore {
	executions: Mutex<HashMap<ExecutionId, JobExecution>>,
}

impl MemoryExecutionStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn transition<F>(&self, id: ExecutionId, from: &[ExecutionStatus], apply: F) -> bool
	where
		F: FnOnce(&mut JobExecution),
	{
		let mut executions = self.executions.lock().unwrap();
		match executions.get_mut(&id) {
			Some(execution) if from.contains(&execution.status) => {
				apply(execution);
				execution.updated_at = Utc::now();
				true
			}
			_ => false,
		}
	}
}

fn elapsed_ms(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
	started_at
		.map(|s| (now - s).num_milliseconds().max(0))
		.unwrap_or(0)
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
	async fn create(&self, execution: &JobExecution) -> Result<()> {
		self.executions
			.lock()
			.unwrap()
			.insert(execution.id, execution.clone());
		Ok(())
	}

	async fn find_by_id(&self, id: ExecutionId) -> Result<Option<JobExecution>> {
		Ok(self.executions.lock().unwrap().get(&id).cloned())
	}

	async fn find_by_tenant_and_id(
		&self,
		tenant_id: TenantId,
		id: ExecutionId,
	) -> Result<Option<JobExecution>> {
		Ok(self
			.executions
			.lock()
			.unwrap()
			.get(&id)
			.filter(|e| e.tenant_id == tenant_id)
			.cloned())
	}

	async fn query(&self, filter: &ExecutionFilter) -> Result<ExecutionPage> {
		let (page, page_size) = filter.pagination();
		let executions = self.executions.lock().unwrap();

		let mut matches: Vec<JobExecution> = executions
			.values()
			.filter(|e| filter.job_id.is_none_or(|j| e.job_id == j))
			.filter(|e| filter.tenant_id.is_none_or(|t| e.tenant_id == t))
			.filter(|e| filter.status.is_none_or(|s| e.status == s))
			.filter(|e| filter.start_time.is_none_or(|t| e.scheduled_at >= t))
			.filter(|e| filter.end_time.is_none_or(|t| e.scheduled_at <= t))
			.cloned()
			.collect();
		matches.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));

		let total_count = matches.len() as i64;
		let offset = ((page - 1) * page_size) as usize;
		let page_executions: Vec<JobExecution> = matches
			.into_iter()
			.skip(offset)
			.take(page_size as usize)
			.collect();

		Ok(ExecutionPage {
			executions: page_executions,
			total_count,
			page,
			page_size,
			has_more: (page as i64) * (page_size as i64) < total_count,
		})
	}

	async fn find_by_job_id(&self, job_id: JobId, limit: i64) -> Result<Vec<JobExecution>> {
		let executions = self.executions.lock().unwrap();
		let mut matches: Vec<JobExecution> = executions
			.values()
			.filter(|e| e.job_id == job_id)
			.cloned()
			.collect();
		matches.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
		matches.truncate(limit as usize);
		Ok(matches)
	}

	async fn find_pending(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<JobExecution>> {
		let executions = self.executions.lock().unwrap();
		let mut matches: Vec<JobExecution> = executions
			.values()
			.filter(|e| e.status == ExecutionStatus::Pending && e.scheduled_at <= before)
			.cloned()
			.collect();
		matches.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
		matches.truncate(limit as usize);
		Ok(matches)
	}

	async fn mark_as_running(&self, id: ExecutionId, worker_id: &str) -> Result<bool> {
		let worker_id = worker_id.to_string();
		Ok(self.transition(id, &[ExecutionStatus::Pending], |e| {
			e.status = ExecutionStatus::Running;
			e.started_at = Some(Utc::now());
			e.worker_id = Some(worker_id);
		}))
	}

	async fn mark_as_completed(
		&self,
		id: ExecutionId,
		status_code: i32,
		body: &str,
	) -> Result<bool> {
		let body = body.to_string();
		Ok(self.transition(id, &[ExecutionStatus::Running], |e| {
			let now = Utc::now();
			e.status = ExecutionStatus::Completed;
			e.completed_at = Some(now);
			e.duration_ms = Some(elapsed_ms(e.started_at, now));
			e.status_code = Some(status_code);
			e.response = Some(body);
		}))
	}

	async fn mark_as_failed(
		&self,
		id: ExecutionId,
		error: &str,
		status_code: Option<i32>,
	) -> Result<bool> {
		let error = error.to_string();
		Ok(self.transition(id, &[ExecutionStatus::Running], |e| {
			let now = Utc::now();
			e.status = ExecutionStatus::Failed;
			e.completed_at = Some(now);
			e.duration_ms = Some(elapsed_ms(e.started_at, now));
			e.error = Some(error);
			if status_code.is_some() {
				e.status_code = status_code;
			}
		}))
	}

	async fn mark_as_timed_out(&self, id: ExecutionId, error: &str) -> Result<bool> {
		let error = error.to_string();
		Ok(self.transition(id, &[ExecutionStatus::Running], |e| {
			let now = Utc::now();
			e.status = ExecutionStatus::Timeout;
			e.completed_at = Some(now);
			e.duration_ms = Some(elapsed_ms(e.started_at, now));
			e.error = Some(error);
		}))
	}

	async fn mark_as_retrying(&self, id: ExecutionId, error: &str) -> Result<bool> {
		let error = error.to_string();
		Ok(self.transition(id, &[ExecutionStatus::Running], |e| {
			e.status = ExecutionStatus::Retrying;
			e.error = Some(error);
			e.attempt += 1;
		}))
	}

	async fn requeue_for_retry(&self, id: ExecutionId) -> Result<bool> {
		Ok(self.transition(id, &[ExecutionStatus::Retrying], |e| {
			e.status = ExecutionStatus::Pending;
		}))
	}

	async fn cancel(&self, id: ExecutionId) -> Result<bool> {
		Ok(self.transition(
			id,
			&[ExecutionStatus::Pending, ExecutionStatus::Running],
			|e| {
				e.status = ExecutionStatus::Cancelled;
				e.completed_at = Some(Utc::now());
			},
		))
	}

	async fn get_stats(
		&self,
		tenant_id: Option<TenantId>,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
	) -> Result<ExecutionStats> {
		let executions = self.executions.lock().unwrap();
		let mut stats = ExecutionStats::default();
		for execution in executions
			.values()
			.filter(|e| tenant_id.is_none_or(|t| e.tenant_id == t))
			.filter(|e| e.scheduled_at >= start && e.scheduled_at <= end)
		{
			stats.total += 1;
			match execution.status {
				ExecutionStatus::Completed => stats.completed += 1,
				ExecutionStatus::Failed => stats.failed += 1,
				ExecutionStatus::Cancelled => stats.cancelled += 1,
				ExecutionStatus::Timeout => stats.timeout += 1,
				_ => {}
			}
		}
		Ok(stats)
	}

	async fn cleanup_old(&self, before: DateTime<Utc>) -> Result<u64> {
		let mut executions = self.executions.lock().unwrap();
		let doomed: Vec<ExecutionId> = executions
			.values()
			.filter(|e| e.status.is_terminal() && e.created_at < before)
			.map(|e| e.id)
			.collect();
		for id in &doomed {
			executions.remove(id);
		}
		Ok(doomed.len() as u64)
	}
}

/// In-memory [`HistoryStore`].
#[derive(Default)]
pub struct MemoryHistoryStore {
	rows: Mutex<HashMap<(JobId, NaiveDate), JobHistory>>,
}

impl MemoryHistoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
	async fn increment_success(
		&self,
		job_id: JobId,
		tenant_id: TenantId,
		date: NaiveDate,
		duration_ms: i64,
	) -> Result<()> {
		let mut rows = self.rows.lock().unwrap();
		let now = Utc::now();
		let row = rows.entry((job_id, date)).or_insert_with(|| JobHistory {
			id: HistoryId::new(),
			job_id,
			tenant_id,
			date,
			success_count: 0,
			failure_count: 0,
			total_duration_ms: 0,
			avg_duration_ms: 0,
			min_duration_ms: 0,
			max_duration_ms: 0,
			created_at: now,
			updated_at: now,
		});

		if row.success_count == 0 {
			row.min_duration_ms = duration_ms;
		} else {
			row.min_duration_ms = row.min_duration_ms.min(duration_ms);
		}
		row.max_duration_ms = row.max_duration_ms.max(duration_ms);
		row.success_count += 1;
		row.total_duration_ms += duration_ms;
		row.avg_duration_ms = row.total_duration_ms / row.success_count;
		row.updated_at = now;
		Ok(())
	}

	async fn increment_failure(
		&self,
		job_id: JobId,
		tenant_id: TenantId,
		date: NaiveDate,
	) -> Result<()> {
		let mut rows = self.rows.lock().unwrap();
		let now = Utc::now();
		let row = rows.entry((job_id, date)).or_insert_with(|| JobHistory {
			id: HistoryId::new(),
			job_id,
			tenant_id,
			date,
			success_count: 0,
			failure_count: 0,
			total_duration_ms: 0,
			avg_duration_ms: 0,
			min_duration_ms: 0,
			max_duration_ms: 0,
			created_at: now,
			updated_at: now,
		});
		row.failure_count += 1;
		row.updated_at = now;
		Ok(())
	}

	async fn find_by_job_id(&self, job_id: JobId, days: i64) -> Result<Vec<JobHistory>> {
		let since = (Utc::now() - Duration::days(days)).date_naive();
		let rows = self.rows.lock().unwrap();
		let mut matches: Vec<JobHistory> = rows
			.values()
			.filter(|h| h.job_id == job_id && h.date >= since)
			.cloned()
			.collect();
		matches.sort_by(|a, b| b.date.cmp(&a.date));
		Ok(matches)
	}

	async fn find_by_date_range(
		&self,
		start: NaiveDate,
		end: NaiveDate,
	) -> Result<Vec<JobHistory>> {
		let rows = self.rows.lock().unwrap();
		let mut matches: Vec<JobHistory> = rows
			.values()
			.filter(|h| h.date >= start && h.date <= end)
			.cloned()
			.collect();
		matches.sort_by(|a, b| b.date.cmp(&a.date).then(a.job_id.0.cmp(&b.job_id.0)));
		Ok(matches)
	}

	async fn get_aggregated_stats(
		&self,
		job_id: Option<JobId>,
		start: NaiveDate,
		end: NaiveDate,
	) -> Result<AggregatedHistoryStats> {
		let rows = self.rows.lock().unwrap();
		let mut stats = AggregatedHistoryStats::default();
		let mut min_seen: Option<i64> = None;
		for row in rows
			.values()
			.filter(|h| job_id.is_none_or(|j| h.job_id == j))
			.filter(|h| h.date >= start && h.date <= end)
		{
			stats.total_success += row.success_count;
			stats.total_failure += row.failure_count;
			stats.total_duration_ms += row.total_duration_ms;
			if row.success_count > 0 {
				min_seen = Some(match min_seen {
					Some(m) => m.min(row.min_duration_ms),
					None => row.min_duration_ms,
				});
			}
			stats.max_duration_ms = stats.max_duration_ms.max(row.max_duration_ms);
		}
		stats.min_duration_ms = min_seen.unwrap_or(0);
		Ok(stats.finalise())
	}

	async fn cleanup_old(&self, before: NaiveDate) -> Result<u64> {
		let mut rows = self.rows.lock().unwrap();
		let doomed: Vec<(JobId, NaiveDate)> = rows
			.keys()
			.filter(|(_, date)| *date < before)
			.copied()
			.collect();
		for key in &doomed {
			rows.remove(key);
		}
		Ok(doomed.len() as u64)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn execution(status: ExecutionStatus) -> JobExecution {
		let mut e = JobExecution::pending(JobId::new(), TenantId::nil(), Utc::now());
		e.status = status;
		e
	}

	#[tokio::test]
	async fn mark_as_running_is_exclusive() {
		let store = MemoryExecutionStore::new();
		let e = execution(ExecutionStatus::Pending);
		store.create(&e).await.unwrap();

		assert!(store.mark_as_running(e.id, "worker-a").await.unwrap());
		// Second claim loses: the row is no longer pending.
		assert!(!store.mark_as_running(e.id, "worker-b").await.unwrap());

		let stored = store.find_by_id(e.id).await.unwrap().unwrap();
		assert_eq!(stored.worker_id.as_deref(), Some("worker-a"));
	}

	#[tokio::test]
	async fn cancel_only_from_pending_or_running() {
		let store = MemoryExecutionStore::new();
		let pending = execution(ExecutionStatus::Pending);
		let done = execution(ExecutionStatus::Completed);
		store.create(&pending).await.unwrap();
		store.create(&done).await.unwrap();

		assert!(store.cancel(pending.id).await.unwrap());
		assert!(!store.cancel(done.id).await.unwrap());
		// Terminal states never transition.
		assert!(!store.cancel(pending.id).await.unwrap());
	}

	#[tokio::test]
	async fn retrying_increments_attempt_and_requeues() {
		let store = MemoryExecutionStore::new();
		let e = execution(ExecutionStatus::Pending);
		store.create(&e).await.unwrap();

		assert!(store.mark_as_running(e.id, "worker-a").await.unwrap());
		assert!(store.mark_as_retrying(e.id, "HTTP 503").await.unwrap());

		let stored = store.find_by_id(e.id).await.unwrap().unwrap();
		assert_eq!(stored.status, ExecutionStatus::Retrying);
		assert_eq!(stored.attempt, 2);

		assert!(store.requeue_for_retry(e.id).await.unwrap());
		let stored = store.find_by_id(e.id).await.unwrap().unwrap();
		assert_eq!(stored.status, ExecutionStatus::Pending);
	}

	#[tokio::test]
	async fn history_success_tracks_duration_stats() {
		let store = MemoryHistoryStore::new();
		let job_id = JobId::new();
		let date = Utc::now().date_naive();

		store
			.increment_success(job_id, TenantId::nil(), date, 100)
			.await
			.unwrap();
		store
			.increment_success(job_id, TenantId::nil(), date, 300)
			.await
			.unwrap();
		store
			.increment_failure(job_id, TenantId::nil(), date)
			.await
			.unwrap();

		let rows = store.find_by_job_id(job_id, 1).await.unwrap();
		assert_eq!(rows.len(), 1);
		let row = &rows[0];
		assert_eq!(row.success_count, 2);
		assert_eq!(row.failure_count, 1);
		assert_eq!(row.total_duration_ms, 400);
		assert_eq!(row.avg_duration_ms, 200);
		assert_eq!(row.min_duration_ms, 100);
		assert_eq!(row.max_duration_ms, 300);
	}

	#[tokio::test]
	async fn failure_first_does_not_pin_min_duration() {
		let store = MemoryHistoryStore::new();
		let job_id = JobId::new();
		let date = Utc::now().date_naive();

		store
			.increment_failure(job_id, TenantId::nil(), date)
			.await
			.unwrap();
		store
			.increment_success(job_id, TenantId::nil(), date, 250)
			.await
			.unwrap();

		let rows = store.find_by_job_id(job_id, 1).await.unwrap();
		assert_eq!(rows[0].min_duration_ms, 250);
		assert_eq!(rows[0].avg_duration_ms, 250);
	}

	#[tokio::test]
	async fn cleanup_only_removes_old_terminal_executions() {
		let store = MemoryExecutionStore::new();
		let cutoff = Utc::now() - Duration::days(30);

		let mut old_done = execution(ExecutionStatus::Completed);
		old_done.created_at = cutoff - Duration::days(1);
		let mut old_pending = execution(ExecutionStatus::Pending);
		old_pending.created_at = cutoff - Duration::days(1);
		let fresh_done = execution(ExecutionStatus::Failed);

		for e in [&old_done, &old_pending, &fresh_done] {
			store.create(e).await.unwrap();
		}

		let removed = store.cleanup_old(cutoff).await.unwrap();
		assert_eq!(removed, 1);
		assert!(store.find_by_id(old_done.id).await.unwrap().is_none());
		// Non-terminal rows survive no matter how old they are.
		assert!(store.find_by_id(old_pending.id).await.unwrap().is_some());
		assert!(store.find_by_id(fresh_done.id).await.unwrap().is_some());
	}

	#[tokio::test]
	async fn history_cleanup_cuts_by_date() {
		let store = MemoryHistoryStore::new();
		let job_id = JobId::new();
		let today = Utc::now().date_naive();
		let stale = today - Duration::days(45);

		store
			.increment_success(job_id, TenantId::nil(), today, 10)
			.await
			.unwrap();
		store
			.increment_success(job_id, TenantId::nil(), stale, 10)
			.await
			.unwrap();

		let removed = store.cleanup_old(today - Duration::days(30)).await.unwrap();
		assert_eq!(removed, 1);
		let rows = store.find_by_job_id(job_id, 365).await.unwrap();
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].date, today);
	}

	#[tokio::test]
	async fn due_jobs_order_by_priority_then_fire_time() {
		let store = MemoryJobStore::new();
		let now = Utc::now();

		let mk = |name: &str, priority: i32, due_secs_ago: i64| {
			let req = chime_core::CreateJobRequest {
				name: name.to_string(),
				description: None,
				job_type: chime_core::JobType::Interval,
				schedule: "60".to_string(),
				timezone: None,
				endpoint: "http://localhost/hook".to_string(),
				method: None,
				headers: None,
				payload: None,
				timeout: None,
				max_retries: None,
				retry_delay: None,
				priority: Some(priority),
				tags: None,
				metadata: None,
			};
			let mut job = req.into_job(TenantId::nil(), now);
			job.next_run_at = Some(now - Duration::seconds(due_secs_ago));
			job
		};

		let low_old = mk("low-old", 2, 60);
		let high_new = mk("high-new", 9, 5);
		let high_old = mk("high-old", 9, 30);
		for job in [&low_old, &high_new, &high_old] {
			store.create(job).await.unwrap();
		}

		let due = store.find_due_for_execution(now, 10).await.unwrap();
		let names: Vec<&str> = due.iter().map(|j| j.name.as_str()).collect();
		assert_eq!(names, vec!["high-old", "high-new", "low-old"]);
	}
}
