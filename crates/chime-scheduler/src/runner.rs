// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-execution state machine.
//!
//! A worker drives one task through
//! `pending -> running -> {completed, failed, retrying, cancelled, timeout}`.
//! Every transition out of `running` is a guarded update, so a concurrent
//! cancel silently wins and the worker never overwrites a terminal state.
//! Retries are delayed in-process re-submissions: the retry is lost if the
//! process dies during the delay, which is the accepted at-most-once
//! contract.

use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};

use chime_core::Job;
use chime_db::{ExecutionStore, HistoryStore, JobStore};

use crate::error::Result;
use crate::executor::{HttpExecutor, Outcome, OutcomeKind};
use crate::pool::{panic_message, JobTask, TaskSubmitter};

/// Drives execution tasks to a terminal state.
pub struct ExecutionRunner {
	jobs: Arc<dyn JobStore>,
	executions: Arc<dyn ExecutionStore>,
	history: Arc<dyn HistoryStore>,
	executor: Arc<HttpExecutor>,
	submitter: TaskSubmitter,
	worker_id: String,
}

impl ExecutionRunner {
	pub fn new(
		jobs: Arc<dyn JobStore>,
		executions: Arc<dyn ExecutionStore>,
		history: Arc<dyn HistoryStore>,
		executor: Arc<HttpExecutor>,
		submitter: TaskSubmitter,
		worker_id: String,
	) -> Self {
		Self {
			jobs,
			executions,
			history,
			executor,
			submitter,
			worker_id,
		}
	}

	/// Process one task. Panics inside the state machine are recovered and
	/// recorded as execution failures so a bug in one job cannot poison the
	/// pool.
	pub async fn process(self: Arc<Self>, task: JobTask) {
		let execution_id = task.execution.id;
		let job_id = task.job.id;
		let tenant_id = task.job.tenant_id;

		let run = std::panic::AssertUnwindSafe(Arc::clone(&self).run(task)).catch_unwind();
		match run.await {
			Ok(Ok(())) => {}
			Ok(Err(e)) => {
				error!(execution_id = %execution_id, error = %e, "execution processing failed");
			}
			Err(panic) => {
				let message = format!("panic: {}", panic_message(&panic));
				error!(execution_id = %execution_id, %message, "execution panicked");
				match self.executions.mark_as_failed(execution_id, &message, None).await {
					Ok(true) => {
						let _ = self.jobs.update_last_run_at(job_id, false).await;
						let _ = self
							.history
							.increment_failure(job_id, tenant_id, Utc::now().date_naive())
							.await;
					}
					// Not claimed yet (or already terminal): nothing to record.
					Ok(false) => {}
					Err(e) => {
						error!(execution_id = %execution_id, error = %e, "failed to record panic")
					}
				}
			}
		}
	}

	#[instrument(skip(self, task), fields(execution_id = %task.execution.id, job_id = %task.job.id, attempt = task.execution.attempt))]
	async fn run(self: Arc<Self>, task: JobTask) -> Result<()> {
		let JobTask { job, execution } = task;

		// Linearisation point: at most one worker wins the pending row.
		if !self
			.executions
			.mark_as_running(execution.id, &self.worker_id)
			.await?
		{
			debug!(execution_id = %execution.id, "execution no longer pending, abandoning");
			return Ok(());
		}

		let outcome = self.executor.execute(&job).await;

		match outcome.kind {
			OutcomeKind::Success => self.complete(&job, execution.id, &outcome).await,
			OutcomeKind::Retryable | OutcomeKind::TimedOut
				if execution.attempt < job.max_retries =>
			{
				self.schedule_retry(job, execution, &outcome).await
			}
			OutcomeKind::TimedOut => self.time_out(&job, execution.id, &outcome).await,
			OutcomeKind::Retryable | OutcomeKind::Permanent => {
				self.fail(&job, execution.id, &outcome).await
			}
		}
	}

	async fn complete(&self, job: &Job, execution_id: chime_core::ExecutionId, outcome: &Outcome) -> Result<()> {
		if !self
			.executions
			.mark_as_completed(execution_id, outcome.status_code, &outcome.body)
			.await?
		{
			// A cancel got there first; do not account the outcome.
			return Ok(());
		}

		self.jobs.update_last_run_at(job.id, true).await?;
		self
			.history
			.increment_success(
				job.id,
				job.tenant_id,
				Utc::now().date_naive(),
				outcome.duration_ms,
			)
			.await?;

		info!(
			execution_id = %execution_id,
			job_id = %job.id,
			status_code = outcome.status_code,
			duration_ms = outcome.duration_ms,
			"execution completed"
		);
		Ok(())
	}

	async fn fail(&self, job: &Job, execution_id: chime_core::ExecutionId, outcome: &Outcome) -> Result<()> {
		let error = outcome.error.as_deref().unwrap_or("unknown error");
		let status_code = (outcome.status_code > 0).then_some(outcome.status_code);

		if !self
			.executions
			.mark_as_failed(execution_id, error, status_code)
			.await?
		{
			return Ok(());
		}

		self.record_failure(job, execution_id, error).await
	}

	async fn time_out(&self, job: &Job, execution_id: chime_core::ExecutionId, outcome: &Outcome) -> Result<()> {
		let error = outcome.error.as_deref().unwrap_or("deadline elapsed");

		if !self.executions.mark_as_timed_out(execution_id, error).await? {
			return Ok(());
		}

		self.record_failure(job, execution_id, error).await
	}

	async fn record_failure(
		&self,
		job: &Job,
		execution_id: chime_core::ExecutionId,
		error: &str,
	) -> Result<()> {
		self.jobs.update_last_run_at(job.id, false).await?;
		self
			.history
			.increment_failure(job.id, job.tenant_id, Utc::now().date_naive())
			.await?;

		warn!(
			execution_id = %execution_id,
			job_id = %job.id,
			error,
			"execution failed"
		);
		Ok(())
	}

	/// Persist the transient failure and re-submit the task after the job's
	/// retry delay. History counters are untouched here: retries are one
	/// logical execution and only the terminal transition contributes.
	async fn schedule_retry(
		self: Arc<Self>,
		job: Job,
		mut execution: chime_core::JobExecution,
		outcome: &Outcome,
	) -> Result<()> {
		let error = outcome.error.as_deref().unwrap_or("transient failure");

		if !self.executions.mark_as_retrying(execution.id, error).await? {
			return Ok(());
		}

		execution.attempt += 1;
		let delay = std::time::Duration::from_secs(job.retry_delay_secs.max(1) as u64);

		info!(
			execution_id = %execution.id,
			job_id = %job.id,
			attempt = execution.attempt,
			delay_secs = delay.as_secs(),
			error,
			"execution will retry"
		);

		let runner = Arc::clone(&self);
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;

			// Back to pending so the mark_as_running guard applies to the
			// new attempt. A cancel during the delay wins here.
			match runner.executions.requeue_for_retry(execution.id).await {
				Ok(true) => {
					let execution_id = execution.id;
					execution.status = chime_core::ExecutionStatus::Pending;
					if !runner.submitter.submit(JobTask { job, execution }) {
						warn!(
							execution_id = %execution_id,
							"retry submission rejected, pending sweep will recover it"
						);
					}
				}
				Ok(false) => {
					debug!(execution_id = %execution.id, "retry overtaken, not re-queueing")
				}
				Err(e) => {
					error!(execution_id = %execution.id, error = %e, "failed to re-queue retry")
				}
			}
		});

		Ok(())
	}
}
