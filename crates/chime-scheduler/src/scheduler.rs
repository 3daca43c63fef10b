// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The scheduler: leader-elected dispatch plus housekeeping loops.
//!
//! Every replica ticks once per second; only the replica holding
//! `scheduler:leader` performs the sweep, so each fire time materialises
//! into exactly one pending execution under healthy leadership. Losing the
//! lock mid-sweep can duplicate a fire across the boundary; that window is
//! part of the contract and callbacks are expected to be idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use chime_core::{next_run, JobExecution, JobId, JobStatus};
use chime_db::{ExecutionStore, HistoryStore, JobStore};

use crate::error::{Result, SchedulerError};
use crate::executor::HttpExecutor;
use crate::lock::{generate_worker_id, CoordinationStore, DistributedLock};
use crate::pool::{JobTask, WorkerPool};
use crate::runner::ExecutionRunner;

/// Key every replica competes for before sweeping.
pub const LEADER_LOCK_KEY: &str = "scheduler:leader";

const DISPATCH_INTERVAL: Duration = Duration::from_secs(1);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// At most this many due jobs are materialised per sweep.
const DISPATCH_BATCH_SIZE: i64 = 100;
/// Pending executions older than this are re-submitted (queue-overflow
/// recovery). The mark-as-running guard makes double submission harmless.
const PENDING_RESWEEP_GRACE_SECS: i64 = 5;

/// Engine tuning knobs, resolved from the environment by the server binary.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	pub worker_count: usize,
	pub lock_ttl: Duration,
	pub heartbeat_interval: Duration,
	pub cleanup_days: i64,
	/// Fallback HTTP client deadline; per-job timeouts override it.
	pub http_client_timeout: Duration,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			worker_count: 10,
			lock_ttl: Duration::from_secs(300),
			heartbeat_interval: Duration::from_secs(30),
			cleanup_days: 30,
			http_client_timeout: Duration::from_secs(30),
		}
	}
}

/// The scheduling engine for one replica.
pub struct Scheduler {
	config: SchedulerConfig,
	jobs: Arc<dyn JobStore>,
	executions: Arc<dyn ExecutionStore>,
	history: Arc<dyn HistoryStore>,
	lock: DistributedLock,
	pool: Arc<WorkerPool>,
	runner: Arc<ExecutionRunner>,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
	running: AtomicBool,
}

impl Scheduler {
	pub fn new(
		config: SchedulerConfig,
		jobs: Arc<dyn JobStore>,
		executions: Arc<dyn ExecutionStore>,
		history: Arc<dyn HistoryStore>,
		coordination: Arc<dyn CoordinationStore>,
	) -> Self {
		let worker_id = generate_worker_id();
		let lock = DistributedLock::new(coordination, worker_id.clone());
		let pool = Arc::new(WorkerPool::new(config.worker_count));
		let executor = Arc::new(HttpExecutor::new(config.http_client_timeout));
		let runner = Arc::new(ExecutionRunner::new(
			Arc::clone(&jobs),
			Arc::clone(&executions),
			Arc::clone(&history),
			executor,
			pool.submitter(),
			worker_id,
		));
		let (shutdown_tx, _) = broadcast::channel(1);

		Self {
			config,
			jobs,
			executions,
			history,
			lock,
			pool,
			runner,
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
			running: AtomicBool::new(false),
		}
	}

	/// Start the worker pool and the dispatch/heartbeat/cleanup loops.
	/// Idempotent.
	#[instrument(skip(self), fields(worker_id = %self.lock.worker_id()))]
	pub async fn start(self: Arc<Self>) {
		if self.running.swap(true, Ordering::SeqCst) {
			return;
		}

		let runner = Arc::clone(&self.runner);
		self
			.pool
			.start(move |task| Arc::clone(&runner).process(task))
			.await;

		let mut handles = self.handles.lock().await;
		handles.push(Self::spawn_loop(
			Arc::clone(&self),
			DISPATCH_INTERVAL,
			|scheduler| async move {
				scheduler.dispatch_once().await;
			},
		));
		handles.push(Self::spawn_loop(
			Arc::clone(&self),
			self.config.heartbeat_interval,
			|scheduler| async move {
				scheduler.heartbeat().await;
			},
		));
		handles.push(Self::spawn_loop(
			Arc::clone(&self),
			CLEANUP_INTERVAL,
			|scheduler| async move {
				scheduler.cleanup().await;
			},
		));

		info!(
			worker_count = self.pool.worker_count(),
			lock_ttl_secs = self.config.lock_ttl.as_secs(),
			"scheduler started"
		);
	}

	fn spawn_loop<F, Fut>(scheduler: Arc<Scheduler>, period: Duration, body: F) -> JoinHandle<()>
	where
		F: Fn(Arc<Scheduler>) -> Fut + Send + 'static,
		Fut: std::future::Future<Output = ()> + Send + 'static,
	{
		let mut shutdown_rx = scheduler.shutdown_tx.subscribe();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			// The first interval tick fires immediately; skip it so loops
			// run on their period from startup.
			ticker.tick().await;
			loop {
				tokio::select! {
					_ = ticker.tick() => body(Arc::clone(&scheduler)).await,
					_ = shutdown_rx.recv() => break,
				}
			}
		})
	}

	/// Stop the loops, drain the worker pool, and return. Idempotent.
	#[instrument(skip(self))]
	pub async fn stop(&self) {
		if !self.running.swap(false, Ordering::SeqCst) {
			return;
		}

		let _ = self.shutdown_tx.send(());
		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}
		self.pool.stop().await;

		info!("scheduler stopped");
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}

	pub fn queue_size(&self) -> usize {
		self.pool.queue_size()
	}

	pub fn worker_count(&self) -> usize {
		self.pool.worker_count()
	}

	pub fn worker_id(&self) -> &str {
		self.lock.worker_id()
	}

	/// One dispatch sweep: take the leader lock, materialise due jobs,
	/// re-submit orphaned pending executions, release the lock. Replicas
	/// that fail to take the lock skip the tick; a coordination outage is
	/// a skipped tick, not an error.
	pub async fn dispatch_once(&self) {
		match self.lock.acquire(LEADER_LOCK_KEY, self.config.lock_ttl).await {
			Ok(true) => {}
			Ok(false) => return,
			Err(e) => {
				debug!(error = %e, "coordination store unavailable, skipping tick");
				return;
			}
		}

		let now = Utc::now();
		self.sweep_due_jobs(now).await;
		self.resweep_pending(now).await;

		if let Err(e) = self.lock.release(LEADER_LOCK_KEY).await {
			warn!(error = %e, "failed to release leader lock");
		}
	}

	async fn sweep_due_jobs(&self, now: chrono::DateTime<Utc>) {
		let due = match self.jobs.find_due_for_execution(now, DISPATCH_BATCH_SIZE).await {
			Ok(jobs) => jobs,
			Err(e) => {
				error!(error = %e, "failed to query due jobs");
				return;
			}
		};

		for job in due {
			let execution = JobExecution::pending(job.id, job.tenant_id, now);
			if let Err(e) = self.executions.create(&execution).await {
				// The job's next_run_at is untouched, so the next tick
				// picks it up again.
				warn!(job_id = %job.id, error = %e, "failed to create execution, skipping");
				continue;
			}

			self.advance_next_run(&job, now).await;

			if !self.pool.submit(JobTask { job, execution }) {
				warn!("worker queue full, execution stays pending for re-sweep");
			}
		}
	}

	async fn advance_next_run(&self, job: &chime_core::Job, now: chrono::DateTime<Utc>) {
		match next_run(job.job_type, &job.schedule, &job.timezone, now) {
			Ok(Some(next)) => {
				if let Err(e) = self.jobs.update_next_run_at(job.id, next).await {
					error!(job_id = %job.id, error = %e, "failed to advance next_run_at");
				}
			}
			Ok(None) => {
				// One-time jobs fire once; clearing keeps them out of the sweep.
				if let Err(e) = self.jobs.clear_next_run_at(job.id).await {
					error!(job_id = %job.id, error = %e, "failed to clear next_run_at");
				}
			}
			Err(e) => {
				// The schedule no longer parses (validated at create, so
				// this is data corruption). Clear rather than redispatch
				// every second forever.
				error!(job_id = %job.id, error = %e, "schedule no longer parses, clearing next_run_at");
				let _ = self.jobs.clear_next_run_at(job.id).await;
			}
		}
	}

	async fn resweep_pending(&self, now: chrono::DateTime<Utc>) {
		let cutoff = now - chrono::Duration::seconds(PENDING_RESWEEP_GRACE_SECS);
		let pending = match self.executions.find_pending(cutoff, DISPATCH_BATCH_SIZE).await {
			Ok(pending) => pending,
			Err(e) => {
				error!(error = %e, "failed to query orphaned pending executions");
				return;
			}
		};

		for execution in pending {
			let job = match self.jobs.find_by_id(execution.job_id).await {
				Ok(Some(job)) => job,
				Ok(None) => continue,
				Err(e) => {
					error!(job_id = %execution.job_id, error = %e, "failed to load job for pending execution");
					continue;
				}
			};
			debug!(execution_id = %execution.id, job_id = %job.id, "re-submitting orphaned pending execution");
			self.pool.submit(JobTask { job, execution });
		}
	}

	async fn heartbeat(&self) {
		if let Err(e) = self.lock.refresh(LEADER_LOCK_KEY, self.config.lock_ttl).await {
			warn!(error = %e, "leader heartbeat failed");
		}
	}

	async fn cleanup(&self) {
		let cutoff = Utc::now() - chrono::Duration::days(self.config.cleanup_days);

		match self.executions.cleanup_old(cutoff).await {
			Ok(removed) if removed > 0 => info!(removed, "cleaned up old executions"),
			Ok(_) => {}
			Err(e) => error!(error = %e, "execution cleanup failed"),
		}

		match self.history.cleanup_old(cutoff.date_naive()).await {
			Ok(removed) if removed > 0 => info!(removed, "cleaned up old history"),
			Ok(_) => {}
			Err(e) => error!(error = %e, "history cleanup failed"),
		}
	}

	/// Manually fire a job now, regardless of its schedule. Allowed for
	/// active and paused jobs.
	#[instrument(skip(self), fields(job_id = %job_id))]
	pub async fn trigger(&self, job_id: JobId) -> Result<JobExecution> {
		let job = self
			.jobs
			.find_by_id(job_id)
			.await?
			.ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;

		if !matches!(job.status, JobStatus::Active | JobStatus::Paused) {
			return Err(SchedulerError::NotTriggerable(job.status.to_string()));
		}

		let execution = JobExecution::pending(job.id, job.tenant_id, Utc::now());
		self.executions.create(&execution).await?;

		if !self.pool.submit(JobTask {
			job,
			execution: execution.clone(),
		}) {
			warn!(execution_id = %execution.id, "worker queue full, trigger stays pending for re-sweep");
		}

		Ok(execution)
	}
}
