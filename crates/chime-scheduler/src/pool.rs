// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded worker pool draining execution tasks.
//!
//! A fixed set of workers shares one bounded queue (capacity 10x the worker
//! count). Submission is non-blocking: a full queue is backpressure, the
//! caller leaves the execution row pending and the next dispatch sweep
//! re-submits it. `stop` closes the queue and drains every accepted task
//! before returning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use chime_core::{Job, JobExecution};

/// Queue capacity is this many tasks per worker.
const QUEUE_DEPTH_PER_WORKER: usize = 10;

/// One unit of work: a job snapshot plus the execution row to drive.
#[derive(Debug, Clone)]
pub struct JobTask {
	pub job: Job,
	pub execution: JobExecution,
}

/// Cloneable handle for submitting tasks without owning the pool. The
/// retry re-submission path holds one of these.
#[derive(Clone)]
pub struct TaskSubmitter {
	queue_tx: mpsc::Sender<JobTask>,
	running: Arc<AtomicBool>,
}

impl TaskSubmitter {
	/// Non-blocking enqueue. False means the queue is full or the pool is
	/// stopped; the task is dropped and the execution row stays pending.
	pub fn submit(&self, task: JobTask) -> bool {
		if !self.running.load(Ordering::SeqCst) {
			return false;
		}
		self.queue_tx.try_send(task).is_ok()
	}
}

/// Fixed-size pool of workers over a bounded task queue.
pub struct WorkerPool {
	workers: usize,
	queue_tx: mpsc::Sender<JobTask>,
	queue_rx: Arc<Mutex<mpsc::Receiver<JobTask>>>,
	running: Arc<AtomicBool>,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
	/// `workers` is floored at 1.
	pub fn new(workers: usize) -> Self {
		let workers = workers.max(1);
		let (queue_tx, queue_rx) = mpsc::channel(workers * QUEUE_DEPTH_PER_WORKER);
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			workers,
			queue_tx,
			queue_rx: Arc::new(Mutex::new(queue_rx)),
			running: Arc::new(AtomicBool::new(false)),
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn submitter(&self) -> TaskSubmitter {
		TaskSubmitter {
			queue_tx: self.queue_tx.clone(),
			running: Arc::clone(&self.running),
		}
	}

	/// Non-blocking enqueue; see [`TaskSubmitter::submit`].
	pub fn submit(&self, task: JobTask) -> bool {
		self.submitter().submit(task)
	}

	/// Spawn the workers. Idempotent: a second call is a no-op.
	pub async fn start<F, Fut>(&self, handler: F)
	where
		F: Fn(JobTask) -> Fut + Clone + Send + Sync + 'static,
		Fut: std::future::Future<Output = ()> + Send + 'static,
	{
		if self.running.swap(true, Ordering::SeqCst) {
			return;
		}

		let mut handles = self.handles.lock().await;
		for worker in 0..self.workers {
			let queue_rx = Arc::clone(&self.queue_rx);
			let handler = handler.clone();
			let mut shutdown_rx = self.shutdown_tx.subscribe();

			handles.push(tokio::spawn(async move {
				let mut draining = false;
				loop {
					// The guard is released before the task is handled so
					// other workers can pick up work concurrently.
					let task = {
						let mut queue = queue_rx.lock().await;
						if draining {
							queue.try_recv().ok()
						} else {
							tokio::select! {
								biased;
								task = queue.recv() => task,
								_ = shutdown_rx.recv() => {
									draining = true;
									queue.try_recv().ok()
								}
							}
						}
					};

					let Some(task) = task else { break };

					// One bad task must not take the worker down.
					let execution_id = task.execution.id;
					if let Err(panic) = std::panic::AssertUnwindSafe(handler(task))
						.catch_unwind()
						.await
					{
						error!(
							worker,
							execution_id = %execution_id,
							panic = panic_message(&panic),
							"task panicked, worker recovered"
						);
					}
				}
				debug!(worker, "worker exited");
			}));
		}

		info!(workers = self.workers, "worker pool started");
	}

	/// Stop accepting work, drain every accepted task, and join the
	/// workers. Idempotent.
	pub async fn stop(&self) {
		if !self.running.swap(false, Ordering::SeqCst) {
			return;
		}

		let _ = self.shutdown_tx.send(());

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("worker pool stopped");
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}

	/// Tasks currently waiting in the queue.
	pub fn queue_size(&self) -> usize {
		self.queue_tx.max_capacity() - self.queue_tx.capacity()
	}

	pub fn worker_count(&self) -> usize {
		self.workers
	}
}

/// Best-effort extraction of a panic payload message.
pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
	if let Some(s) = panic.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}
