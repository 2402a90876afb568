//! Bounded worker pool.
//!
//! A fixed number of tokio workers pull jobs from one bounded queue. Queue
//! capacity is the only admission limit: `try_submit` hands the job back when
//! the queue is full so the caller can retry later without losing it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::executor::{Job, TaskExecutor};

pub struct WorkerPool {
    tx: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    /// Workers currently executing a job.
    active: Arc<AtomicUsize>,
    capacity: usize,
}

impl WorkerPool {
    /// Spawn `size` workers sharing a queue of `capacity` jobs.
    pub fn spawn(size: usize, capacity: usize, executor: Arc<TaskExecutor>) -> Self {
        let size = size.max(1);
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel::<Job>(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let active = Arc::new(AtomicUsize::new(0));

        let workers = (0..size)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let active = Arc::clone(&active);
                let executor = Arc::clone(&executor);
                tokio::spawn(async move {
                    loop {
                        // The lock is held only while waiting for the next job.
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else { break };

                        active.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            worker,
                            task_id = job.task.id,
                            execution_id = %job.record.execution_id,
                            "worker picked up job"
                        );
                        executor.execute(job).await;
                        active.fetch_sub(1, Ordering::Relaxed);
                    }
                    tracing::debug!(worker, "worker stopped");
                })
            })
            .collect();

        tracing::info!(workers = size, queue_capacity = capacity, "worker pool started");
        Self {
            tx: Some(tx),
            workers,
            active,
            capacity,
        }
    }

    /// Queue `job` for a worker. Returns the job when the queue is full or closed.
    pub fn try_submit(&self, job: Job) -> Result<(), Job> {
        let Some(tx) = &self.tx else {
            return Err(job);
        };
        tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn busy(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.tx
            .as_ref()
            .map(|tx| self.capacity.saturating_sub(tx.capacity()))
            .unwrap_or(0)
    }

    pub fn utilization(&self) -> f64 {
        self.busy() as f64 / self.size() as f64
    }

    /// Close the queue and wait for workers to drain it.
    pub async fn shutdown(mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker panicked");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use sluice_core::{ExecutionStatus, TriggerKind};

    use crate::test_support::{executor, task, wait_until, MemoryRepository, MockRegistry};

    fn job(exec: &TaskExecutor, id: i64) -> Job {
        let guard = exec
            .flights()
            .try_acquire(id, TriggerKind::Scheduled, Utc::now())
            .unwrap();
        Job::new(task(id, None), guard)
    }

    #[tokio::test]
    async fn full_queue_hands_job_back() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(MockRegistry::slow(1, Duration::from_millis(400)));
        let repo = Arc::new(MemoryRepository::default());
        let exec = Arc::new(executor(registry, Arc::clone(&repo), dir.path()));
        let pool = WorkerPool::spawn(1, 1, Arc::clone(&exec));

        // First job occupies the worker, second fills the queue.
        pool.try_submit(job(&exec, 1)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || pool.busy() == 1).await);
        pool.try_submit(job(&exec, 2)).unwrap();

        let rejected = pool.try_submit(job(&exec, 3)).unwrap_err();
        assert_eq!(rejected.task.id, 3);
        assert_eq!(pool.queued(), 1);
        drop(rejected);

        pool.shutdown().await;
        let done: Vec<ExecutionStatus> = repo
            .saves()
            .into_iter()
            .filter(|(_, s)| s.is_terminal())
            .map(|(_, s)| s)
            .collect();
        assert_eq!(done, vec![ExecutionStatus::Success, ExecutionStatus::Success]);
    }

    #[tokio::test]
    async fn workers_run_jobs_in_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(MockRegistry::slow(1, Duration::from_millis(300)));
        let repo = Arc::new(MemoryRepository::default());
        let exec = Arc::new(executor(registry, repo, dir.path()));
        let pool = WorkerPool::spawn(2, 4, Arc::clone(&exec));

        pool.try_submit(job(&exec, 1)).unwrap();
        pool.try_submit(job(&exec, 2)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || pool.busy() == 2).await);
        assert!((pool.utilization() - 1.0).abs() < f64::EPSILON);

        pool.shutdown().await;
        assert!(exec.flights().is_empty());
    }
}
