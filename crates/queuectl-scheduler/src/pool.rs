//! Worker pool: starts and stops a set of worker tasks sharing one queue.

use crate::queue::JobQueue;
use crate::worker::{Worker, WorkerOptions};
use queuectl_core::{CommandRunner, Error, Result, WorkerId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pool-level tuning from the system configuration.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub poll_interval: Duration,
    /// How long `stop` waits for in-flight jobs before aborting workers.
    pub stop_grace: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(300),
            stop_grace: Duration::from_secs(5),
        }
    }
}

struct RunningWorker {
    id: WorkerId,
    handle: JoinHandle<()>,
}

/// Starts and stops worker tasks.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    runner: Arc<dyn CommandRunner>,
    options: PoolOptions,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<RunningWorker>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<JobQueue>, runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_options(queue, runner, PoolOptions::default())
    }

    pub fn with_options(
        queue: Arc<JobQueue>,
        runner: Arc<dyn CommandRunner>,
        options: PoolOptions,
    ) -> Self {
        Self {
            queue,
            runner,
            options,
            running: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `count` workers (at least one). Queue settings are read once here.
    pub async fn start(&self, count: usize) -> Result<String> {
        let mut workers = self.workers.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        let settings = self.queue.settings().await?;
        let options = WorkerOptions::from_settings(&settings)
            .with_poll_interval(self.options.poll_interval);
        let count = count.max(1);

        self.running.store(true, Ordering::SeqCst);
        for _ in 0..count {
            let worker = Worker::new(
                WorkerId::generate(),
                self.queue.clone(),
                self.runner.clone(),
                options.clone(),
                self.running.clone(),
            );
            let id = worker.id().clone();
            let handle = tokio::spawn(async move { worker.run().await });
            workers.push(RunningWorker { id, handle });
        }

        info!(
            count,
            job_timeout_secs = options.job_timeout.as_secs(),
            backoff_base = options.backoff_base,
            "Started worker pool"
        );
        Ok(format!("Started {} worker(s).", count))
    }

    /// Signal workers to stop and wait for them.
    ///
    /// Workers still busy after the grace period are aborted. Aborting drops
    /// the running command, which kills its process group, and the job is put
    /// back to pending.
    pub async fn stop(&self) -> Result<String> {
        let mut workers = self.workers.lock().await;
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(Error::NotRunning);
        }

        let deadline = tokio::time::Instant::now() + self.options.stop_grace;
        for RunningWorker { id, mut handle } in workers.drain(..) {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_ok() {
                continue;
            }

            warn!(worker_id = %id, "Worker did not stop in time, aborting");
            handle.abort();
            let _ = handle.await;
            if let Err(e) = self.queue.release(id.as_str()).await {
                warn!(worker_id = %id, error = %e, "Failed to release jobs");
            }
        }

        info!("Stopped worker pool");
        Ok("Stopped workers.".to_string())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn worker_ids(&self) -> Vec<String> {
        self.workers
            .lock()
            .await
            .iter()
            .map(|w| w.id.to_string())
            .collect()
    }
}
