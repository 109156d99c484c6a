//! Worker that processes jobs from the queue.

use crate::queue::JobQueue;
use queuectl_core::{CommandRunner, Error, QueueSettings, Result, WorkerId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Per-worker tuning, fixed when the worker is spawned.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub job_timeout: Duration,
    pub backoff_base: u32,
    pub heartbeat: Duration,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
    /// Sleep after a queue or storage error.
    pub error_backoff: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}

impl WorkerOptions {
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            job_timeout: settings.job_timeout(),
            backoff_base: settings.backoff_base,
            heartbeat: settings.heartbeat(),
            poll_interval: Duration::from_millis(300),
            error_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// A worker that claims and executes jobs.
pub struct Worker {
    id: WorkerId,
    queue: Arc<JobQueue>,
    runner: Arc<dyn CommandRunner>,
    options: WorkerOptions,
    running: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        queue: Arc<JobQueue>,
        runner: Arc<dyn CommandRunner>,
        options: WorkerOptions,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            queue,
            runner,
            options,
            running,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Claim and execute one job. Returns `false` if nothing was eligible.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(job) = self.queue.claim_next(self.id.as_str()).await? else {
            return Ok(false);
        };

        info!(worker_id = %self.id, job_id = %job.id, attempt = job.attempts + 1, "Running job");
        let outcome = self
            .runner
            .run(&job.command, self.options.job_timeout)
            .await;

        if !outcome.success() {
            warn!(
                worker_id = %self.id,
                job_id = %job.id,
                exit_code = outcome.exit_code,
                "Job failed"
            );
        }

        // Recorded on its own task: aborting this worker must not cancel the
        // queue update halfway through its saves.
        let queue = self.queue.clone();
        let backoff_base = self.options.backoff_base;
        let record = tokio::spawn(async move {
            if outcome.success() {
                queue.complete(&job.id).await
            } else {
                queue.fail(&job.id, backoff_base, &outcome.error_tail()).await
            }
        });
        record
            .await
            .map_err(|e| Error::Internal(format!("recording job result failed: {}", e)))??;
        Ok(true)
    }

    /// Run the worker loop until the shared running flag is cleared.
    pub async fn run(&self) {
        info!(worker_id = %self.id, runner = self.runner.name(), "Starting worker");
        let mut last_heartbeat = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            if last_heartbeat.elapsed() >= self.options.heartbeat {
                debug!(worker_id = %self.id, "Worker heartbeat");
                last_heartbeat = Instant::now();
            }

            match self.process_next().await {
                Ok(true) => {}
                Ok(false) => sleep(self.options.poll_interval).await,
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Worker iteration failed");
                    sleep(self.options.error_backoff).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use queuectl_core::executor::{EXIT_TIMEOUT, ExecOutcome};
    use queuectl_core::{Job, JobState, JobStore};
    use queuectl_db::MemoryStore;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Returns canned outcomes keyed by command and records what it ran.
    #[derive(Default)]
    struct ScriptedRunner {
        outcomes: HashMap<String, ExecOutcome>,
        ran: Mutex<Vec<(String, Duration)>>,
    }

    impl ScriptedRunner {
        fn with(mut self, command: &str, outcome: ExecOutcome) -> Self {
            self.outcomes.insert(command.to_string(), outcome);
            self
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run(&self, command: &str, timeout: Duration) -> ExecOutcome {
            self.ran.lock().unwrap().push((command.to_string(), timeout));
            self.outcomes
                .get(command)
                .cloned()
                .unwrap_or_else(|| ExecOutcome::new(0, ""))
        }
    }

    fn worker(store: Arc<MemoryStore>, runner: Arc<ScriptedRunner>) -> Worker {
        Worker::new(
            WorkerId::from("w-test"),
            Arc::new(JobQueue::new(store)),
            runner,
            WorkerOptions::default().with_poll_interval(Duration::from_millis(10)),
            Arc::new(AtomicBool::new(true)),
        )
    }

    #[tokio::test]
    async fn test_process_next_empty_queue() {
        let store = Arc::new(MemoryStore::new());
        let runner = Arc::new(ScriptedRunner::default());
        let worker = worker(store, runner.clone());

        assert!(!worker.process_next().await.unwrap());
        assert!(runner.ran.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_job_completes() {
        let store = Arc::new(MemoryStore::new());
        store.save_jobs(&[Job::new("ok", "echo hi")]).await.unwrap();
        let runner = Arc::new(ScriptedRunner::default());
        let worker = worker(store.clone(), runner.clone());

        assert!(worker.process_next().await.unwrap());

        let job = &store.load_jobs().await.unwrap()[0];
        assert_eq!(job.state, JobState::Completed);
        assert!(job.worker_id.is_none());
        assert_eq!(
            runner.ran.lock().unwrap().as_slice(),
            &[("echo hi".to_string(), Duration::from_secs(60))]
        );
    }

    #[tokio::test]
    async fn test_failed_job_records_error_tail() {
        let store = Arc::new(MemoryStore::new());
        store.save_jobs(&[Job::new("bad", "false")]).await.unwrap();
        let runner =
            Arc::new(ScriptedRunner::default().with("false", ExecOutcome::new(1, "boom\n")));
        let worker = worker(store.clone(), runner);

        assert!(worker.process_next().await.unwrap());

        let job = &store.load_jobs().await.unwrap()[0];
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("exit=1\nboom\n"));
        assert!(job.run_at.is_some());
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let store = Arc::new(MemoryStore::new());
        store.save_jobs(&[Job::new("slow", "sleep 100")]).await.unwrap();
        let runner = Arc::new(
            ScriptedRunner::default()
                .with("sleep 100", ExecOutcome::timed_out(Duration::from_secs(60))),
        );
        let worker = worker(store.clone(), runner);

        worker.process_next().await.unwrap();

        let job = &store.load_jobs().await.unwrap()[0];
        assert_eq!(job.state, JobState::Failed);
        assert!(
            job.last_error
                .as_deref()
                .unwrap()
                .starts_with(&format!("exit={}\n", EXIT_TIMEOUT))
        );
    }

    #[tokio::test]
    async fn test_run_exits_when_flag_cleared() {
        let store = Arc::new(MemoryStore::new());
        store
            .save_jobs(&[Job::new("a", "true"), Job::new("b", "true")])
            .await
            .unwrap();
        let worker = Arc::new(worker(store.clone(), Arc::new(ScriptedRunner::default())));
        let running = worker.running.clone();

        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let jobs = store.load_jobs().await.unwrap();
                if jobs.iter().all(|j| j.state == JobState::Completed) {
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("jobs should complete");

        running.store(false, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_storage_errors_do_not_kill_the_loop() {
        let store = Arc::new(MemoryStore::new());
        store.save_jobs(&[Job::new("a", "true")]).await.unwrap();
        store.set_fail_writes(true);

        let mut options = WorkerOptions::default().with_poll_interval(Duration::from_millis(10));
        options.error_backoff = Duration::from_millis(10);
        let running = Arc::new(AtomicBool::new(true));
        let worker = Worker::new(
            WorkerId::from("w-test"),
            Arc::new(JobQueue::new(store.clone())),
            Arc::new(ScriptedRunner::default()),
            options,
            running.clone(),
        );
        let handle = tokio::spawn(async move { worker.run().await });

        sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        store.set_fail_writes(false);

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.load_jobs().await.unwrap()[0].state != JobState::Completed {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job should complete once storage recovers");

        running.store(false, Ordering::SeqCst);
        handle.await.unwrap();
    }
}
