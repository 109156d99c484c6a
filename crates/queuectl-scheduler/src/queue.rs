//! Job queue: the job state machine over a whole-collection store.
//!
//! Every mutation loads the collections it touches, changes them and saves
//! them back while holding `op_lock`. The store does no partial updates, so
//! this critical section is what makes a claim exclusive.

use chrono::{DateTime, Utc};
use queuectl_core::settings::{ConfigMap, ConfigValue, QueueSettings};
use queuectl_core::{Clock, Error, Job, JobState, JobStore, Result, SystemClock, backoff};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Job queue backed by a [`JobStore`].
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    // tokio's mutex is FIFO, so waiting workers are served in arrival order.
    op_lock: Mutex<()>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            op_lock: Mutex::new(()),
        }
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Add a new pending job. Fails with [`Error::DuplicateId`] if an active job
    /// already has this id.
    pub async fn enqueue(&self, mut job: Job) -> Result<Job> {
        if job.id.trim().is_empty() {
            return Err(Error::InvalidInput("id is required".to_string()));
        }
        if job.command.trim().is_empty() {
            return Err(Error::InvalidInput("command is required".to_string()));
        }

        let _guard = self.op_lock.lock().await;
        let mut jobs = self.store.load_jobs().await?;
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(Error::DuplicateId(job.id));
        }

        let now = self.clock.now();
        job.state = JobState::Pending;
        job.created_at = now;
        job.updated_at = now;
        job.run_at = None;
        job.worker_id = None;
        jobs.push(job.clone());
        self.store.save_jobs(&jobs).await?;

        info!(job_id = %job.id, priority = job.priority, "Enqueued job");
        Ok(job)
    }

    /// Claim the next eligible job for `worker_id`.
    ///
    /// Eligible jobs are pending ones and failed ones whose `run_at` has
    /// passed. The highest priority wins, then the oldest.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>> {
        let _guard = self.op_lock.lock().await;
        let now = self.clock.now();
        let mut jobs = self.store.load_jobs().await?;

        let Some(idx) = select_next(&jobs, now) else {
            return Ok(None);
        };

        let job = &mut jobs[idx];
        job.state = JobState::Processing;
        job.worker_id = Some(worker_id.to_string());
        job.run_at = None;
        job.updated_at = now;
        let claimed = job.clone();
        self.store.save_jobs(&jobs).await?;

        debug!(job_id = %claimed.id, worker_id, "Claimed job");
        Ok(Some(claimed))
    }

    /// Mark a job as completed. Unknown ids are ignored.
    pub async fn complete(&self, job_id: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let now = self.clock.now();
        let mut jobs = self.store.load_jobs().await?;

        let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) else {
            debug!(job_id, "Completed job no longer active");
            return Ok(());
        };
        job.state = JobState::Completed;
        job.worker_id = None;
        job.run_at = None;
        job.updated_at = now;
        self.store.save_jobs(&jobs).await?;

        info!(job_id, "Job completed");
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// The job is scheduled for a retry after `backoff_base^attempts` seconds,
    /// or moved to the dead letter queue once `attempts` reaches the
    /// configured `max_retries`. Unknown ids are ignored.
    pub async fn fail(&self, job_id: &str, backoff_base: u32, error_tail: &str) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        let now = self.clock.now();
        let max_retries = QueueSettings::from_config(&self.store.load_config().await?).max_retries;
        let mut jobs = self.store.load_jobs().await?;

        let Some(idx) = jobs.iter().position(|j| j.id == job_id) else {
            debug!(job_id, "Failed job no longer active");
            return Ok(());
        };

        let job = &mut jobs[idx];
        job.attempts = job.attempts.saturating_add(1);
        job.last_error = Some(error_tail.to_string());
        job.worker_id = None;
        job.updated_at = now;

        if job.attempts >= max_retries {
            job.state = JobState::Dead;
            job.run_at = None;
            let dead = jobs.remove(idx);
            let attempts = dead.attempts;

            let original_dlq = self.store.load_dlq().await?;
            let mut dlq = original_dlq.clone();
            dlq.push(dead);
            // DLQ first, so a failure between the two saves never loses the
            // job; the DLQ save is undone if the active set cannot be saved.
            self.store.save_dlq(&dlq).await?;
            if let Err(e) = self.store.save_jobs(&jobs).await {
                if let Err(undo) = self.store.save_dlq(&original_dlq).await {
                    error!(job_id, error = %undo, "Failed to roll back dead letter queue");
                }
                return Err(e.into());
            }

            warn!(job_id, attempts, "Job moved to dead letter queue");
        } else {
            let delay = backoff::delay(backoff_base, job.attempts);
            job.state = JobState::Failed;
            job.run_at = Some(now + delay);
            let attempts = job.attempts;
            self.store.save_jobs(&jobs).await?;

            info!(
                job_id,
                attempts,
                retry_in_secs = delay.num_seconds(),
                "Job failed, retry scheduled"
            );
        }
        Ok(())
    }

    /// Return jobs held by `worker_id` to pending without counting an attempt.
    ///
    /// Used when a worker is cancelled mid-execution.
    pub async fn release(&self, worker_id: &str) -> Result<usize> {
        let _guard = self.op_lock.lock().await;
        let now = self.clock.now();
        let mut jobs = self.store.load_jobs().await?;

        let mut released = 0;
        for job in jobs.iter_mut().filter(|j| {
            j.state == JobState::Processing && j.worker_id.as_deref() == Some(worker_id)
        }) {
            job.state = JobState::Pending;
            job.worker_id = None;
            job.updated_at = now;
            released += 1;
        }

        if released > 0 {
            self.store.save_jobs(&jobs).await?;
            info!(worker_id, released, "Released jobs held by cancelled worker");
        }
        Ok(released)
    }

    /// Move a job from the dead letter queue back to pending with a fresh
    /// retry budget. Returns whether the id was found in the DLQ.
    pub async fn dlq_retry(&self, job_id: &str) -> Result<bool> {
        let _guard = self.op_lock.lock().await;
        let now = self.clock.now();
        let mut dlq = self.store.load_dlq().await?;

        let Some(idx) = dlq.iter().position(|j| j.id == job_id) else {
            return Ok(false);
        };

        let original_jobs = self.store.load_jobs().await?;
        if original_jobs.iter().any(|j| j.id == job_id) {
            return Err(Error::DuplicateId(job_id.to_string()));
        }
        let mut jobs = original_jobs.clone();

        let mut job = dlq.remove(idx);
        job.state = JobState::Pending;
        job.attempts = 0;
        job.run_at = None;
        job.last_error = None;
        job.worker_id = None;
        job.updated_at = now;
        jobs.push(job);

        // Active set first: a failure between the two saves must not lose
        // the job, so the first save is undone if the second fails.
        self.store.save_jobs(&jobs).await?;
        if let Err(e) = self.store.save_dlq(&dlq).await {
            if let Err(undo) = self.store.save_jobs(&original_jobs).await {
                error!(job_id, error = %undo, "Failed to roll back requeued job");
            }
            return Err(e.into());
        }

        info!(job_id, "Requeued job from dead letter queue");
        Ok(true)
    }

    /// Active jobs, optionally only those in `state_filter`.
    ///
    /// A blank filter means no filter. Unknown state names fail with
    /// [`Error::InvalidState`].
    pub async fn list(&self, state_filter: Option<&str>) -> Result<Vec<Job>> {
        let state = parse_filter(state_filter)?;
        let _guard = self.op_lock.lock().await;
        let jobs = self.store.load_jobs().await?;
        Ok(match state {
            Some(state) => jobs.into_iter().filter(|j| j.state == state).collect(),
            None => jobs,
        })
    }

    /// Like [`list`](Self::list), but `dead` lists the dead letter queue.
    pub async fn list_including_dlq(&self, state_filter: Option<&str>) -> Result<Vec<Job>> {
        match parse_filter(state_filter)? {
            Some(JobState::Dead) => self.list_dlq().await,
            _ => self.list(state_filter).await,
        }
    }

    /// Number of active jobs per state. DLQ members are not included.
    pub async fn counts(&self) -> Result<BTreeMap<JobState, usize>> {
        let _guard = self.op_lock.lock().await;
        let jobs = self.store.load_jobs().await?;
        let mut counts = BTreeMap::new();
        for job in &jobs {
            *counts.entry(job.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub async fn list_dlq(&self) -> Result<Vec<Job>> {
        let _guard = self.op_lock.lock().await;
        Ok(self.store.load_dlq().await?)
    }

    pub async fn dlq_count(&self) -> Result<usize> {
        Ok(self.list_dlq().await?.len())
    }

    pub async fn config(&self) -> Result<ConfigMap> {
        Ok(self.store.load_config().await?)
    }

    pub async fn settings(&self) -> Result<QueueSettings> {
        Ok(QueueSettings::from_config(&self.config().await?))
    }

    pub async fn config_get(&self, key: &str) -> Result<Option<ConfigValue>> {
        Ok(self.config().await?.remove(key))
    }

    /// Store `raw` under `key`; integer literals are stored as integers.
    pub async fn config_set(&self, key: &str, raw: &str) -> Result<ConfigValue> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidInput("config key is required".to_string()));
        }

        let _guard = self.op_lock.lock().await;
        let mut config = self.store.load_config().await?;
        let value = ConfigValue::parse(raw);
        config.insert(key.to_string(), value.clone());
        self.store.save_config(&config).await?;

        info!(key, value = %value, "Updated configuration");
        Ok(value)
    }
}

fn parse_filter(state_filter: Option<&str>) -> Result<Option<JobState>> {
    match state_filter.map(str::trim) {
        None | Some("") => Ok(None),
        Some(name) => name.parse().map(Some),
    }
}

/// Index of the job to claim next: highest priority, then oldest. Ties keep
/// collection order.
fn select_next(jobs: &[Job], now: DateTime<Utc>) -> Option<usize> {
    jobs.iter()
        .enumerate()
        .filter(|(_, job)| job.is_eligible(now))
        .min_by(|(_, a), (_, b)| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        })
        .map(|(idx, _)| idx)
}
