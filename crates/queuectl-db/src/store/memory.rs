//! In-memory store, for tests and queues that need not survive the process.

use async_trait::async_trait;
use queuectl_core::settings::{default_config, with_defaults};
use queuectl_core::{ConfigMap, Job, JobStore, StoreError, StoreResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Collections {
    config: ConfigMap,
    jobs: Vec<Job>,
    dlq: Vec<Job>,
}

/// Keeps all three collections in process memory.
pub struct MemoryStore {
    inner: RwLock<Collections>,
    fail_writes: AtomicBool,
    fail_job_writes: AtomicBool,
    fail_dlq_writes: AtomicBool,
    job_saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Collections {
                config: default_config(),
                ..Default::default()
            }),
            fail_writes: AtomicBool::new(false),
            fail_job_writes: AtomicBool::new(false),
            fail_dlq_writes: AtomicBool::new(false),
            job_saves: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent save fail with an I/O error until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail only `save_jobs`, leaving the other collections writable.
    pub fn set_fail_job_writes(&self, fail: bool) {
        self.fail_job_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail only `save_dlq`, leaving the other collections writable.
    pub fn set_fail_dlq_writes(&self, fail: bool) {
        self.fail_dlq_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `save_jobs` calls so far.
    pub fn job_saves(&self) -> usize {
        self.job_saves.load(Ordering::SeqCst)
    }

    fn check_writable(&self, collection: &AtomicBool) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) || collection.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other(
                "memory store is read-only",
            )));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load_config(&self) -> StoreResult<ConfigMap> {
        Ok(with_defaults(self.inner.read().await.config.clone()))
    }

    async fn save_config(&self, config: &ConfigMap) -> StoreResult<()> {
        self.check_writable(&self.fail_writes)?;
        self.inner.write().await.config = config.clone();
        Ok(())
    }

    async fn load_jobs(&self) -> StoreResult<Vec<Job>> {
        Ok(self.inner.read().await.jobs.clone())
    }

    async fn save_jobs(&self, jobs: &[Job]) -> StoreResult<()> {
        self.check_writable(&self.fail_job_writes)?;
        self.inner.write().await.jobs = jobs.to_vec();
        self.job_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_dlq(&self) -> StoreResult<Vec<Job>> {
        Ok(self.inner.read().await.dlq.clone())
    }

    async fn save_dlq(&self, jobs: &[Job]) -> StoreResult<()> {
        self.check_writable(&self.fail_dlq_writes)?;
        self.inner.write().await.dlq = jobs.to_vec();
        Ok(())
    }
}
