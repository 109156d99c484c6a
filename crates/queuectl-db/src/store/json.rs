//! Flat-file snapshot store: one JSON document per collection.

use async_trait::async_trait;
use queuectl_core::settings::{default_config, with_defaults};
use queuectl_core::{ConfigMap, Job, JobState, JobStore, StoreResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

const JOBS_FILE: &str = "jobs.json";
const DLQ_FILE: &str = "dlq.json";
const CONFIG_FILE: &str = "config.json";

/// Stores `jobs.json`, `dlq.json` and `config.json` in a data directory.
///
/// Writes go to a temporary file first and are renamed into place, so a crash
/// mid-write leaves the previous snapshot intact.
///
/// Only one process may use a data directory at a time. Queue operations are
/// serialized inside the process that owns the `JobQueue`; a second process
/// rewriting the same files can lose updates.
pub struct JsonStore {
    dir: PathBuf,
    io_lock: Mutex<()>,
}

impl JsonStore {
    /// Open (and if needed initialise) a store in `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let store = Self {
            dir: dir.into(),
            io_lock: Mutex::new(()),
        };
        store.init().await?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn init(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.dir).await?;

        let empty: Vec<Job> = Vec::new();
        if !fs::try_exists(self.path(JOBS_FILE)).await? {
            write_json(&self.path(JOBS_FILE), &empty).await?;
        }
        if !fs::try_exists(self.path(DLQ_FILE)).await? {
            write_json(&self.path(DLQ_FILE), &empty).await?;
        }
        if !fs::try_exists(self.path(CONFIG_FILE)).await? {
            write_json(&self.path(CONFIG_FILE), &default_config()).await?;
        }

        info!(dir = %self.dir.display(), "JSON store ready");
        Ok(())
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    async fn load<T: DeserializeOwned + Default>(&self, file: &str) -> StoreResult<T> {
        let _guard = self.io_lock.lock().await;
        read_json(&self.path(file)).await
    }

    async fn save<T: Serialize + ?Sized>(&self, file: &str, value: &T) -> StoreResult<()> {
        let _guard = self.io_lock.lock().await;
        write_json(&self.path(file), value).await
    }
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
    match fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Snapshot missing, treating as empty");
            Ok(T::default())
        }
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl JobStore for JsonStore {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn load_config(&self) -> StoreResult<ConfigMap> {
        let stored: ConfigMap = self.load(CONFIG_FILE).await?;
        Ok(with_defaults(stored))
    }

    async fn save_config(&self, config: &ConfigMap) -> StoreResult<()> {
        self.save(CONFIG_FILE, config).await
    }

    async fn load_jobs(&self) -> StoreResult<Vec<Job>> {
        self.load(JOBS_FILE).await
    }

    async fn save_jobs(&self, jobs: &[Job]) -> StoreResult<()> {
        self.save(JOBS_FILE, jobs).await
    }

    async fn load_dlq(&self) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.load(DLQ_FILE).await?;
        for job in &mut jobs {
            job.state = JobState::Dead;
        }
        Ok(jobs)
    }

    async fn save_dlq(&self, jobs: &[Job]) -> StoreResult<()> {
        self.save(DLQ_FILE, jobs).await
    }
}
