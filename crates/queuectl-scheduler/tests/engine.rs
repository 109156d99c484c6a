//! End-to-end queue behaviour against the JSON store and the host shell.

use queuectl_core::settings::{BACKOFF_BASE, JOB_TIMEOUT_SEC, MAX_RETRIES};
use queuectl_core::{Job, JobState, JobStore};
use queuectl_db::{JsonStore, MemoryStore};
use queuectl_executor::ShellExecutor;
use queuectl_scheduler::{JobQueue, PoolOptions, WorkerPool};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn pool_options() -> PoolOptions {
    PoolOptions {
        poll_interval: Duration::from_millis(20),
        stop_grace: Duration::from_secs(5),
    }
}

async fn wait_until<F, Fut>(mut done: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(20), async {
        while !done().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Whether any process has a full command line matching `pattern`.
#[cfg(unix)]
fn process_running(pattern: &str) -> bool {
    std::process::Command::new("pgrep")
        .args(["-f", pattern])
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_never_double_dispatch() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(JobQueue::new(store));
    for i in 0..50 {
        queue
            .enqueue(Job::new(format!("job-{i}"), "true"))
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for w in 0..8 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            let worker_id = format!("w-{w}");
            let mut claimed = Vec::new();
            while let Some(job) = queue.claim_next(&worker_id).await.unwrap() {
                assert_eq!(job.worker_id.as_deref(), Some(worker_id.as_str()));
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(seen.insert(id.clone()), "{id} was claimed twice");
        }
    }
    assert_eq!(seen.len(), 50);

    let counts = queue.counts().await.unwrap();
    assert_eq!(counts.get(&JobState::Processing), Some(&50));
}

#[cfg(unix)]
#[tokio::test]
async fn test_shell_jobs_complete_and_fail_into_dlq() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStore::open(dir.path()).await.unwrap());
    let queue = Arc::new(JobQueue::new(store.clone()));
    queue.config_set(MAX_RETRIES, "2").await.unwrap();
    queue.config_set(BACKOFF_BASE, "1").await.unwrap();

    queue.enqueue(Job::new("ok", "echo hello")).await.unwrap();
    queue
        .enqueue(Job::new("bad", "echo failing >&2; exit 3"))
        .await
        .unwrap();

    let pool = WorkerPool::with_options(
        queue.clone(),
        Arc::new(ShellExecutor::new()),
        pool_options(),
    );
    pool.start(2).await.unwrap();

    wait_until(|| {
        let queue = queue.clone();
        async move { queue.dlq_count().await.unwrap() == 1 }
    })
    .await;
    pool.stop().await.unwrap();

    let active = store.load_jobs().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "ok");
    assert_eq!(active[0].state, JobState::Completed);
    assert!(active[0].worker_id.is_none());

    let dlq = store.load_dlq().await.unwrap();
    assert_eq!(dlq[0].id, "bad");
    assert_eq!(dlq[0].attempts, 2);
    assert_eq!(dlq[0].last_error.as_deref(), Some("exit=3\nfailing\n"));

    // Requeue and check the job is eligible again with a fresh budget.
    assert!(queue.dlq_retry("bad").await.unwrap());
    let pending = queue.list(Some("pending")).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_timeout_counts_as_failure() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(JobQueue::new(store.clone()));
    queue.config_set(JOB_TIMEOUT_SEC, "1").await.unwrap();
    queue.config_set(MAX_RETRIES, "1").await.unwrap();
    queue.enqueue(Job::new("slow", "sleep 30")).await.unwrap();

    let pool = WorkerPool::with_options(
        queue.clone(),
        Arc::new(ShellExecutor::new()),
        pool_options(),
    );
    pool.start(1).await.unwrap();

    wait_until(|| {
        let queue = queue.clone();
        async move { queue.dlq_count().await.unwrap() == 1 }
    })
    .await;
    pool.stop().await.unwrap();

    let dlq = store.load_dlq().await.unwrap();
    assert_eq!(dlq[0].last_error.as_deref(), Some("exit=124\nTimed out after 1s"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_kills_running_command_and_releases_job() {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(JobQueue::new(store.clone()));
    queue.config_set(JOB_TIMEOUT_SEC, "300").await.unwrap();
    queue
        .enqueue(Job::new("long", "sleep 41.5; echo done"))
        .await
        .unwrap();

    let pool = WorkerPool::with_options(
        queue.clone(),
        Arc::new(ShellExecutor::new()),
        PoolOptions {
            poll_interval: Duration::from_millis(20),
            stop_grace: Duration::from_millis(200),
        },
    );
    pool.start(1).await.unwrap();
    wait_until(|| async { process_running("^sleep 41[.]5$") }).await;

    pool.stop().await.unwrap();
    wait_until(|| async { !process_running("^sleep 41[.]5$") }).await;

    let job = &store.load_jobs().await.unwrap()[0];
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert!(job.worker_id.is_none());
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Arc::new(JsonStore::open(dir.path()).await.unwrap());
        let queue = JobQueue::new(store);
        queue.enqueue(Job::new("a", "true").with_priority(2)).await.unwrap();
        queue.config_set(MAX_RETRIES, "7").await.unwrap();
    }

    let store = Arc::new(JsonStore::open(dir.path()).await.unwrap());
    let queue = JobQueue::new(store);
    let jobs = queue.list(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].priority, 2);
    assert_eq!(queue.settings().await.unwrap().max_retries, 7);
}
