//! Job and job state definitions.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// Default per-job retry ceiling.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle state of a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed.
    #[display("pending")]
    Pending,
    /// Claimed by a worker and executing.
    #[display("processing")]
    Processing,
    /// Finished successfully. Terminal.
    #[display("completed")]
    Completed,
    /// Failed at least once; eligible again once `run_at` has passed.
    #[display("failed")]
    Failed,
    /// Retries exhausted. Jobs in the dead letter queue are always dead.
    #[display("dead")]
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::InvalidState(s.to_string()))
    }
}

/// A unit of work: a shell command plus its retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique among active jobs.
    pub id: String,
    /// Shell command text to execute.
    pub command: String,
    #[serde(default = "default_state")]
    pub state: JobState,
    /// Number of failed executions so far.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Not claimable before this instant. Only set while `state` is failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    /// Higher claims first.
    #[serde(default)]
    pub priority: i32,
    /// Tail of the most recent failure output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Worker currently holding the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

fn default_state() -> JobState {
    JobState::Pending
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Job {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            command: command.into(),
            state: JobState::Pending,
            attempts: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: now,
            updated_at: now,
            run_at: None,
            priority: 0,
            last_error: None,
            worker_id: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether a worker may claim this job at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Pending => true,
            JobState::Failed => self.run_at.is_none_or(|run_at| run_at <= now),
            _ => false,
        }
    }
}
