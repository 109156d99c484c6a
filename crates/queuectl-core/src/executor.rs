//! Command execution trait and result types.
//!
//! Executors run one job's shell command to completion or timeout. They never
//! return an error: spawn failures and timeouts are reported as exit codes so
//! the worker can feed them into the retry machinery.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exit code reported when a command exceeded its timeout.
pub const EXIT_TIMEOUT: i32 = 124;

/// Exit code reported when a command could not be spawned or read.
pub const EXIT_EXEC_FAILURE: i32 = 127;

/// Maximum number of output characters kept in a job's error tail.
pub const ERROR_TAIL_CHARS: usize = 1500;

/// Outcome of running one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub exit_code: i32,
    /// Combined stdout and stderr.
    pub output: String,
}

impl ExecOutcome {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self::new(
            EXIT_TIMEOUT,
            format!("Timed out after {}s", timeout.as_secs()),
        )
    }

    pub fn exec_failure(message: impl Into<String>) -> Self {
        Self::new(EXIT_EXEC_FAILURE, message)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// `exit=<code>` followed by the last [`ERROR_TAIL_CHARS`] characters of output.
    pub fn error_tail(&self) -> String {
        if self.output.is_empty() {
            return format!("exit={}", self.exit_code);
        }
        format!("exit={}\n{}", self.exit_code, tail_chars(&self.output, ERROR_TAIL_CHARS))
    }
}

/// The last `n` characters of `s`, respecting char boundaries.
pub fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Trait for command executors.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Run `command`, killing it if it has not finished within `timeout`.
    async fn run(&self, command: &str, timeout: Duration) -> ExecOutcome;
}
