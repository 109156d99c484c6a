//! Host shell executor implementation.

use async_trait::async_trait;
use futures::StreamExt;
use queuectl_core::executor::{CommandRunner, ExecOutcome};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, warn};

/// How long the output reader may keep draining after the process exited.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Runs job commands through the platform shell.
///
/// Each command gets its own process group. A timeout, or dropping the
/// `run` future, kills the whole group, not just the shell.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    working_dir: Option<PathBuf>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands from `dir` instead of the current directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn shell_command(command: &str) -> Command {
        if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        }
    }
}

#[async_trait]
impl CommandRunner for ShellExecutor {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn run(&self, command: &str, timeout: Duration) -> ExecOutcome {
        let mut cmd = Self::shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(command, timeout_secs = timeout.as_secs(), "Spawning command");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command, error = %e, "Failed to spawn command");
                return ExecOutcome::exec_failure(format!("Failed to spawn command: {}", e));
            }
        };
        // Declared after `child` so it drops first, while the group leader
        // has not been reaped yet.
        let mut group = ProcessGroupGuard::new(child.id());

        // Both pipes are drained on their own task so a chatty process can
        // never block on a full pipe while we wait for it to exit.
        let output = Arc::new(Mutex::new(String::new()));
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill().await;
            return ExecOutcome::exec_failure("Failed to capture command output");
        };
        let mut reader = tokio::spawn(collect_output(stdout, stderr, output.clone()));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                reader.abort();
                warn!(command, error = %e, "Failed to wait for command");
                return ExecOutcome::exec_failure(format!("Failed to wait for command: {}", e));
            }
            Err(_) => {
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!(command, error = %e, "Failed to kill timed out command");
                }
                reader.abort();
                warn!(command, timeout_secs = timeout.as_secs(), "Command timed out");
                return ExecOutcome::timed_out(timeout);
            }
        };
        group.disarm();

        match tokio::time::timeout(OUTPUT_GRACE, &mut reader).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                return ExecOutcome::exec_failure(format!("Failed to read command output: {}", e));
            }
            Ok(Err(e)) => {
                return ExecOutcome::exec_failure(format!("Output reader failed: {}", e));
            }
            Err(_) => {
                // A background child still holds the pipes open; keep what we have.
                reader.abort();
                warn!(command, "Output reader did not finish within grace period");
            }
        }

        let exit_code = status.code().unwrap_or(-1);
        let output = output
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default();
        debug!(command, exit_code, "Command finished");
        ExecOutcome::new(exit_code, output)
    }
}

/// Sends SIGKILL to a command's process group when dropped, unless disarmed.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    /// The shell exited on its own; leave any background children alone.
    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(pgid, "Killed process group"),
        // Every member already exited.
        Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Merge stdout and stderr line by line, in arrival order, into `buffer`.
async fn collect_output<O, E>(
    stdout: O,
    stderr: E,
    buffer: Arc<Mutex<String>>,
) -> std::io::Result<()>
where
    O: AsyncRead + Unpin + Send,
    E: AsyncRead + Unpin + Send,
{
    let stdout = SplitStream::new(BufReader::new(stdout).split(b'\n'));
    let stderr = SplitStream::new(BufReader::new(stderr).split(b'\n'));
    let mut merged = futures::stream::select(stdout, stderr);

    while let Some(line) = merged.next().await {
        let line = line?;
        if let Ok(mut buf) = buffer.lock() {
            buf.push_str(&String::from_utf8_lossy(&line));
            buf.push('\n');
        }
    }
    Ok(())
}
