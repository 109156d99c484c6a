//! Run commands from a script file line by line.
//!
//! ```text
//! # comments and blank lines are skipped
//! config set max_retries 2
//! enqueue '{"id":"job1","command":"echo hi"}'
//! worker start 2
//! sleep 3000
//! status
//! ```

use super::line::{self, LineCommand};
use crate::app::App;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Execute every command in `path`, writing each line and its output to `out`.
///
/// A failing line is reported and the script carries on. Workers the script
/// left running are stopped at the end.
pub async fn run<W: Write>(app: &App, path: &Path, out: &mut W) -> Result<String> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("File not found: {}", path.display()))?;

    let mut executed = 0;
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        writeln!(out, "▶ {}", line)?;
        executed += 1;

        let command = match line::parse(line) {
            Ok(LineCommand::Exit) => break,
            Ok(command) => command,
            Err(usage) => {
                writeln!(out, "⚠ {}", usage)?;
                continue;
            }
        };

        match line::dispatch(app, &command).await {
            Ok(output) if output.is_empty() => {}
            Ok(output) => writeln!(out, "{}", output.trim_end())?,
            Err(e) => {
                warn!(line, error = %e, "Script command failed");
                writeln!(out, "⚠ Error executing command: {}", e)?;
            }
        }
    }

    app.shutdown().await?;
    Ok(format!("Executed {} commands from {}", executed, path.display()))
}
