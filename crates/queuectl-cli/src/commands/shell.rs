//! Interactive shell.

use super::line::{self, LineCommand};
use crate::app::App;
use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

const PROMPT: &str = "queuectl> ";

/// Read commands from stdin until `exit` or end of input.
pub async fn run(app: &App) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("queuectl shell on {} store. Type 'help' for commands.", app.queue.store_name());

    loop {
        print!("{}", PROMPT);
        std::io::stdout().flush()?;

        let Some(raw) = lines.next_line().await? else {
            println!();
            break;
        };
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let command = match line::parse(line) {
            Ok(LineCommand::Exit) => break,
            Ok(command) => command,
            Err(usage) => {
                println!("{}", usage);
                continue;
            }
        };

        match line::dispatch(app, &command).await {
            Ok(output) if output.is_empty() => {}
            Ok(output) => println!("{}", output.trim_end()),
            Err(e) => println!("Error: {}", e),
        }
    }

    app.shutdown().await
}
