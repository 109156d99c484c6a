//! queuectl: a persistent background job queue.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod app;
mod commands;

use app::App;

#[derive(Parser)]
#[command(name = "queuectl")]
#[command(about = "Persistent background job queue with retries and a dead letter queue", long_about = None)]
struct Cli {
    /// System configuration file
    #[arg(long, env = "QUEUECTL_CONFIG", default_value = queuectl_config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Data directory for the JSON or SQLite store
    #[arg(long, env = "QUEUECTL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Database URL for the Postgres store
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new job, e.g. '{"id":"job1","command":"echo hi"}'
    Enqueue {
        /// Job as JSON with at least id and command
        json: String,
    },
    /// List jobs, optionally by state (dead lists the DLQ)
    List {
        /// pending | processing | completed | failed | dead
        state: Option<String>,
    },
    /// Show job counts by state
    Status,
    /// Inspect and requeue dead jobs
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
    /// Read and change queue settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Run workers
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Execute commands from a script file
    Script {
        /// Path to the script
        path: PathBuf,
    },
    /// Start an interactive shell
    Shell,
}

#[derive(Subcommand)]
enum DlqCommands {
    /// List jobs in the dead letter queue
    List,
    /// Requeue a dead job by id
    Retry {
        /// Job ID
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Start workers in the foreground until Ctrl-C
    ///
    /// Do not run other queuectl commands against the same store while this
    /// is running: updates are only serialized within one process. To
    /// enqueue or inspect jobs alongside running workers, use `queuectl shell`
    /// or a script, which share one queue with their workers.
    Start {
        /// Number of workers
        #[arg(default_value = "1")]
        count: usize,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = queuectl_config::load(&cli.config)
        .with_context(|| format!("Failed to load config file: {}", cli.config.display()))?;
    if let Some(dir) = cli.data_dir {
        config.override_data_dir(dir);
    }
    if let Some(url) = cli.database_url {
        config.override_database_url(url);
    }

    let app = App::open(&config).await?;

    let output = match cli.command {
        Commands::Enqueue { json } => commands::enqueue(&app, &json).await?,
        Commands::List { state } => commands::list(&app, state.as_deref()).await?,
        Commands::Status => commands::status(&app).await?,
        Commands::Dlq { command } => match command {
            DlqCommands::List => commands::dlq_list(&app).await?,
            DlqCommands::Retry { id } => commands::dlq_retry(&app, &id).await?,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => commands::config_get(&app, &key).await?,
            ConfigCommands::Set { key, value } => {
                commands::config_set(&app, &key, &value).await?
            }
        },
        Commands::Worker { command } => match command {
            WorkerCommands::Start { count } => {
                println!("{}", commands::worker_start(&app, count).await?);
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to listen for Ctrl-C")?;
                commands::worker_stop(&app).await?
            }
        },
        Commands::Script { path } => {
            let mut stdout = std::io::stdout();
            commands::script::run(&app, &path, &mut stdout).await?
        }
        Commands::Shell => {
            commands::shell::run(&app).await?;
            String::new()
        }
    };

    if !output.is_empty() {
        println!("{}", output.trim_end());
    }
    Ok(())
}
