//! taskmill: polling task scheduler
//!
//! Main binary with subcommands:
//! - `daemon`: Run a scheduler node until interrupted
//! - `print-config`: Print the effective configuration as JSON

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, WrapErr};
use taskmill_scheduler::TaskManagerConfig;
use taskmill_store::Interval;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;

#[derive(Parser)]
#[command(name = "taskmill")]
#[command(about = "Polling task scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every subcommand that builds a configuration.
#[derive(clap::Args)]
struct ConfigArgs {
    /// JSON configuration file; flags below override its values
    #[arg(long, env = "TASKMILL_CONFIG")]
    config: Option<PathBuf>,

    /// Unique id of this scheduler node
    #[arg(long, env = "TASKMILL_NODE_ID")]
    node_id: Option<String>,

    /// Maximum number of concurrently running tasks
    #[arg(long, env = "TASKMILL_MAX_WORKERS")]
    max_workers: Option<usize>,

    /// How often to poll for due tasks (e.g. "3s")
    #[arg(long, env = "TASKMILL_POLL_INTERVAL")]
    poll_interval: Option<Interval>,

    /// Attempts before a failing task is marked failed
    #[arg(long, env = "TASKMILL_MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    /// Store namespace
    #[arg(long, env = "TASKMILL_INDEX")]
    index: Option<String>,
}

impl ConfigArgs {
    fn load(self) -> Result<TaskManagerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to read {}", path.display()))?;
                TaskManagerConfig::from_json(&json).into_diagnostic()?
            }
            None => TaskManagerConfig::default(),
        };

        if let Some(node_id) = self.node_id {
            config.node_id = Some(node_id);
        }
        if let Some(max_workers) = self.max_workers {
            config.max_workers = max_workers;
        }
        if let Some(poll_interval) = self.poll_interval {
            config.poll_interval = poll_interval;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(index) = self.index {
            config.index = index;
        }

        config.validate().into_diagnostic()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scheduler node until interrupted
    Daemon {
        #[command(flatten)]
        config: ConfigArgs,

        /// Interval of the built-in heartbeat task (e.g. "30s")
        #[arg(long, env = "TASKMILL_HEARTBEAT", default_value = "30s")]
        heartbeat: String,
    },

    /// Print the effective configuration as JSON
    PrintConfig {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "taskmill=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon { config, heartbeat } => daemon::run(config.load()?, &heartbeat).await,

        Commands::PrintConfig { config } => {
            let config = config.load()?;
            let json = serde_json::to_string_pretty(&config).into_diagnostic()?;
            println!("{json}");
            Ok(())
        }
    }
}
