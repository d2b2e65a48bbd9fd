//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// dashsync - shared dashboard state synchronization
#[derive(Parser)]
#[command(
    name = "ds",
    about = "Stream dashboard state and task progress to consumer replicas",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a producer and consumer replicas through a simulated workload
    Demo {
        /// Number of tasks to run
        #[arg(short, long, default_value_t = 3)]
        tasks: usize,

        /// Number of consumer replicas sharing the durable cache
        #[arg(short, long, default_value_t = 2)]
        replicas: usize,

        /// Delay between step updates in milliseconds
        #[arg(long, default_value_t = 150)]
        step_delay_ms: u64,
    },

    /// Show the durable cache for the configured namespace
    Inspect {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Remove the durable cache for the configured namespace
    Clear,

    /// Print the effective configuration
    Config,
}

/// Output format for inspect
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text, json", s)),
        }
    }
}

/// Location of the CLI log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dashsync")
        .join("logs")
        .join("dashsync.log")
}
