//! CLI command definitions for the `rampart` binary.

pub mod config;
pub mod run;
pub mod tasks;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Compose resilient workflows from retried, rolled-back actions.
#[derive(Parser)]
#[command(name = "rampart", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to $RAMPART_CONFIG, then ~/.rampart/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the built-in release pipeline and report every recorded execution.
    Run {
        /// Make the deploy step fail, triggering rollback.
        #[arg(long)]
        fail: bool,

        /// Cancel the pipeline after this many seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Run worker tasks in-process instead of in worker processes.
        #[arg(long)]
        local: bool,
    },

    /// Print the effective configuration.
    Config,

    /// List the tasks a worker process can run.
    Tasks,

    /// Serve worker requests on stdin/stdout.
    #[command(hide = true)]
    Worker,
}
