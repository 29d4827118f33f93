//! Rampart CLI entry point.
//!
//! Binary name: `rampart`
//!
//! Parses CLI arguments, loads `config.toml`, installs the tracing
//! subscriber, then dispatches to the command handler. The hidden `worker`
//! command is what `ProcessAction` re-invokes in child processes.

mod cli;

use clap::Parser;
use rampart_infra::config::{load_engine_config, resolve_config_path};
use rampart_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(resolve_config_path);
    let config = load_engine_config(&config_path).await;

    let options = TracingOptions::from_verbosity(cli.verbose, cli.quiet)
        .with_otel(config.logging.otel && !matches!(cli.command, Commands::Worker));
    if let Err(err) = init_tracing(options) {
        eprintln!("Warning: failed to initialize tracing: {err}");
    }

    let result = match cli.command {
        Commands::Run {
            fail,
            timeout,
            local,
        } => {
            let options = cli::run::RunOptions {
                fail,
                timeout: timeout.map(std::time::Duration::from_secs),
                local,
            };
            cli::run::run(&config, options, cli.json).await
        }

        Commands::Config => cli::config::show(&config, &config_path, cli.json),

        Commands::Tasks => {
            cli::tasks::list(cli.json);
            Ok(())
        }

        Commands::Worker => rampart_infra::process::serve_stdio(&cli::tasks::worker_tasks()).await,
    };

    shutdown_tracing();
    result
}
