//! flood: load test JSON-RPC nodes with vegeta.
//!
//! `flood <test> [nodes...]` runs a load test; the subcommands inspect the
//! installation and saved runs.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::GlobalOptions;

/// Load test JSON-RPC nodes with vegeta
#[derive(Parser)]
#[command(name = "flood")]
#[command(about = "Load test JSON-RPC nodes with vegeta", long_about = None)]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: commands::run::RunArgs,

    /// Path to config file (default: auto-discover .flood/config.toml)
    #[arg(long, global = true, env = "FLOOD_CONFIG")]
    config: Option<PathBuf>,

    /// Path or name of the vegeta binary (overrides config)
    #[arg(long, global = true, env = "FLOOD_VEGETA")]
    vegeta: Option<String>,

    /// Log debug output to stderr
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the flood version and the vegeta binary in use
    Version {
        /// Print as JSON, as read by orchestrating hosts
        #[arg(long)]
        json: bool,
    },

    /// List the built-in load tests
    Ls,

    /// Print the summary of a saved run
    Print {
        /// Run directory or results.json
        path: PathBuf,

        /// Accept results written by another flood version
        #[arg(long)]
        allow_other_versions: bool,

        /// Metrics to show, comma separated
        #[arg(long, value_delimiter = ',')]
        metrics: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    execute_command(cli)
}

fn execute_command(cli: Cli) -> Result<()> {
    let globals = GlobalOptions {
        config: cli.config,
        vegeta: cli.vegeta,
    };
    let color = commands::stdout_color();
    match cli.command {
        Some(Commands::Version { json }) => {
            commands::version::execute(&globals, json)?;
        },
        Some(Commands::Ls) => {
            commands::ls::execute(color)?;
        },
        Some(Commands::Print {
            path,
            allow_other_versions,
            metrics,
        }) => {
            commands::print::execute(&path, allow_other_versions, metrics, color)?;
        },
        None => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::run::execute(cli.run, globals, color))?;
        },
    }
    Ok(())
}
