//! GameQA CLI - Main Entry Point
//!
//! Runs playability tests against browser games and browses the stored
//! reports.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

use commands::{config, jobs, run};

/// GameQA - automated playability testing for browser games
#[derive(Parser)]
#[command(name = "gameqa")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "GAMEQA_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test one or more game URLs
    Run(run::RunArgs),

    /// Browse stored reports
    #[command(subcommand)]
    Jobs(jobs::JobsCommands),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config_path = cli.config.unwrap_or_else(gameqa_common::default_config_path);
    // A broken file must not block regenerating it
    let qa_config = match &cli.command {
        Commands::Config(config::ConfigCommands::Init { .. }) => gameqa_common::QaConfig::default(),
        _ => gameqa_common::QaConfig::load(&config_path)?,
    };

    match cli.command {
        Commands::Run(args) => {
            if !run::execute(args, qa_config, cli.format).await? {
                std::process::exit(1);
            }
        }
        Commands::Jobs(cmd) => jobs::execute(cmd, &qa_config, cli.format).await?,
        Commands::Config(cmd) => config::execute(cmd, &config_path, &qa_config, cli.format)?,
        Commands::Version => {
            println!("GameQA CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
        }
    }

    Ok(())
}
