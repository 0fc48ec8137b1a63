//! SAR CLI - Main Entry Point
//!
//! Launches an app, drives it through a scripted scenario and collects
//! numbered screenshots.

use clap::{Parser, Subcommand};

use sar_cli::commands::{list_steps, run, validate, ConfigArgs};

/// Screenshot automation runner
#[derive(Parser)]
#[command(name = "sar")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the app and run the scenario
    Run(run::RunArgs),

    /// Check a config without running it
    Validate(ConfigArgs),

    /// Print the scenario's steps in order
    ListSteps(list_steps::ListStepsArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let code = match cli.command {
        Commands::Run(args) => run::execute(args, cli.verbose).await,
        Commands::Validate(args) => validate::execute(args),
        Commands::ListSteps(args) => list_steps::execute(args),
    };

    std::process::exit(code.code());
}
