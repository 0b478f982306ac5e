//! CLI argument parsing and command dispatch.

pub mod args;
pub mod commands;

use anyhow::Result;
use args::{Cli, Commands};
use clap::Parser;
use std::process::ExitCode;

use crate::config::Config;
use crate::logging;

/// Run the CLI application.
pub async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.no_color);
    if cli.no_color {
        colored::control::set_override(false);
    }

    // Load configuration
    let config = Config::load(cli.config.as_deref())?;

    // Determine output format: flag, then config file, then pretty
    let output_format = cli.output.or(config.output_format).unwrap_or_default();

    // Create context for commands
    let ctx = commands::Context {
        explain: cli.explain || config.explain_by_default,
        config,
        config_path: cli.config,
        output_format,
        verbose: cli.verbose,
        no_color: cli.no_color,
    };

    // Dispatch to appropriate command
    match cli.command {
        Commands::Provision(args) => commands::provision::execute(ctx, args).await,
        Commands::Inspect(args) => commands::inspect::execute(ctx, args).await,
        Commands::Config(args) => commands::config::execute(ctx, args),
    }
}
