use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;

use commands::{eval::EvalCommand, run::RunCommand};

#[derive(Parser)]
#[command(name = "ferry", version, about = "Evaluate JavaScript through JavaScriptCore")]
struct Cli {
    /// Path to a ferry.toml (default: search the working directory and its parents)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. "debug" or "ferry=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script file
    Run(RunCommand),
    /// Evaluate source text and print the result as JSON
    Eval(EvalCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    match cli.command {
        Commands::Run(cmd) => cmd.run(&config),
        Commands::Eval(cmd) => cmd.run(&config),
    }
}
