//! Run command - execute a JavaScript file.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::debug;

use crate::config::Config;

#[derive(Args)]
pub struct RunCommand {
    /// File to execute
    pub entry: PathBuf,

    /// Skip the separate parse step
    #[arg(long = "no-check")]
    pub no_check: bool,

    /// Print the script's completion value
    #[arg(long)]
    pub print_result: bool,
}

impl RunCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let source = std::fs::read_to_string(&self.entry)
            .with_context(|| format!("Failed to read {}", self.entry.display()))?;

        let mut interpreter_config = config
            .interpreter
            .clone()
            .with_source_url(self.entry.display().to_string());
        if self.no_check {
            interpreter_config = interpreter_config.with_check_syntax(false);
        }

        debug!(entry = %self.entry.display(), bytes = source.len(), "running script");
        let interp = super::interpreter(interpreter_config)?;
        let value = interp.evaluate(&source)?;

        if self.print_result {
            println!("{}", super::render(&value));
        }
        Ok(())
    }
}
