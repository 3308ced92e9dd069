//! Eval command - evaluate an expression and print the result.

use anyhow::Result;
use clap::Args;

use crate::config::Config;

#[derive(Args)]
pub struct EvalCommand {
    /// Source text to evaluate
    pub source: String,
}

impl EvalCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let interp = super::interpreter(config.interpreter.clone())?;
        let value = interp.evaluate(&self.source)?;
        println!("{}", super::render(&value));
        Ok(())
    }
}
