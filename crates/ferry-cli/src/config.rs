//! Configuration file parsing for ferry.toml.

use ferry::InterpreterConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Settings passed to every interpreter the CLI creates
    #[serde(default)]
    pub interpreter: InterpreterConfig,

    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG` and `--log-level`
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "warn".into()
}

/// Load configuration from a file or search for a default config file.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = path.map(PathBuf::from).or_else(find_config_file);

    match config_path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            Ok(config)
        }
        Some(path) => Err(anyhow::anyhow!("Config file {} not found", path.display())),
        None => Ok(Config::default()),
    }
}

/// Search for ferry.toml in the current directory and parent directories.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    cwd.ancestors()
        .map(|dir| dir.join("ferry.toml"))
        .find(|path| path.exists())
}
