//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG: &str = "rackwatch.json5";

/// Command-line arguments for the agent.
#[derive(Parser, Debug, Clone)]
#[command(name = "rackwatch-agent")]
#[command(about = "Store-and-forward temperature/humidity agent")]
#[command(version)]
pub struct AgentArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Control surface listen address (overrides config).
    #[arg(long)]
    pub listen: Option<String>,
}

impl AgentArgs {
    /// Parse CLI arguments from the process environment.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// The configuration file to load and whether it must exist.
    ///
    /// An explicit `--config` must exist; the default path is optional.
    pub fn config_path(&self) -> (PathBuf, bool) {
        match &self.config {
            Some(path) => (path.clone(), true),
            None => (PathBuf::from(DEFAULT_CONFIG), false),
        }
    }
}
