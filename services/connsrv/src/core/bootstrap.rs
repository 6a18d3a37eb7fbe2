//! Command line arguments

use std::path::PathBuf;

use clap::Parser;

/// FastyBird device connector service
#[derive(Debug, Clone, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "CONNSRV_CONFIG", default_value = "config/connsrv.yaml")]
    pub config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Only validate configuration without starting connectors
    #[arg(long)]
    pub validate: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl Args {
    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        matches!(self.log_level.as_deref(), Some("debug" | "trace"))
    }
}
