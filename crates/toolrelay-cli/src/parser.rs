//! Main CLI parser and top-level argument handling.

use std::path::PathBuf;

use clap::Parser;

use crate::commands::Commands;

/// Relay tool calls between a model and MCP tool servers.
#[derive(Parser)]
#[command(name = "toolrelay")]
#[command(about = "Connect to MCP tool servers and run model tool calls")]
#[command(version)]
pub struct Cli {
    /// Configuration file with servers and settings
    #[arg(
        short,
        long,
        global = true,
        env = "TOOLRELAY_CONFIG",
        default_value = "toolrelay.json"
    )]
    pub config: PathBuf,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}
