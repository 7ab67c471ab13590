//! Available subcommands.

use std::path::PathBuf;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// List configured servers and whether their configuration is valid
    Servers,

    /// Connect to every enabled server and list the discovered tools
    Tools,

    /// Call one tool directly
    Call {
        /// ID of the server that owns the tool
        server_id: i64,
        /// Tool name as reported by the server
        tool: String,
        /// Arguments as a JSON object
        #[arg(short, long)]
        args: Option<String>,
    },

    /// Replay a recorded chat-completion stream and execute its tool calls
    Replay {
        /// File holding the raw SSE body of one assistant turn
        file: PathBuf,
        /// Run all calls concurrently instead of one at a time
        #[arg(long)]
        run_all: bool,
        /// Complete the batch explicitly instead of after the settle delay
        #[arg(long)]
        no_auto_complete: bool,
    },
}
