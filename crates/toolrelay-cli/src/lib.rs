#![deny(unsafe_code)]
//! Command-line front end for toolrelay.
//!
//! `main.rs` parses arguments and dispatches; everything else lives here so
//! handlers can be driven from tests.

pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod error;
pub mod handlers;
pub mod parser;
pub mod presentation;

pub use bootstrap::{CliContext, bootstrap};
pub use commands::Commands;
pub use config::{FileConfigSource, RelayConfig};
pub use error::CliError;
pub use parser::Cli;
