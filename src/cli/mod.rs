//! CLI module for the deployment reconciler.
//!
//! Argument definitions live in `commands`, rendering in `output`.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, ManageCommands, OutputFormat};
pub use output::OutputFormatter;
