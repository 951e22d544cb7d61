//! Command-line interface for powerline
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Staged processing of power monitor captures
#[derive(Parser, Debug)]
#[command(name = "powerline", version, about = "Staged processing of power monitor captures")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: stage lifecycle, -vv: every buffer)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Worker threads per parallel stage (overrides config)
    #[arg(long, global = true, value_name = "N")]
    pub workers: Option<usize>,

    /// Samples per buffer (overrides config)
    #[arg(long, short = 'c', global = true, value_name = "SAMPLES")]
    pub chunk_size: Option<usize>,

    /// Cancellation poll interval (overrides config). Examples: 50ms, 1s
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_poll_interval)]
    pub poll_interval: Option<Duration>,
}

/// Parse a poll interval string.
///
/// Supports any duration format accepted by `humantime`; a bare number is
/// taken as milliseconds.
fn parse_poll_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → milliseconds
    if let Ok(millis) = s.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a recorded capture (CSV of timestamp,value) through the assembly line
    Replay {
        /// Capture file to replay
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// The capture has no header row
        #[arg(long)]
        no_headers: bool,
    },

    /// Manage configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default configuration file path
    Path,
}
