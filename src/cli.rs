//! Command-line interface for asrpool
//!
//! Provides argument parsing using clap derive macros.

use crate::session::ListeningMode;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Continuous speech recognition over a pool of decoders
#[derive(Parser, Debug)]
#[command(
    name = "asrpool",
    version = crate::version_string(),
    about = "Continuous speech recognition over a pool of decoders"
)]
pub struct Cli {
    /// Subcommand to execute (default: listen)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Recognize speech from a device or file, reading control commands from stdin
    Listen(ListenArgs),

    /// List audio input devices
    Devices,

    /// Show configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct ListenArgs {
    /// Audio input device (e.g., hw:0)
    #[arg(long, value_name = "DEVICE", conflicts_with = "file")]
    pub device: Option<String>,

    /// Recognize a WAV or raw 16-bit PCM file instead of a device
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Listening mode
    #[arg(long, value_name = "MODE", value_parser = parse_mode)]
    pub mode: Option<ListeningMode>,

    /// Number of decoders in the pool
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub decoders: Option<u16>,

    /// Also record captured audio to a WAV file
    #[arg(long, value_name = "PATH")]
    pub record: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

fn parse_mode(s: &str) -> Result<ListeningMode, String> {
    s.parse().map_err(|e: crate::error::AsrError| e.to_string())
}
