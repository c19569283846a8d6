//! Command-line interface for mintai-voice
//!
//! Provides argument parsing using clap derive macros.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Spoken replies for dialect voice assistants
#[derive(Parser, Debug)]
#[command(
    name = "mintai-voice",
    version,
    about = "Spoken replies for dialect voice assistants"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Use built-in mock services instead of the configured HTTP endpoints
    #[arg(long, global = true)]
    pub mock: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Produce a spoken reply and print it as JSON
    Reply(ReplyArgs),

    /// Print the duration of a WAV file in seconds
    Probe {
        /// WAV file to inspect
        file: PathBuf,
    },

    /// Concatenate WAV files into one
    Merge {
        /// Output WAV file
        output: PathBuf,

        /// Input WAV files, in playback order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug)]
pub struct ReplyArgs {
    /// What the user typed
    #[arg(long, conflicts_with = "audio", required_unless_present = "audio")]
    pub text: Option<String>,

    /// Recording of what the user said
    #[arg(long, value_name = "FILE")]
    pub audio: Option<PathBuf>,

    /// Continue an existing conversation
    #[arg(long, value_name = "ID")]
    pub session: Option<String>,

    /// Print one JSON line per event instead of a single merged reply
    #[arg(long)]
    pub stream: bool,

    /// Skip subtitle cues
    #[arg(long)]
    pub no_subtitles: bool,

    /// Synthesis speaker
    #[arg(long)]
    pub speaker: Option<String>,

    /// Speaking rate (0.5 to 2.0)
    #[arg(long)]
    pub rate: Option<f32>,

    /// Recognition language
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default configuration file path
    Path,
}

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter(config_level: &str, verbose: u8) -> String {
    match verbose {
        0 => config_level.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}
