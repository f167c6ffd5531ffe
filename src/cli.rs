//! Command-line interface for dictflow.
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Offline push-to-talk dictation pipeline
#[derive(Parser, Debug)]
#[command(name = "dictflow", version, about = "Offline push-to-talk dictation pipeline")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe raw 16kHz mono s16le PCM from stdin to stdout
    Pipe {
        /// Re-transcribe the full input at the end and correct the output
        #[arg(long)]
        final_pass: bool,
    },
    /// Validate the configuration file and print the effective settings
    CheckConfig,
}

impl Cli {
    /// Resolved configuration path: flag first, then the default.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(dictflow::config::Config::default_path)
    }

    /// Tracing filter directive for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "dictflow=info",
            1 => "dictflow=debug",
            _ => "dictflow=trace",
        }
    }
}
