//! CLI command definitions using clap.
//!
//! - channels: list the configured channels
//! - validate: check the configuration
//! - simulate: run the reconciler against an in-process chat server

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// joinkeeper - keep chat channels joined
#[derive(Parser, Debug)]
#[command(name = "joinkeeper")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List configured channels
    Channels,

    /// Load and validate the configuration
    Validate,

    /// Run the reconciler against a simulated chat server
    Simulate {
        /// Channels the simulated server never confirms
        #[arg(short, long)]
        silent: Vec<String>,

        /// Extra channels to request after startup
        #[arg(short, long)]
        join: Vec<String>,

        /// Kick us from the first channel after this many seconds
        #[arg(short, long)]
        kick_after: Option<u64>,

        /// Stop after this many seconds
        #[arg(short, long, default_value_t = 30)]
        duration: u64,

        /// Simulated confirmation latency in milliseconds
        #[arg(short, long, default_value_t = 200)]
        latency_ms: u64,
    },
}
