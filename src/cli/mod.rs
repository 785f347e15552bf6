//! CLI module for joinkeeper - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
