//! Configuration system for joinkeeper.
//!
//! A single YAML file names our identity, the channels to keep joined, and
//! the retry timing. Every field has a default, so an empty file is valid.

pub use self::global::{BackoffConfig, Config, JoinConfig};

mod global;

/// Default identity when none is configured.
pub const DEFAULT_NICK: &str = "joinkeeper";

/// Project-local config file name.
pub const PROJECT_CONFIG_FILE: &str = ".joinkeeper.yml";
