//! Error types for joinkeeper
//!
//! The reconciliation core never fails: an unconfirmed join is retried, not
//! reported. Errors only come from configuration.

use thiserror::Error;

/// Configuration problems detected by `Config::validate`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No local identity configured
    #[error("nick must not be empty")]
    EmptyNick,

    /// A desired channel entry has no name
    #[error("channel #{0} in the channel list has an empty name")]
    EmptyChannelName(usize),

    /// The same channel is listed twice
    #[error("channel {0} is listed more than once")]
    DuplicateChannel(String),

    /// The join confirmation window is zero
    #[error("join.wait-secs must be > 0")]
    ZeroJoinWait,

    /// Backoff bounds are zero or inverted
    #[error("invalid backoff: {0}")]
    InvalidBackoff(String),
}

/// Result type alias for configuration checks
pub type Result<T> = std::result::Result<T, ConfigError>;
