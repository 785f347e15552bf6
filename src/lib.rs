//! joinkeeper - keeps chat channel memberships converged
//!
//! Every tracked channel gets its own loop that joins it, waits for the
//! server to confirm, retries with backoff when it does not, and rejoins
//! whenever a kick removes us.

pub mod backoff;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod reconciler;

pub use channel::ChannelIdentity;
pub use error::{ConfigError, Result};
pub use reconciler::{ChannelReconciler, JoinDone, JoinRequest};
