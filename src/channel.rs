//! Channel identity - the name/password pair a membership loop converges on.

use serde::{Deserialize, Serialize};

/// A chat channel to keep joined.
///
/// Immutable once a loop has been created for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelIdentity {
    /// Channel name, including any protocol prefix (e.g. `#alerts`).
    pub name: String,

    /// Channel key; empty when the channel has none.
    pub password: String,
}

impl ChannelIdentity {
    /// Create a channel identity without a password.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: String::new(),
        }
    }

    /// Create a channel identity with a password.
    pub fn with_password(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
        }
    }

    /// Whether joining requires a key.
    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }
}
