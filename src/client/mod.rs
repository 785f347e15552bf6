//! Chat protocol client seam.
//!
//! The reconciler only needs three things from a connection: a way to ask
//! the server to join a channel, the identity the server knows us by, and
//! notifications when somebody joins or is kicked from a channel. Wire
//! framing, authentication and dispatch live behind this trait.

use std::sync::Arc;

pub mod loopback;

pub use loopback::{JoinRecord, LoopbackClient};

/// Callback for membership events: `(identity, channel)`.
pub type MembershipHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Connection used concurrently by every membership loop.
pub trait ProtocolClient: Send + Sync {
    /// Fire-and-forget join request.
    fn send_join(&self, channel: &str, password: &str);

    /// Identity used to recognise events about ourselves.
    fn local_identity(&self) -> String;

    /// Register a handler for JOIN notifications.
    fn on_join(&self, handler: MembershipHandler);

    /// Register a handler for KICK notifications.
    fn on_kick(&self, handler: MembershipHandler);
}
