//! The `session` module defines the outbound half of a live client
//! connection, the only part of the transport the hub depends on.

pub mod client;

pub use client::ClientSession;

use crate::utils::error::SessionError;

/// A live outbound connection bound to one recipient.
///
/// `send` must not block for long; any error means the session is dead and
/// the registry is expected to remove it.
pub trait Session: Send + Sync {
    /// Unique per connection, so a stale connection can be told apart from
    /// the one that replaced it under the same recipient.
    fn id(&self) -> &str;

    fn send(&self, payload: &[u8]) -> Result<(), SessionError>;
}
