//! The `broker` module is the channel fan-out layer: a publish/subscribe
//! primitive keyed by recipient identity. It decouples producers from the
//! subscription listeners and carries no business logic.

pub mod channel;
pub mod engine;
pub mod message;

pub use channel::{MessageStream, PendingSubscription, SubscriptionHandle, channel_for};
pub use engine::{Broker, InMemoryBroker};
