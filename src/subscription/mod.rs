//! The `subscription` module owns the one live broker subscription each
//! recipient may have, and the listener task that drains it.

pub mod listener;
pub mod manager;

pub use listener::MessageHandler;
pub use manager::{Confirmation, Readiness, SubscriptionManager};

#[cfg(test)]
mod tests;
