//! The `persistence` module holds the durable copy of every chat message and
//! its delivery status.
//!
//! The fan-out layer itself is volatile: a message that found no live
//! session is simply dropped there. What survives is the record written here,
//! which the recovery reconciler later re-publishes while it is still marked
//! undelivered.
//!
//! It uses `sled` as an embedded key-value store.

pub mod sled_store;

pub use sled_store::{DeliveryStatus, SledStore, StoredMessage, UndeliveredSource};
