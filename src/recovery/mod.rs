//! The `recovery` module re-publishes messages that never reached a live
//! session. It is triggered from outside, typically when a recipient
//! (re)connects.

pub mod reconciler;

pub use reconciler::{Outcome, ReconcileReport, Reconciler};
