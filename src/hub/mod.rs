//! The `hub` module is the connection registry and dispatch point: it maps
//! recipients to live sessions and delivers each channel payload to the right
//! one, suppressing duplicates of content messages.

pub mod dedup;
pub mod engine;

pub use dedup::DedupRecord;
pub use engine::{Delivery, Hub};

#[cfg(test)]
mod tests;
