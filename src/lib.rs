//! # Livewire
//!
//! `livewire` is the real-time delivery core of a chat system: it moves
//! messages published on per-recipient channels to whichever WebSocket
//! session the recipient currently holds, suppresses duplicates, and
//! republishes stored messages that were missed while the recipient was away.
//!
//! ## Core Modules
//!
//! - `broker`: Channel fan-out with confirmed subscriptions, plus the message payloads.
//! - `subscription`: One listener task per recipient, replaced and torn down safely.
//! - `session`: The outbound half of a client connection.
//! - `hub`: The recipient → session registry, dedup record and dispatch.
//! - `persistence`: A sled-backed store of delivered and undelivered messages.
//! - `recovery`: The reconciler that republishes undelivered messages on reconnect.
//! - `producer`: Persists and publishes chat messages sent by clients.
//! - `transport`: The WebSocket server.
//! - `app`: Builds all of the above from `config::Settings`.
//! - `config`, `utils`: Configuration loading, errors and logging.

pub mod app;
pub mod broker;
pub mod config;
pub mod hub;
pub mod persistence;
pub mod producer;
pub mod recovery;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod utils;
