//! The `transport` module is responsible for handling network communication
//! with clients via WebSockets.
//!
//! It defines the JSON frames exchanged with clients and implements the
//! server: authentication, session registration with the hub, reconciliation
//! on connect and forwarding of chat and ack frames to the producer.

pub mod message;
pub mod websocket;

pub use message::{AuthStatus, ClientMessage, ServerMessage};
pub use websocket::{serve, start_websocket_server};
