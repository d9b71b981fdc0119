//! Error types reported by the delivery subsystem.
//!
//! Routine absence (nobody listening, no live session, a duplicate message) is
//! never an error here; those cases are successful outcomes of the operation.
//! What remains are transport failures, malformed data and lifecycle misuse.

use thiserror::Error;

/// Failures of the fan-out broker connection.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection is closed")]
    Closed,

    #[error("subscription handshake on channel {0} was aborted")]
    HandshakeAborted(String),
}

/// Failures writing to a live client session. Any of these means the session
/// is presumed dead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {0} is closed")]
    Closed(String),

    #[error("payload is not valid UTF-8")]
    NotUtf8,
}

/// Failures of a single `Hub::dispatch` call.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("failed to write to session of {recipient}: {source}")]
    SessionWrite {
        recipient: String,
        #[source]
        source: SessionError,
    },
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("subscription manager has been shut down")]
    ShutDown,

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Failures of the durable message store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
