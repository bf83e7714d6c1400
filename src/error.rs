use thiserror::Error;

use crate::bus::SubscriptionId;

/// Failure turning a message into an envelope or an envelope into bytes (and back).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("binary codec failed: {0}")]
    Binary(String),
    #[error("envelope carries `{actual}`, expected `{expected}`")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },
}

/// Failure resolving an envelope to a concrete message through a dispatcher's type table.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no message type registered under `{0}`")]
    UnknownType(String),
    #[error("payload for `{message_type}` does not decode: {source}")]
    Malformed {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Failure of the external pub/sub substrate.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("channel `{0}` is closed")]
    Closed(String),
    #[error("transport error: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),
    #[error("failed to start receive loop: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Failure rebuilding an aggregate from its history.
#[derive(Debug, Error)]
#[error("replay failed at history position {position}: {source}")]
pub struct ReplayError {
    pub position: usize,
    #[source]
    pub source: DecodeError,
}
