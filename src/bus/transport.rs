//! Contract for the external publish/subscribe substrate under [`PubSubBroker`](super::PubSubBroker).
//!
//! A substrate only moves opaque byte payloads over named channels. Redis
//! pub/sub, NATS subjects or a Kafka topic with per-consumer groups all fit:
//! implement [`Transport`] for the client and [`TransportSubscription`] for one
//! subscribed connection.

use std::time::Duration;

use crate::error::TransportError;

pub trait Transport: Send + Sync + 'static {
    /// Publish one payload to every current subscriber of `channel`.
    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Open a subscription that receives every payload published to `channel`
    /// from now on.
    fn subscribe(&self, channel: &str) -> Result<Box<dyn TransportSubscription>, TransportError>;
}

/// One subscribed connection, owned by a receive thread.
pub trait TransportSubscription: Send {
    /// Wait up to `timeout` for the next payload.
    ///
    /// `Ok(None)` means nothing arrived in time. Errors are treated as transient
    /// by the receive loop.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;
}
