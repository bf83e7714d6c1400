//! Broker contract shared by the in-process and pub/sub transports.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dispatcher::Dispatcher;
use crate::error::BrokerError;
use crate::message::AnyMessage;

/// Handle for one subscriber of a broker.
///
/// Ids are never handed out twice by the same broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for SubscriptionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id source, starting at 1.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionIds(AtomicU64);

impl SubscriptionIds {
    pub(crate) fn next(&self) -> SubscriptionId {
        SubscriptionId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Transport that delivers published messages to the other subscribers.
///
/// Implementations:
/// - [`InProcessBroker`](super::InProcessBroker) - synchronous fan-out inside one process
/// - [`PubSubBroker`](super::PubSubBroker) - envelopes over a named pub/sub channel
pub trait Broker: Send + Sync {
    /// Register a dispatcher to receive messages broadcast by other subscribers.
    fn subscribe(&self, dispatcher: Dispatcher) -> Result<SubscriptionId, BrokerError>;

    /// Stop delivering to `id` and release whatever the subscription holds.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError>;

    /// Deliver `message` to every subscriber except `from`, which has already
    /// dispatched it locally.
    fn broadcast(&self, from: SubscriptionId, message: &dyn AnyMessage) -> Result<(), BrokerError>;
}
