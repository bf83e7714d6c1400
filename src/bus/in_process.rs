//! In-process broker for tests and single-process applications.

use std::sync::{Arc, PoisonError, RwLock};

use super::broker::{Broker, SubscriptionId, SubscriptionIds};
use crate::dispatcher::Dispatcher;
use crate::error::BrokerError;
use crate::message::AnyMessage;

/// Broker that fans messages out to the other dispatchers of this process.
///
/// - Thread-safe; clones share the same subscriber list
/// - Delivery is synchronous, in subscription order
/// - The sending subscriber is skipped, it has already dispatched locally
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use sourced_dispatch::bus::{Bus, InProcessBroker};
///
/// let broker = Arc::new(InProcessBroker::new());
/// let orders = Bus::new(Arc::clone(&broker)).unwrap();
/// let billing = Bus::new(Arc::clone(&broker)).unwrap();
///
/// assert_eq!(broker.subscriber_count(), 2);
/// # drop((orders, billing));
/// ```
#[derive(Clone, Default)]
pub struct InProcessBroker {
    subscribers: Arc<RwLock<Vec<(SubscriptionId, Dispatcher)>>>,
    ids: Arc<SubscriptionIds>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Broker for InProcessBroker {
    fn subscribe(&self, dispatcher: Dispatcher) -> Result<SubscriptionId, BrokerError> {
        let id = self.ids.next();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, dispatcher));
        tracing::debug!(subscription = %id, "subscribed to in-process broker");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError> {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let position = subscribers
            .iter()
            .position(|(subscriber, _)| *subscriber == id)
            .ok_or(BrokerError::UnknownSubscription(id))?;
        subscribers.remove(position);
        tracing::debug!(subscription = %id, "unsubscribed from in-process broker");
        Ok(())
    }

    fn broadcast(&self, from: SubscriptionId, message: &dyn AnyMessage) -> Result<(), BrokerError> {
        let targets: Vec<Dispatcher> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, _)| *id != from)
            .map(|(_, dispatcher)| dispatcher.clone())
            .collect();

        for dispatcher in &targets {
            dispatcher.dispatch(message);
        }
        Ok(())
    }
}
