//! Broker over an external publish/subscribe channel.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::broker::{Broker, SubscriptionId, SubscriptionIds};
use super::receive_loop::{ReceiveLoop, ReceiveStats};
use super::transport::Transport;
use crate::config::PubSubConfig;
use crate::dispatcher::Dispatcher;
use crate::envelope::{new_id, Envelope};
use crate::error::BrokerError;
use crate::message::AnyMessage;

/// Broker that publishes envelopes to a named channel and runs a receive loop
/// per subscriber.
///
/// `broadcast` never calls handlers itself: every subscription, in this process
/// or another, gets the envelope back from the transport and dispatches it on
/// its own receive loop. Every envelope id starts with `{broker}/{subscription}/`,
/// and a subscription drops envelopes carrying its own prefix, so a bus sees what
/// it publishes exactly once, from its local dispatch.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use sourced_dispatch::bus::{Bus, InMemoryPubSub, PubSubBroker};
/// use sourced_dispatch::PubSubConfig;
///
/// let hub = InMemoryPubSub::new();
/// let broker = Arc::new(PubSubBroker::new(hub.clone(), PubSubConfig::new("orders")));
///
/// let bus = Bus::new(Arc::clone(&broker)).unwrap();
/// assert_eq!(broker.channel(), "orders");
/// bus.close().unwrap();
/// ```
pub struct PubSubBroker<T: Transport> {
    transport: T,
    config: PubSubConfig,
    instance: String,
    ids: SubscriptionIds,
    subscriptions: Mutex<HashMap<SubscriptionId, ReceiveLoop>>,
}

impl<T: Transport> PubSubBroker<T> {
    pub fn new(transport: T, config: PubSubConfig) -> Self {
        Self {
            transport,
            config,
            instance: new_id(),
            ids: SubscriptionIds::default(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    pub fn config(&self) -> &PubSubConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn subscription_count(&self) -> usize {
        self.lock_subscriptions().len()
    }

    /// Unsubscribe and return what the subscription's receive loop saw.
    pub fn unsubscribe_with_stats(&self, id: SubscriptionId) -> Result<ReceiveStats, BrokerError> {
        let receive_loop = self
            .lock_subscriptions()
            .remove(&id)
            .ok_or(BrokerError::UnknownSubscription(id))?;
        let stats = receive_loop.stop();
        tracing::info!(
            subscription = %id,
            channel = %self.config.channel,
            received = stats.received,
            dispatched = stats.dispatched,
            "unsubscribed from pub/sub channel"
        );
        Ok(stats)
    }

    /// Prefix of every envelope id broadcast on behalf of `id`.
    fn origin(&self, id: SubscriptionId) -> String {
        format!("{}/{}/", self.instance, id.get())
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, ReceiveLoop>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Transport> Broker for PubSubBroker<T> {
    fn subscribe(&self, dispatcher: Dispatcher) -> Result<SubscriptionId, BrokerError> {
        let id = self.ids.next();
        let connection = self.transport.subscribe(&self.config.channel)?;

        let receive_loop = ReceiveLoop::spawn(
            &format!("{}-{}", self.config.channel, id.get()),
            connection,
            dispatcher,
            self.origin(id),
            self.config.format,
            self.config.poll_interval(),
        )?;

        self.lock_subscriptions().insert(id, receive_loop);
        tracing::info!(subscription = %id, channel = %self.config.channel, "subscribed to pub/sub channel");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError> {
        self.unsubscribe_with_stats(id).map(|_| ())
    }

    fn broadcast(&self, from: SubscriptionId, message: &dyn AnyMessage) -> Result<(), BrokerError> {
        let mut envelope = Envelope::new(message)?;
        envelope.id = format!("{}{}", self.origin(from), envelope.id);
        let payload = envelope.to_bytes(self.config.format)?;
        self.transport.publish(&self.config.channel, payload)?;

        tracing::debug!(
            id = %envelope.id,
            message_type = %envelope.message_type,
            channel = %self.config.channel,
            "published envelope"
        );
        Ok(())
    }
}

impl<T: Transport> Drop for PubSubBroker<T> {
    fn drop(&mut self) {
        let subscriptions: Vec<_> = self.lock_subscriptions().drain().collect();
        for (_, receive_loop) in subscriptions {
            receive_loop.stop();
        }
    }
}
