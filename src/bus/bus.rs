//! Message bus - local dispatch plus broadcast through a broker.

use std::sync::{Arc, Mutex};

use super::broker::{Broker, SubscriptionId};
use crate::aggregate::Change;
use crate::dispatcher::{Dispatcher, Handlers};
use crate::error::BrokerError;
use crate::message::{AnyMessage, Message};

/// Message bus - wraps a dispatcher and a broker subscription.
///
/// Publishing dispatches to this bus's own handlers first, synchronously, then
/// hands the message to the broker for every other subscriber. Messages the
/// broker delivers from other buses are dispatched to the same handlers.
///
/// ## Example
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use serde::{Deserialize, Serialize};
/// use sourced_dispatch::bus::{Bus, InProcessBroker};
/// use sourced_dispatch::Message;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct UserCreated { name: String }
/// impl Message for UserCreated {}
///
/// let broker = Arc::new(InProcessBroker::new());
/// let users = Bus::new(Arc::clone(&broker)).unwrap();
/// let audit = Bus::new(Arc::clone(&broker)).unwrap();
///
/// let log = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&log);
/// audit.add_global_handler(move |m| sink.lock().unwrap().push(m.type_tag()));
///
/// users.publish(&UserCreated { name: "John".into() }).unwrap();
/// assert_eq!(*log.lock().unwrap(), vec!["UserCreated"]);
/// ```
pub struct Bus<B: Broker> {
    dispatcher: Dispatcher,
    broker: Arc<B>,
    subscription: SubscriptionId,
    closed: bool,
}

impl<B: Broker> Bus<B> {
    /// Create a bus with an empty dispatcher and subscribe it to `broker`.
    pub fn new(broker: Arc<B>) -> Result<Self, BrokerError> {
        Self::with_dispatcher(Dispatcher::new(), broker)
    }

    /// Create a bus around an existing dispatcher.
    pub fn with_dispatcher(dispatcher: Dispatcher, broker: Arc<B>) -> Result<Self, BrokerError> {
        let subscription = broker.subscribe(dispatcher.clone())?;
        Ok(Self {
            dispatcher,
            broker,
            subscription,
            closed: false,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription
    }

    pub fn register_handler<M, F>(&self, handler: F)
    where
        M: Message,
        F: Fn(&M) + Send + Sync + 'static,
    {
        self.dispatcher.register_handler(handler);
    }

    pub fn register_handlers<O>(&self, owner: Arc<Mutex<O>>)
    where
        O: Handlers + Send,
    {
        self.dispatcher.register_handlers(owner);
    }

    /// Accept remote messages of type `M` even with no handler bound to it.
    pub fn register_message<M: Message>(&self) {
        self.dispatcher.register_message::<M>();
    }

    pub fn add_global_handler<F>(&self, handler: F)
    where
        F: Fn(&dyn AnyMessage) + Send + Sync + 'static,
    {
        self.dispatcher.add_global_handler(handler);
    }

    /// Dispatch `message` to this bus's handlers, then broadcast it.
    ///
    /// Local handlers have all returned before the broker is called. A broker
    /// failure is returned after local dispatch has already happened.
    pub fn publish(&self, message: &dyn AnyMessage) -> Result<(), BrokerError> {
        tracing::debug!(
            message_type = message.type_tag(),
            subscription = %self.subscription,
            "publishing message"
        );
        self.dispatcher.dispatch(message);
        self.broker.broadcast(self.subscription, message)
    }

    /// Publish each message in order, stopping at the first broker failure.
    pub fn publish_all<'a, I>(&self, messages: I) -> Result<(), BrokerError>
    where
        I: IntoIterator<Item = &'a dyn AnyMessage>,
    {
        for message in messages {
            self.publish(message)?;
        }
        Ok(())
    }

    /// Publish an aggregate's pending changes in the order they were sourced.
    pub fn publish_changes(&self, changes: &[Change]) -> Result<(), BrokerError> {
        self.publish_all(changes.iter().map(Change::message))
    }

    /// Unsubscribe from the broker and release its resources for this bus.
    pub fn close(mut self) -> Result<(), BrokerError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), BrokerError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.broker.unsubscribe(self.subscription)
    }
}

impl<B: Broker> Drop for Bus<B> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, subscription = %self.subscription, "failed to close bus");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBroker;
    use crate::error::TransportError;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct UserCreated {
        name: String,
    }

    crate::impl_message!(UserCreated);

    /// Records call order across the local dispatch and the broker.
    #[derive(Default)]
    struct Spy {
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Broker for Spy {
        fn subscribe(&self, _dispatcher: Dispatcher) -> Result<SubscriptionId, BrokerError> {
            Ok(SubscriptionId::from(1))
        }

        fn unsubscribe(&self, id: SubscriptionId) -> Result<(), BrokerError> {
            self.calls.lock().unwrap().push(format!("unsubscribe:{id}"));
            Ok(())
        }

        fn broadcast(&self, from: SubscriptionId, message: &dyn AnyMessage) -> Result<(), BrokerError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("broadcast:{from}:{}", message.type_tag()));
            if self.fail {
                return Err(TransportError::ConnectionFailed("down".into()).into());
            }
            Ok(())
        }
    }

    #[test]
    fn local_handlers_run_before_broadcast() {
        let spy = Arc::new(Spy::default());
        let bus = Bus::new(Arc::clone(&spy)).unwrap();

        let calls = Arc::clone(&spy.calls);
        bus.register_handler(move |e: &UserCreated| calls.lock().unwrap().push(format!("handler:{}", e.name)));
        let calls = Arc::clone(&spy.calls);
        bus.add_global_handler(move |_| calls.lock().unwrap().push("global".into()));

        bus.publish(&UserCreated { name: "John".into() }).unwrap();

        assert_eq!(
            *spy.calls.lock().unwrap(),
            vec!["handler:John", "global", "broadcast:#1:UserCreated"]
        );
    }

    #[test]
    fn broker_failure_is_returned_after_local_dispatch() {
        let spy = Arc::new(Spy {
            fail: true,
            ..Spy::default()
        });
        let bus = Bus::new(Arc::clone(&spy)).unwrap();
        let calls = Arc::clone(&spy.calls);
        bus.register_handler(move |_: &UserCreated| calls.lock().unwrap().push("handler".into()));

        let first = UserCreated { name: "a".into() };
        let second = UserCreated { name: "b".into() };
        let result = bus.publish_all([&first as &dyn AnyMessage, &second]);

        assert!(matches!(result, Err(BrokerError::Transport(_))));
        assert_eq!(
            *spy.calls.lock().unwrap(),
            vec!["handler", "broadcast:#1:UserCreated"]
        );
    }

    #[test]
    fn close_unsubscribes_once() {
        let spy = Arc::new(Spy::default());
        let bus = Bus::new(Arc::clone(&spy)).unwrap();
        bus.close().unwrap();

        assert_eq!(*spy.calls.lock().unwrap(), vec!["unsubscribe:#1"]);
    }

    #[test]
    fn drop_unsubscribes() {
        let broker = Arc::new(InProcessBroker::new());
        {
            let _bus = Bus::new(Arc::clone(&broker)).unwrap();
            assert_eq!(broker.subscriber_count(), 1);
        }
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[test]
    fn shared_dispatcher() {
        let broker = Arc::new(InProcessBroker::new());
        let dispatcher = Dispatcher::new();
        dispatcher.register_message::<UserCreated>();

        let bus = Bus::with_dispatcher(dispatcher.clone(), broker).unwrap();
        assert_eq!(bus.dispatcher().message_types(), vec!["UserCreated"]);
        bus.register_handler(|_: &UserCreated| {});
        assert_eq!(dispatcher.handler_count::<UserCreated>(), 1);
    }
}
