//! Typed message dispatch for event-sourced entities, with a bus that fans
//! published messages out to other components in-process or over pub/sub.

mod aggregate;
pub mod bus;
mod config;
mod dispatcher;
mod envelope;
mod error;
mod message;

pub use aggregate::{Aggregate, AggregateRoot, Change, Sourced};
pub use config::PubSubConfig;
pub use dispatcher::{Bindings, Dispatcher, Handlers, MessageType};
pub use envelope::{new_id, Envelope, WireFormat};
pub use error::{BrokerError, CodecError, DecodeError, ReplayError, TransportError};
pub use message::{AnyMessage, Message};

pub use bus::{
    Broker, Bus, InMemoryPubSub, InProcessBroker, PubSubBroker, ReceiveStats, SubscriptionId,
    Transport, TransportSubscription,
};
