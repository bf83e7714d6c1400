//! Message bus - local dispatch plus broadcast to other buses.
//!
//! A [`Bus`] owns a [`Dispatcher`](crate::Dispatcher) and one subscription on a
//! [`Broker`]. Publishing runs the bus's own handlers synchronously, then asks
//! the broker to deliver the message to every other subscriber.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Bus (per component)                       │
//! │  - Wraps Dispatcher + SubscriptionId                        │
//! │  - publish() = dispatch locally, then broadcast             │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Broker Trait                           │
//! │  subscribe(dispatcher) / unsubscribe(id)                    │
//! │  broadcast(from, message) - everyone except `from`          │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                    │
//!          ▼                                    ▼
//! ┌─────────────────┐          ┌─────────────────────────────────┐
//! │ InProcessBroker │          │ PubSubBroker<T: Transport>      │
//! │  (synchronous)  │          │  envelopes + receive loops      │
//! └─────────────────┘          └─────────────────────────────────┘
//!                                   │                  │
//!                                   ▼                  ▼
//!                          ┌────────────────┐  ┌────────────────────┐
//!                          │ InMemoryPubSub │  │ Redis / NATS / ... │
//!                          │   (included)   │  │     (external)     │
//!                          └────────────────┘  └────────────────────┘
//! ```
//!
//! ## Usage with Aggregates
//!
//! ```ignore
//! // 1. Source events on the aggregate
//! thing.create("1", "first thing")?;
//!
//! // 2. Publish the pending changes, then forget them
//! bus.publish_changes(thing.changes())?;
//! thing.clear_changes();
//! ```

mod broker;
#[allow(clippy::module_inception)]
mod bus;
mod in_memory_pubsub;
mod in_process;
mod pubsub;
mod receive_loop;
mod transport;

pub use broker::{Broker, SubscriptionId};
pub use bus::Bus;
pub use in_memory_pubsub::InMemoryPubSub;
pub use in_process::InProcessBroker;
pub use pubsub::PubSubBroker;
pub use receive_loop::ReceiveStats;
pub use transport::{Transport, TransportSubscription};
