//! In-memory pub/sub substrate for testing and single-process scenarios.
//!
//! This module provides a thread-safe channel hub that implements
//! [`Transport`], useful for:
//! - Unit and integration testing of [`PubSubBroker`](super::PubSubBroker) without a server
//! - Running several buses in one process over serialized envelopes
//! - Development and prototyping

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use super::transport::{Transport, TransportSubscription};
use crate::error::TransportError;

/// In-memory pub/sub hub.
///
/// Features:
/// - Thread-safe (can be shared across threads via `Clone`)
/// - Every subscriber of a channel receives every payload published after it subscribed,
///   including payloads from its own publisher
/// - Published payloads are kept in a log for inspection. The log is unbounded
///   unless [`with_log_limit`](Self::with_log_limit) caps it; long-running
///   processes should set a limit.
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use sourced_dispatch::bus::{InMemoryPubSub, Transport};
///
/// let hub = InMemoryPubSub::new();
/// let mut subscription = hub.subscribe("events").unwrap();
///
/// hub.publish("events", b"hello".to_vec()).unwrap();
///
/// let payload = subscription.receive(Duration::from_millis(100)).unwrap();
/// assert_eq!(payload.as_deref(), Some(&b"hello"[..]));
/// ```
#[derive(Clone, Default)]
pub struct InMemoryPubSub {
    channels: Arc<Mutex<HashMap<String, Vec<Outlet>>>>,
    log: Arc<RwLock<VecDeque<(String, Vec<u8>)>>>,
    log_limit: Option<usize>,
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the `limit` most recent payloads in the publish log.
    pub fn with_log_limit(mut self, limit: usize) -> Self {
        self.log_limit = Some(limit);
        self
    }

    /// Payloads published to `channel`, in order.
    pub fn published(&self, channel: &str) -> Vec<Vec<u8>> {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(name, _)| name == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Number of payloads in the publish log, across channels.
    pub fn len(&self) -> usize {
        self.log.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, |outlets| outlets.iter().filter(|o| o.is_live()).count())
    }

    /// Clear the publish log (useful for test cleanup).
    pub fn clear(&self) {
        self.log.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Hub side of one subscription.
struct Outlet {
    sender: Sender<Vec<u8>>,
    alive: Weak<()>,
}

impl Outlet {
    fn is_live(&self) -> bool {
        self.alive.strong_count() > 0
    }
}

impl Transport for InMemoryPubSub {
    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        {
            let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
            log.push_back((channel.to_string(), payload.clone()));
            if let Some(limit) = self.log_limit {
                while log.len() > limit {
                    log.pop_front();
                }
            }
        }

        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(outlets) = channels.get_mut(channel) {
            outlets.retain(|outlet| outlet.sender.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<Box<dyn TransportSubscription>, TransportError> {
        let (sender, receiver) = mpsc::channel();
        let alive = Arc::new(());
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.to_string())
            .or_default()
            .push(Outlet {
                sender,
                alive: Arc::downgrade(&alive),
            });
        Ok(Box::new(InMemorySubscription {
            channel: channel.to_string(),
            receiver,
            _alive: alive,
        }))
    }
}

struct InMemorySubscription {
    channel: String,
    receiver: Receiver<Vec<u8>>,
    _alive: Arc<()>,
}

impl TransportSubscription for InMemorySubscription {
    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(payload) => Ok(Some(payload)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed(self.channel.clone())),
        }
    }
}
