//! Aggregate roots: entities whose state changes are recorded as messages.
//!
//! An entity embeds an [`AggregateRoot`] and declares its event handlers through
//! [`Handlers`]. [`Sourced::source`] applies an event to the entity and records it;
//! [`Sourced::replay`] applies a stored history without recording anything.
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use sourced_dispatch::{impl_aggregate, AggregateRoot, Bindings, Handlers, Message, Sourced};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Renamed { name: String }
//! impl Message for Renamed {}
//!
//! #[derive(Default)]
//! struct User { root: AggregateRoot<User>, name: String }
//!
//! impl User {
//!     fn renamed(&mut self, e: &Renamed) { self.name = e.name.clone(); }
//! }
//!
//! impl Handlers for User {
//!     fn handlers(on: &mut Bindings<Self>) { on.on(User::renamed); }
//! }
//!
//! impl_aggregate!(User, root);
//!
//! let mut user = User::default();
//! user.source(Renamed { name: "John".into() }).unwrap();
//! assert_eq!(user.name, "John");
//! assert_eq!(user.changes().len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::dispatcher::{Dispatcher, Handlers};
use crate::envelope::Envelope;
use crate::error::{CodecError, DecodeError, ReplayError};
use crate::message::{AnyMessage, Message};

/// One recorded change: the envelope as it will be persisted, plus the typed
/// message it was built from.
#[derive(Clone)]
pub struct Change {
    envelope: Envelope,
    message: Arc<dyn AnyMessage>,
}

impl Change {
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn message(&self) -> &dyn AnyMessage {
        self.message.as_ref()
    }

    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }
}

impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("id", &self.envelope.id)
            .field("type", &self.envelope.message_type)
            .field("message", &self.message)
            .finish()
    }
}

/// Change log and handler table owned by one entity.
pub struct AggregateRoot<A> {
    changes: Vec<Change>,
    dispatcher: Dispatcher<A>,
}

impl<A: Handlers> AggregateRoot<A> {
    /// Empty change log, dispatcher bound to every handler `A` declares.
    pub fn new() -> Self {
        Self {
            changes: Vec::new(),
            dispatcher: Dispatcher::for_owner(),
        }
    }

    /// New root whose history has already been replayed into `owner`.
    ///
    /// The replayed envelopes are not recorded as changes.
    pub fn from_history(owner: &mut A, history: &[Envelope]) -> Result<Self, ReplayError> {
        let root = Self::new();
        root.replay_into(owner, history)?;
        Ok(root)
    }
}

impl<A: 'static> AggregateRoot<A> {
    /// Changes in the order they were sourced.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Forget recorded changes. Called once they have been durably published.
    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }

    pub fn dispatcher(&self) -> &Dispatcher<A> {
        &self.dispatcher
    }

    /// Apply each envelope of `history` to `owner`, in order.
    ///
    /// Envelopes tagged with a type `A` does not handle are skipped.
    pub fn replay_into(&self, owner: &mut A, history: &[Envelope]) -> Result<(), ReplayError> {
        replay_with(&self.dispatcher, owner, history)
    }

    fn record(&mut self, envelope: Envelope, message: Arc<dyn AnyMessage>) {
        self.changes.push(Change { envelope, message });
    }
}

fn replay_with<A: 'static>(
    dispatcher: &Dispatcher<A>,
    owner: &mut A,
    history: &[Envelope],
) -> Result<(), ReplayError> {
    for (position, envelope) in history.iter().enumerate() {
        let message = match dispatcher.decode(envelope) {
            Ok(message) => message,
            Err(DecodeError::UnknownType(message_type)) => {
                tracing::debug!(%message_type, position, "skipping unhandled history event");
                continue;
            }
            Err(source) => return Err(ReplayError { position, source }),
        };
        dispatcher.dispatch_to(owner, message.as_ref());
    }
    tracing::debug!(events = history.len(), "replayed history");
    Ok(())
}

impl<A: Handlers> Default for AggregateRoot<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for AggregateRoot<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("changes", &self.changes)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// An entity that embeds an [`AggregateRoot`] bound to itself.
pub trait Aggregate: Handlers {
    fn root(&self) -> &AggregateRoot<Self>;
    fn root_mut(&mut self) -> &mut AggregateRoot<Self>;
}

#[macro_export]
macro_rules! impl_aggregate {
    ($ty:ty, $root:ident) => {
        impl $crate::Aggregate for $ty {
            fn root(&self) -> &$crate::AggregateRoot<Self> {
                &self.$root
            }

            fn root_mut(&mut self) -> &mut $crate::AggregateRoot<Self> {
                &mut self.$root
            }
        }
    };
}

/// Event-sourcing operations available on every [`Aggregate`].
pub trait Sourced: Aggregate {
    /// Apply `event` to this entity through its bound handlers and record it.
    ///
    /// Events without a bound handler are recorded too; state is simply not updated.
    fn source<M: Message>(&mut self, event: M) -> Result<(), CodecError> {
        let envelope = Envelope::new(&event)?;
        let dispatcher = self.root().dispatcher.clone();
        dispatcher.dispatch_to(self, &event);
        tracing::debug!(
            id = %envelope.id,
            message_type = %envelope.message_type,
            "sourced event"
        );
        self.root_mut().record(envelope, Arc::new(event));
        Ok(())
    }

    /// Apply `history` without recording it.
    fn replay(&mut self, history: &[Envelope]) -> Result<(), ReplayError> {
        let dispatcher = self.root().dispatcher.clone();
        replay_with(&dispatcher, self, history)
    }

    /// Fresh entity rebuilt from `history`, with an empty change log.
    fn from_history(history: &[Envelope]) -> Result<Self, ReplayError>
    where
        Self: Default,
    {
        let mut aggregate = Self::default();
        aggregate.replay(history)?;
        Ok(aggregate)
    }

    fn changes(&self) -> &[Change] {
        self.root().changes()
    }

    fn clear_changes(&mut self) {
        self.root_mut().clear_changes();
    }
}

impl<A: Aggregate> Sourced for A {}
