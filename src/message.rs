//! Typed messages and their object-safe erasure.
//!
//! Every value that flows through a [`Dispatcher`](crate::Dispatcher), an
//! [`AggregateRoot`](crate::AggregateRoot) or a [`Bus`](crate::Bus) is a [`Message`]:
//! a plain serde struct with a short type tag. Dispatch paths work on
//! `&dyn AnyMessage` so handlers for unrelated types can share one table.

use std::any::{type_name, Any};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A message that can be dispatched locally and carried across a process boundary.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use sourced_dispatch::Message;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct UserCreated {
///     name: String,
/// }
///
/// impl Message for UserCreated {}
///
/// assert_eq!(UserCreated::message_type(), "UserCreated");
/// ```
pub trait Message: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// The tag written into an envelope's `type` field.
    ///
    /// Defaults to the unqualified type name. Override it when two types in
    /// different modules would otherwise share a tag.
    fn message_type() -> &'static str {
        short_type_name::<Self>()
    }
}

/// Object-safe view of a [`Message`].
pub trait AnyMessage: Any + fmt::Debug + Send + Sync + 'static {
    fn type_tag(&self) -> &'static str;

    /// Serialize the message into the structured value carried by an envelope.
    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error>;

    fn as_any(&self) -> &dyn Any;
}

impl<M: Message> AnyMessage for M {
    fn type_tag(&self) -> &'static str {
        <M as Message>::message_type()
    }

    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AnyMessage {
    pub fn is<M: Message>(&self) -> bool {
        self.as_any().is::<M>()
    }

    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }
}

/// `a::b::Thing<c::D>` -> `Thing`
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Implement [`Message`] with the default tag for each listed type.
#[macro_export]
macro_rules! impl_message {
    ($($ty:ty),+ $(,)?) => {
        $(impl $crate::Message for $ty {})+
    };
}
