//! Dispatcher - routes messages to handlers bound by message type.
//!
//! A dispatcher holds three tables:
//!
//! - **types**: tag → message type, used to decode envelopes arriving from a broker
//! - **handlers**: message type → ordered handler list
//! - **global**: handlers invoked for every dispatch
//!
//! `Dispatcher<C>` is generic over an owner context. Bus dispatchers use `C = ()`
//! and plain `Fn(&M)` handlers; aggregate roots use `C = Self` so handlers can
//! mutate the entity they are bound to.
//!
//! ## Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use serde::{Deserialize, Serialize};
//! use sourced_dispatch::{Dispatcher, Message};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct UserCreated { name: String }
//! impl Message for UserCreated {}
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let dispatcher = Dispatcher::new();
//! let sink = Arc::clone(&seen);
//! dispatcher.register_handler(move |e: &UserCreated| sink.lock().unwrap().push(e.name.clone()));
//!
//! dispatcher.dispatch(&UserCreated { name: "John".into() });
//! assert_eq!(*seen.lock().unwrap(), vec!["John".to_string()]);
//! ```

use std::any::TypeId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::envelope::Envelope;
use crate::error::DecodeError;
use crate::message::{AnyMessage, Message};

type Handler<C> = Arc<dyn Fn(&mut C, &dyn AnyMessage) + Send + Sync>;
type DecodeFn = fn(&serde_json::Value) -> Result<Box<dyn AnyMessage>, serde_json::Error>;

/// Registry entry describing one concrete message type.
#[derive(Clone, Copy)]
pub struct MessageType {
    name: &'static str,
    type_id: TypeId,
    decode: DecodeFn,
}

impl MessageType {
    pub fn of<M: Message>() -> Self {
        Self {
            name: M::message_type(),
            type_id: TypeId::of::<M>(),
            decode: decode_as::<M>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn decode(&self, payload: &serde_json::Value) -> Result<Box<dyn AnyMessage>, serde_json::Error> {
        (self.decode)(payload)
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageType").field("name", &self.name).finish()
    }
}

fn decode_as<M: Message>(payload: &serde_json::Value) -> Result<Box<dyn AnyMessage>, serde_json::Error> {
    let message = M::deserialize(payload)?;
    Ok(Box::new(message))
}

/// Owner-declared `{message type, handler}` pairs.
///
/// Collected through [`Handlers::handlers`] and bound in declaration order.
pub struct Bindings<O> {
    entries: Vec<(MessageType, Handler<O>)>,
}

impl<O: 'static> Bindings<O> {
    pub(crate) fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub(crate) fn collect() -> Self
    where
        O: Handlers,
    {
        let mut bindings = Self::new();
        O::handlers(&mut bindings);
        bindings
    }

    /// Bind `handler` to message type `M`.
    pub fn on<M, F>(&mut self, handler: F) -> &mut Self
    where
        M: Message,
        F: Fn(&mut O, &M) + Send + Sync + 'static,
    {
        let erased: Handler<O> = Arc::new(move |owner: &mut O, message: &dyn AnyMessage| {
            if let Some(message) = message.downcast_ref::<M>() {
                handler(owner, message);
            }
        });
        self.entries.push((MessageType::of::<M>(), erased));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A type that declares its own message handlers.
///
/// This is the explicit replacement for discovering `Handle*` methods at runtime:
/// the owner lists each handled message type once.
///
/// ```ignore
/// impl Handlers for ThingList {
///     fn handlers(on: &mut Bindings<Self>) {
///         on.on(ThingList::created).on(ThingList::renamed);
///     }
/// }
/// ```
pub trait Handlers: Sized + 'static {
    fn handlers(on: &mut Bindings<Self>);
}

struct Table<C> {
    types: HashMap<&'static str, MessageType>,
    handlers: HashMap<TypeId, Vec<Handler<C>>>,
    global: Vec<Handler<C>>,
}

impl<C> Table<C> {
    fn register_type(&mut self, message_type: MessageType) {
        match self.types.entry(message_type.name) {
            Entry::Vacant(slot) => {
                slot.insert(message_type);
            }
            Entry::Occupied(existing) if existing.get().type_id != message_type.type_id => {
                tracing::warn!(
                    message_type = message_type.name,
                    "type tag already registered for a different type; keeping the first"
                );
            }
            Entry::Occupied(_) => {}
        }
    }

    fn add(&mut self, message_type: MessageType, handler: Handler<C>) {
        self.register_type(message_type);
        self.handlers
            .entry(message_type.type_id)
            .or_default()
            .push(handler);
    }
}

/// Routes messages to handlers by concrete type.
///
/// Cloning yields another handle to the same tables. Handler lists are copied
/// out of the lock before invocation, so handlers may register more handlers
/// or dispatch again.
pub struct Dispatcher<C = ()> {
    table: Arc<RwLock<Table<C>>>,
}

impl<C> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<C: 'static> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = table.types.keys().collect();
        names.sort();
        f.debug_struct("Dispatcher")
            .field("types", &names)
            .field("global", &table.global.len())
            .finish()
    }
}

impl<C: 'static> Dispatcher<C> {
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(Table {
                types: HashMap::new(),
                handlers: HashMap::new(),
                global: Vec::new(),
            })),
        }
    }

    /// Dispatcher pre-bound with every handler `C` declares.
    pub fn for_owner() -> Self
    where
        C: Handlers,
    {
        let dispatcher = Self::new();
        dispatcher.bind_all(Bindings::collect());
        dispatcher
    }

    /// Bind an owner-context handler to message type `M`.
    pub fn bind<M, F>(&self, handler: F)
    where
        M: Message,
        F: Fn(&mut C, &M) + Send + Sync + 'static,
    {
        let mut bindings = Bindings::new();
        bindings.on(handler);
        self.bind_all(bindings);
    }

    pub fn bind_all(&self, bindings: Bindings<C>) {
        let mut table = self.write();
        for (message_type, handler) in bindings.entries {
            table.add(message_type, handler);
        }
    }

    /// Make `M` decodable from envelopes without binding a handler.
    pub fn register_message<M: Message>(&self) {
        self.write().register_type(MessageType::of::<M>());
    }

    pub fn add_global_binding<F>(&self, handler: F)
    where
        F: Fn(&mut C, &dyn AnyMessage) + Send + Sync + 'static,
    {
        self.write().global.push(Arc::new(handler));
    }

    /// Invoke every handler bound to the message's type, then every global handler,
    /// each in registration order.
    ///
    /// A type with no bound handlers only reaches the global handlers. A panicking
    /// handler is logged and skipped; the others still run.
    pub fn dispatch_to(&self, owner: &mut C, message: &dyn AnyMessage) {
        let (handlers, global) = {
            let table = self.read();
            let handlers = table
                .handlers
                .get(&message.as_any().type_id())
                .cloned()
                .unwrap_or_default();
            (handlers, table.global.clone())
        };

        tracing::debug!(
            message_type = message.type_tag(),
            handlers = handlers.len(),
            global = global.len(),
            "dispatching message"
        );

        for handler in handlers.iter().chain(global.iter()) {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&mut *owner, message)));
            if outcome.is_err() {
                tracing::error!(message_type = message.type_tag(), "message handler panicked");
            }
        }
    }

    /// Resolve an envelope's tag through the type table and decode its payload.
    pub fn decode(&self, envelope: &Envelope) -> Result<Box<dyn AnyMessage>, DecodeError> {
        let message_type = self
            .resolve(&envelope.message_type)
            .ok_or_else(|| DecodeError::UnknownType(envelope.message_type.clone()))?;
        message_type
            .decode(&envelope.payload)
            .map_err(|source| DecodeError::Malformed {
                message_type: envelope.message_type.clone(),
                source,
            })
    }

    pub fn resolve(&self, name: &str) -> Option<MessageType> {
        self.read().types.get(name).copied()
    }

    /// Registered type tags, sorted.
    pub fn message_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.read().types.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn handler_count<M: Message>(&self) -> usize {
        self.read()
            .handlers
            .get(&TypeId::of::<M>())
            .map_or(0, Vec::len)
    }

    pub fn global_handler_count(&self) -> usize {
        self.read().global.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Table<C>> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Table<C>> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Dispatcher {
    /// Bind `handler` to message type `M`.
    pub fn register_handler<M, F>(&self, handler: F)
    where
        M: Message,
        F: Fn(&M) + Send + Sync + 'static,
    {
        self.bind(move |_: &mut (), message: &M| handler(message));
    }

    /// Bind every handler `O` declares to the shared `owner`.
    ///
    /// The owner is locked for the duration of each handler call.
    pub fn register_handlers<O>(&self, owner: Arc<Mutex<O>>)
    where
        O: Handlers + Send,
    {
        let mut table = self.write();
        for (message_type, handler) in Bindings::<O>::collect().entries {
            let owner = Arc::clone(&owner);
            let bound: Handler<()> = Arc::new(move |_: &mut (), message: &dyn AnyMessage| {
                let mut guard = owner.lock().unwrap_or_else(PoisonError::into_inner);
                handler(&mut *guard, message);
            });
            table.add(message_type, bound);
        }
    }

    pub fn add_global_handler<F>(&self, handler: F)
    where
        F: Fn(&dyn AnyMessage) + Send + Sync + 'static,
    {
        self.add_global_binding(move |_: &mut (), message: &dyn AnyMessage| handler(message));
    }

    pub fn dispatch(&self, message: &dyn AnyMessage) {
        self.dispatch_to(&mut (), message);
    }
}
