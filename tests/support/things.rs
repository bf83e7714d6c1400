//! The `Thing` demo: an aggregate, a repository that publishes its changes
//! through a bus, and a read model fed by that bus.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sourced_dispatch::bus::{Broker, Bus};
use sourced_dispatch::{
    impl_aggregate, impl_message, new_id, AggregateRoot, Bindings, BrokerError, CodecError,
    Handlers, Sourced,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingCreated {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingRenamed {
    pub id: String,
    pub new_name: String,
}

impl_message!(ThingCreated, ThingRenamed);

#[derive(Debug, Default)]
pub struct Thing {
    root: AggregateRoot<Thing>,
    pub id: String,
    pub name: String,
}

impl Thing {
    pub fn create(name: &str) -> Result<Self, CodecError> {
        let mut thing = Self::default();
        thing.source(ThingCreated {
            id: new_id(),
            name: name.to_string(),
        })?;
        Ok(thing)
    }

    pub fn rename(&mut self, new_name: &str) -> Result<(), CodecError> {
        let id = self.id.clone();
        self.source(ThingRenamed {
            id,
            new_name: new_name.to_string(),
        })
    }

    fn created(&mut self, e: &ThingCreated) {
        self.id = e.id.clone();
        self.name = e.name.clone();
    }

    fn renamed(&mut self, e: &ThingRenamed) {
        self.name = e.new_name.clone();
    }
}

impl Handlers for Thing {
    fn handlers(on: &mut Bindings<Self>) {
        on.on(Thing::created).on(Thing::renamed);
    }
}

impl_aggregate!(Thing, root);

/// Keeps things in memory and publishes their changes on save.
pub struct ThingRepository<B: Broker> {
    things: Vec<Thing>,
    bus: Bus<B>,
}

impl<B: Broker> ThingRepository<B> {
    pub fn new(bus: Bus<B>) -> Self {
        Self {
            things: Vec::new(),
            bus,
        }
    }

    pub fn add(&mut self, thing: Thing) {
        self.things.push(thing);
    }

    pub fn find(&self, id: &str) -> Option<&Thing> {
        self.things.iter().find(|thing| thing.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Thing> {
        self.things.iter_mut().find(|thing| thing.id == id)
    }

    /// Publish the pending changes of thing `id`, then clear them.
    ///
    /// Returns `Ok(false)` when no such thing exists.
    pub fn save(&mut self, id: &str) -> Result<bool, BrokerError> {
        let Some(thing) = self.things.iter_mut().find(|thing| thing.id == id) else {
            return Ok(false);
        };
        self.bus.publish_changes(thing.changes())?;
        thing.clear_changes();
        Ok(true)
    }

    pub fn bus(&self) -> &Bus<B> {
        &self.bus
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThingDetail {
    pub id: String,
    pub name: String,
}

/// Read model: current name of every thing seen on the bus.
#[derive(Debug, Default)]
pub struct ThingList {
    things: HashMap<String, ThingDetail>,
}

impl ThingList {
    pub fn get(&self, id: &str) -> Option<&ThingDetail> {
        self.things.get(id)
    }

    pub fn len(&self) -> usize {
        self.things.len()
    }

    fn created(&mut self, e: &ThingCreated) {
        self.things.insert(
            e.id.clone(),
            ThingDetail {
                id: e.id.clone(),
                name: e.name.clone(),
            },
        );
    }

    fn renamed(&mut self, e: &ThingRenamed) {
        let detail = self.things.entry(e.id.clone()).or_default();
        detail.id = e.id.clone();
        detail.name = e.new_name.clone();
    }
}

impl Handlers for ThingList {
    fn handlers(on: &mut Bindings<Self>) {
        on.on(ThingList::created).on(ThingList::renamed);
    }
}
