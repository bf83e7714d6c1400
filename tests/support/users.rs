//! User events and a handler owner that counts what it receives.

use serde::{Deserialize, Serialize};
use sourced_dispatch::{impl_aggregate, impl_message, AggregateRoot, Bindings, Handlers};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCreated {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRenamed {
    pub new_name: String,
}

impl_message!(UserCreated, UserRenamed);

/// Handler owner for bus tests.
#[derive(Debug, Default)]
pub struct UserProfile {
    pub name: String,
    pub created: usize,
    pub renamed: usize,
}

impl UserProfile {
    fn created(&mut self, e: &UserCreated) {
        self.name = e.name.clone();
        self.created += 1;
    }

    fn renamed(&mut self, e: &UserRenamed) {
        self.name = e.new_name.clone();
        self.renamed += 1;
    }
}

impl Handlers for UserProfile {
    fn handlers(on: &mut Bindings<Self>) {
        on.on(UserProfile::created).on(UserProfile::renamed);
    }
}

/// Event-sourced user entity.
#[derive(Debug, Default)]
pub struct User {
    root: AggregateRoot<User>,
    pub name: String,
}

impl User {
    fn created(&mut self, e: &UserCreated) {
        self.name = e.name.clone();
    }

    fn renamed(&mut self, e: &UserRenamed) {
        self.name = e.new_name.clone();
    }
}

impl Handlers for User {
    fn handlers(on: &mut Bindings<Self>) {
        on.on(User::created).on(User::renamed);
    }
}

impl_aggregate!(User, root);
