//! In-memory user collection.
//!
//! Production deployments put a database behind `UserCollection`; this one
//! keeps insertion order so audience results are deterministic.

use drip_core::{DripResult, User};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::query::{UserCollection, UserQuery};

#[derive(Debug, Default)]
pub struct InMemoryUsers {
    users: RwLock<Vec<User>>,
}

impl InMemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_users(users: impl IntoIterator<Item = User>) -> Self {
        let store = Self::new();
        for user in users {
            store.upsert(user);
        }
        store
    }

    /// Insert a user, replacing any existing record with the same id.
    pub fn upsert(&self, user: User) {
        let mut users = self.users.write();
        match users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user,
            None => users.push(user),
        }
    }

    pub fn all(&self) -> Vec<User> {
        self.users.read().clone()
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl UserCollection for InMemoryUsers {
    fn fetch(&self, query: &UserQuery) -> DripResult<Vec<User>> {
        let users = self.users.read();
        let matched: Vec<User> = users.iter().filter(|u| query.matches(u)).cloned().collect();
        debug!(
            scanned = users.len(),
            matched = matched.len(),
            annotations = query.annotations().len(),
            "Evaluated user query"
        );
        Ok(matched)
    }

    fn count(&self, query: &UserQuery) -> DripResult<usize> {
        Ok(self.users.read().iter().filter(|u| query.matches(u)).count())
    }

    fn get(&self, id: &Uuid) -> Option<User> {
        self.users.read().iter().find(|u| &u.id == id).cloned()
    }
}
