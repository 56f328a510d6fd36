//! Identity map from entity id to the live entity.
//!
//! Entries are weak: the cache never keeps an entity alive. While anything
//! else holds an entity, `get` returns that exact instance. Entries whose
//! entity has been dropped are evicted lazily, when next looked up (or by
//! [`EntityCache::purge`]).

use crate::entity::Entity;
use pulse_types::EntityId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

#[derive(Debug, Default)]
pub struct EntityCache {
    entries: Mutex<HashMap<EntityId, Weak<Entity>>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live entity for `id`. A dead entry is removed and reported absent.
    pub fn get(&self, id: &EntityId) -> Option<Arc<Entity>> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get(id)?;
        match entry.upgrade() {
            Some(entity) => Some(entity),
            None => {
                entries.remove(id);
                debug!("Evicted reclaimed entity {}", id);
                None
            }
        }
    }

    /// Maps `id` to `entity`, replacing any previous entry.
    pub fn set(&self, id: EntityId, entity: &Arc<Entity>) {
        self.entries
            .lock()
            .unwrap()
            .insert(id, Arc::downgrade(entity));
    }

    /// Removes the entry for `id`. Returns whether there was one.
    pub fn delete(&self, id: &EntityId) -> bool {
        self.entries.lock().unwrap().remove(id).is_some()
    }

    /// The live entity for `id`, or the one built by `make`. Lookup and
    /// insertion happen under one lock, so concurrent misses agree on a
    /// single instance.
    pub fn get_or_insert_with(
        &self,
        id: &EntityId,
        make: impl FnOnce() -> Arc<Entity>,
    ) -> Arc<Entity> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entity) = entries.get(id).and_then(Weak::upgrade) {
            return entity;
        }
        let entity = make();
        entries.insert(id.clone(), Arc::downgrade(&entity));
        entity
    }

    /// Drops every dead entry. Returns how many were dropped.
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.strong_count() > 0);
        before - entries.len()
    }

    /// Number of entries, dead ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
