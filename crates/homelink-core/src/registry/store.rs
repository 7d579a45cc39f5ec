// ── Entity snapshot store ──
//
// Concurrent storage keyed by entity id, plus a `watch` snapshot rebuilt on
// every batch mutation. The dispatcher validates command targets against it;
// the sync loop diffs fresh inventories against it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{EntityId, EntitySnapshot};

pub struct EntityStore {
    by_id: DashMap<EntityId, Arc<EntitySnapshot>>,

    /// Sorted by id, rebuilt after each mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<EntitySnapshot>>>>,

    /// When the store last matched an inventory the remote side received.
    last_sync: watch::Sender<Option<DateTime<Utc>>>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (last_sync, _) = watch::channel(None);
        Self {
            by_id: DashMap::new(),
            snapshot,
            last_sync,
        }
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &EntityId) -> Option<Arc<EntitySnapshot>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Current contents, sorted by entity id (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<EntitySnapshot>>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<EntitySnapshot>>>> {
        self.snapshot.subscribe()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.borrow()
    }

    /// Make the store hold exactly `entities`: upsert each, prune the rest.
    pub fn replace_all(&self, entities: Vec<EntitySnapshot>) {
        let mut keep = std::collections::HashSet::with_capacity(entities.len());
        for entity in entities {
            keep.insert(entity.id.clone());
            let unchanged = self
                .by_id
                .get(&entity.id)
                .is_some_and(|existing| **existing == entity);
            if !unchanged {
                self.by_id.insert(entity.id.clone(), Arc::new(entity));
            }
        }
        self.by_id.retain(|id, _| keep.contains(id));

        self.rebuild_snapshot();
        self.last_sync.send_replace(Some(Utc::now()));
    }

    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<EntitySnapshot>> =
            self.by_id.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.id.cmp(&b.id));
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
