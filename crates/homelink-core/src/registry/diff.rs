// ── Inventory diffing ──

use std::collections::BTreeMap;
use std::sync::Arc;

use homelink_api::{ClientMessage, EntityRecord};

use crate::model::{EntityId, EntitySnapshot};

/// Change set between two inventories. Each list is sorted by entity id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryDiff {
    pub added: Vec<EntitySnapshot>,
    pub removed: Vec<EntityId>,
    pub changed: Vec<EntitySnapshot>,
}

impl InventoryDiff {
    /// What happened between `previous` and `current`. Later duplicates in
    /// `current` win.
    pub fn between(previous: &[Arc<EntitySnapshot>], current: &[EntitySnapshot]) -> Self {
        let before: BTreeMap<&EntityId, &EntitySnapshot> =
            previous.iter().map(|e| (&e.id, e.as_ref())).collect();
        let after: BTreeMap<&EntityId, &EntitySnapshot> =
            current.iter().map(|e| (&e.id, e)).collect();

        let mut diff = Self::default();
        for (id, entity) in &after {
            match before.get(id) {
                None => diff.added.push((*entity).clone()),
                Some(old) if *old != *entity => diff.changed.push((*entity).clone()),
                Some(_) => {}
            }
        }
        diff.removed = before
            .keys()
            .filter(|id| !after.contains_key(*id))
            .map(|id| (*id).clone())
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn to_message(&self) -> ClientMessage {
        ClientMessage::InventoryDiff {
            added: self.added.iter().map(EntityRecord::from).collect(),
            removed: self.removed.iter().map(ToString::to_string).collect(),
            changed: self.changed.iter().map(EntityRecord::from).collect(),
        }
    }
}
