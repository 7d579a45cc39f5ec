// ── Recent-result cache ──
//
// Remembers every command id seen recently. Entries start `InFlight` and
// become `Done` once the result exists; a retried id is answered from here
// instead of being executed again. Bounded by count and by age; in-flight
// entries are never evicted.

use std::time::Duration;

use indexmap::IndexMap;
use tokio::time::Instant;

use crate::model::{CommandId, CommandResult};

#[derive(Debug)]
enum Entry {
    InFlight,
    Done { result: CommandResult, at: Instant },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// First sighting; the id is now recorded as in flight.
    New,
    InFlight,
    Done(CommandResult),
}

#[derive(Debug)]
pub struct ResultCache {
    capacity: usize,
    ttl: Duration,
    entries: IndexMap<CommandId, Entry>,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: IndexMap::new(),
        }
    }

    /// Look `id` up, claiming it if unseen.
    pub fn begin(&mut self, id: &CommandId) -> Lookup {
        self.evict_expired(Instant::now());
        match self.entries.get(id) {
            Some(Entry::InFlight) => Lookup::InFlight,
            Some(Entry::Done { result, .. }) => Lookup::Done(result.clone()),
            None => {
                self.entries.insert(id.clone(), Entry::InFlight);
                self.enforce_capacity();
                Lookup::New
            }
        }
    }

    /// Record the final result for its id.
    pub fn complete(&mut self, result: CommandResult) {
        let id = result.id.clone();
        let entry = Entry::Done {
            result,
            at: Instant::now(),
        };
        // Re-insert at the back so eviction order follows completion time.
        self.entries.shift_remove(&id);
        self.entries.insert(id, entry);
        self.enforce_capacity();
    }

    /// Drop a claim that will never complete.
    pub fn forget(&mut self, id: &CommandId) {
        if matches!(self.entries.get(id), Some(Entry::InFlight)) {
            self.entries.shift_remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| match entry {
            Entry::InFlight => true,
            Entry::Done { at, .. } => now.duration_since(*at) < ttl,
        });
    }

    fn enforce_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            let oldest_done = self
                .entries
                .iter()
                .position(|(_, entry)| matches!(entry, Entry::Done { .. }));
            match oldest_done {
                Some(index) => {
                    self.entries.shift_remove_index(index);
                }
                None => break,
            }
        }
    }
}
