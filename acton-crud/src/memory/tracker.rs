use std::collections::{BTreeSet, HashMap};

use crate::entity::EntityId;
use crate::unit_of_work::{ConflictEntry, PropertyBag};

/// Lifecycle of a tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
pub(crate) struct TrackedEntry {
    pub state: EntryState,
    /// Row as loaded; its version token is what the save checks
    pub original: PropertyBag,
    pub current: PropertyBag,
    /// Relation columns left out by the fetch; they hold blanks, not data
    pub unloaded: BTreeSet<String>,
}

pub(crate) type EntryKey = (String, EntityId);

/// Identity map of the entities loaded or staged through one context
#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    entries: HashMap<EntryKey, TrackedEntry>,
}

impl ChangeTracker {
    pub fn get(&self, table: &str, id: EntityId) -> Option<&TrackedEntry> {
        self.entries.get(&(table.to_string(), id))
    }

    /// Register a freshly loaded row unless it is already tracked
    pub fn attach(&mut self, table: &str, id: EntityId, row: &PropertyBag, unloaded: &[&str]) {
        self.entries
            .entry((table.to_string(), id))
            .or_insert_with(|| TrackedEntry {
                state: EntryState::Unchanged,
                original: row.clone(),
                current: row.clone(),
                unloaded: unloaded.iter().map(|name| (*name).to_string()).collect(),
            });
    }

    /// Fill in relations a later fetch includes, unless they were edited since
    pub fn load(&mut self, table: &str, id: EntityId, stored: &PropertyBag, unloaded: &[&str]) {
        let Some(entry) = self.entries.get_mut(&(table.to_string(), id)) else {
            return;
        };
        let now_loaded: Vec<String> = entry
            .unloaded
            .iter()
            .filter(|name| !unloaded.contains(&name.as_str()))
            .cloned()
            .collect();
        for name in now_loaded {
            if entry.current.get(&name) == entry.original.get(&name) {
                if let Some(value) = stored.get(&name) {
                    entry.original.insert(name.clone(), value.clone());
                    entry.current.insert(name.clone(), value.clone());
                }
            }
            entry.unloaded.remove(&name);
        }
    }

    pub fn add(&mut self, table: &str, id: EntityId, row: PropertyBag) {
        self.entries.insert(
            (table.to_string(), id),
            TrackedEntry {
                state: EntryState::Added,
                original: row.clone(),
                current: row,
                unloaded: BTreeSet::new(),
            },
        );
    }

    /// Stage new values; `stored` seeds the original of an untracked entity
    pub fn modify(&mut self, table: &str, id: EntityId, row: PropertyBag, stored: Option<PropertyBag>) {
        let entry = self
            .entries
            .entry((table.to_string(), id))
            .or_insert_with(|| TrackedEntry {
                state: EntryState::Unchanged,
                original: stored.unwrap_or_default(),
                current: PropertyBag::new(),
                unloaded: BTreeSet::new(),
            });
        entry.current = row;
        if entry.state != EntryState::Added {
            entry.state = EntryState::Modified;
        }
    }

    /// Stage a removal; an entity added in this session is simply forgotten
    pub fn remove(&mut self, table: &str, id: EntityId, stored: Option<PropertyBag>) {
        let key = (table.to_string(), id);
        match self.entries.get(&key).map(|entry| entry.state) {
            Some(EntryState::Added) => {
                self.entries.remove(&key);
            }
            Some(_) => {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.state = EntryState::Deleted;
                }
            }
            None => {
                let original = stored.unwrap_or_default();
                self.entries.insert(
                    key,
                    TrackedEntry {
                        state: EntryState::Deleted,
                        current: original.clone(),
                        original,
                        unloaded: BTreeSet::new(),
                    },
                );
            }
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = (&EntryKey, &TrackedEntry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.state != EntryState::Unchanged)
    }

    pub fn pending_mut(&mut self) -> impl Iterator<Item = (&EntryKey, &mut TrackedEntry)> {
        self.entries
            .iter_mut()
            .filter(|(_, entry)| entry.state != EntryState::Unchanged)
    }

    /// Mark every pending entry as persisted
    pub fn accept_all(&mut self) {
        self.entries.retain(|_, entry| entry.state != EntryState::Deleted);
        for entry in self.entries.values_mut() {
            entry.original = entry.current.clone();
            entry.state = EntryState::Unchanged;
        }
    }

    /// Replace original and current values with merged ones
    pub fn resolve(&mut self, resolved: ConflictEntry) -> bool {
        let key = (resolved.entity_type, resolved.entity_id);
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.original = resolved.original;
                entry.current = resolved.current;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
