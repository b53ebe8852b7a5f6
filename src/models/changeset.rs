use serde::Serialize;
use std::collections::BTreeSet;

use super::catalog::{CatalogSnapshot, Entity, EntityMap};

/// Added / updated / removed ids of one entity kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityDiff {
    pub added: BTreeSet<String>,
    pub updated: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl EntityDiff {
    /// Compare two keyed sets by id and content.
    ///
    /// Entities that are absent from `next` but for which `keep_absent`
    /// returns true are left untouched instead of being removed.
    pub fn between<T, F>(previous: &EntityMap<T>, next: &EntityMap<T>, keep_absent: F) -> Self
    where
        T: Entity,
        F: Fn(&T) -> bool,
    {
        let mut diff = EntityDiff::default();

        for entity in next.iter() {
            match previous.get(entity.id()) {
                None => {
                    diff.added.insert(entity.id().to_string());
                }
                Some(old) if old != entity => {
                    diff.updated.insert(entity.id().to_string());
                }
                Some(_) => {}
            }
        }

        for entity in previous.iter() {
            if !next.contains(entity.id()) && !keep_absent(entity) {
                diff.removed.insert(entity.id().to_string());
            }
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }

    /// Ids whose entity must be written from the new snapshot
    pub fn upserts(&self) -> impl Iterator<Item = &str> + '_ {
        self.added
            .iter()
            .chain(self.updated.iter())
            .map(String::as_str)
    }
}

/// Minimal change between the persisted and the freshly normalized set of
/// one playlist. Produced once per sync cycle and handed to persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncChangeset {
    pub categories: EntityDiff,
    pub channels: EntityDiff,
    pub epg: EntityDiff,
}

impl SyncChangeset {
    pub fn between(previous: &CatalogSnapshot, next: &CatalogSnapshot) -> Self {
        // Categories still holding a stale channel outlive their source
        let held: BTreeSet<&str> = previous
            .channels
            .iter()
            .filter(|c| c.stale)
            .map(|c| c.category_id.as_str())
            .collect();

        Self {
            categories: EntityDiff::between(&previous.categories, &next.categories, |c| {
                held.contains(c.id.as_str())
            }),
            // Channels already kept as stale are not removed a second time
            channels: EntityDiff::between(&previous.channels, &next.channels, |c| c.stale),
            epg: EntityDiff::between(&previous.epg, &next.epg, |_| false),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.channels.is_empty() && self.epg.is_empty()
    }

    pub fn len(&self) -> usize {
        self.categories.len() + self.channels.len() + self.epg.len()
    }
}
