//! Canonical entities shared by every source kind, and the keyed collection
//! that holds them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Media type of a channel entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Live,
    Movie,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Live => write!(f, "live"),
            MediaKind::Movie => write!(f, "movie"),
        }
    }
}

impl MediaKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "movie" => MediaKind::Movie,
            _ => MediaKind::Live,
        }
    }
}

/// Catch-up (timeshift) metadata advertised by the source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatchUp {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Anything stored in an [`EntityMap`]
pub trait Entity: Clone + PartialEq {
    fn id(&self) -> &str;
}

/// Group/category of channels, scoped to one playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub order: u32,
    pub media_kind: MediaKind,
}

/// Playable channel (live stream or movie)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    pub category_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epg_id: Option<String>,
    #[serde(default)]
    pub media_kind: MediaKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catchup: Option<CatchUp>,
    /// Source stopped listing this channel; kept because it is a favorite
    #[serde(default)]
    pub stale: bool,
}

/// Programme guide entry, times always UTC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpgEntry {
    pub id: String,
    /// Guide channel identifier (matches `Channel::epg_id`)
    pub channel_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EpgEntry {
    pub fn new(
        channel_id: impl Into<String>,
        title: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        description: Option<String>,
    ) -> Self {
        let channel_id = channel_id.into();
        Self {
            id: Self::key(&channel_id, start),
            channel_id,
            title: title.into(),
            start,
            end,
            description,
        }
    }

    pub fn key(channel_id: &str, start: DateTime<Utc>) -> String {
        format!("{}@{}", channel_id, start.timestamp())
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

impl Entity for Category {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Channel {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for EpgEntry {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Keyed mapping (id -> entity) plus the insertion order of ids.
///
/// Ids are unique: [`EntityMap::insert`] refuses a second entity with an id
/// already present and hands it back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMap<T: Entity> {
    by_id: HashMap<String, T>,
    order: Vec<String>,
}

impl<T: Entity> Default for EntityMap<T> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<T: Entity> EntityMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping the first occurrence; a duplicate is returned as `Err`
    pub fn insert(&mut self, entity: T) -> Result<(), T> {
        if self.by_id.contains_key(entity.id()) {
            return Err(entity);
        }
        let id = entity.id().to_string();
        self.order.push(id.clone());
        self.by_id.insert(id, entity);
        Ok(())
    }

    /// Insert or replace; a replaced entity keeps its position
    pub fn upsert(&mut self, entity: T) {
        let id = entity.id().to_string();
        if self.by_id.insert(id.clone(), entity).is_none() {
            self.order.push(id);
        }
    }

    /// Put `leading` ids first, in that order, followed by the remaining
    /// entities in their current order. Unknown ids are ignored.
    pub fn arrange_like<'a, I>(&mut self, leading: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut placed: HashSet<&str> = HashSet::new();
        let mut order: Vec<String> = Vec::with_capacity(self.order.len());
        for id in leading {
            if self.by_id.contains_key(id) && placed.insert(id) {
                order.push(id.to_string());
            }
        }
        order.extend(self.order.iter().filter(|id| !placed.contains(id.as_str())).cloned());
        self.order = order;
    }

    /// Remove every listed id in one pass over the order
    pub fn remove_all<'a, I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let doomed: HashSet<&str> = ids
            .into_iter()
            .filter(|id| self.by_id.contains_key(*id))
            .collect();
        if doomed.is_empty() {
            return 0;
        }
        for id in &doomed {
            self.by_id.remove(*id);
        }
        self.order.retain(|id| !doomed.contains(id.as_str()));
        doomed.len()
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.by_id.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.by_id.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entities in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.order.iter().filter_map(move |id| self.by_id.get(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.order.iter().map(String::as_str)
    }
}

impl<T: Entity> FromIterator<T> for EntityMap<T> {
    /// Collect keeping the first entity for each id
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut map = EntityMap::new();
        for entity in iter {
            let _ = map.insert(entity);
        }
        map
    }
}

/// Full canonical entity set of one playlist
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    pub categories: EntityMap<Category>,
    pub channels: EntityMap<Channel>,
    pub epg: EntityMap<EpgEntry>,
}

impl CatalogSnapshot {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.channels.is_empty() && self.epg.is_empty()
    }
}
