//! EPG correlation
//!
//! [`GuideAliases`] maps a channel to a guide channel id while normalizing
//! (exact EPG id, then case/whitespace-insensitive id or display name).
//! [`EpgIndex`] answers now/next and schedule queries over normalized entries,
//! one `BTreeMap` per guide channel keyed by start time.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};

use crate::models::{CatalogSnapshot, Channel, EpgEntry};
use crate::services::records::GuideChannel;

/// Case and whitespace insensitive matching key
pub fn match_key(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Lookup from channel hints to guide channel ids
#[derive(Debug, Default)]
pub struct GuideAliases {
    ids: HashMap<String, String>,
    keys: HashMap<String, String>,
}

impl GuideAliases {
    /// `channels` come from the guide's channel list, `programme_refs` from its
    /// programmes (some guides have programmes for undeclared channels).
    pub fn new<'a>(channels: &'a [GuideChannel], programme_refs: impl IntoIterator<Item = &'a str>) -> Self {
        let mut aliases = Self::default();

        for id in channels.iter().map(|c| c.id.as_str()).chain(programme_refs) {
            if id.is_empty() {
                continue;
            }
            aliases.ids.entry(id.to_string()).or_insert_with(|| id.to_string());
            aliases.keys.entry(match_key(id)).or_insert_with(|| id.to_string());
        }

        // Display names come second so they never shadow a real id
        for channel in channels {
            for name in &channel.display_names {
                let key = match_key(name);
                if !key.is_empty() {
                    aliases.keys.entry(key).or_insert_with(|| channel.id.clone());
                }
            }
        }

        aliases
    }

    /// Guide channel id for a channel's EPG id, else its display name
    pub fn resolve(&self, epg_id: Option<&str>, name: &str) -> Option<&str> {
        if let Some(epg_id) = epg_id.filter(|id| !id.is_empty()) {
            if let Some(id) = self.ids.get(epg_id) {
                return Some(id.as_str());
            }
            if let Some(id) = self.keys.get(&match_key(epg_id)) {
                return Some(id.as_str());
            }
        }
        self.keys.get(&match_key(name)).map(String::as_str)
    }
}

/// Per-channel programme index
#[derive(Debug, Default)]
pub struct EpgIndex {
    by_channel: HashMap<String, BTreeMap<DateTime<Utc>, EpgEntry>>,
    by_key: HashMap<String, String>,
}

impl EpgIndex {
    pub fn build<'a>(entries: impl IntoIterator<Item = &'a EpgEntry>) -> Self {
        let mut index = Self::default();
        for entry in entries {
            index
                .by_key
                .entry(match_key(&entry.channel_id))
                .or_insert_with(|| entry.channel_id.clone());
            index
                .by_channel
                .entry(entry.channel_id.clone())
                .or_default()
                .insert(entry.start, entry.clone());
        }
        index
    }

    pub fn from_snapshot(snapshot: &CatalogSnapshot) -> Self {
        Self::build(snapshot.epg.iter())
    }

    /// Number of guide channels with entries
    pub fn channel_count(&self) -> usize {
        self.by_channel.len()
    }

    fn entries_for(&self, channel: &Channel) -> Option<&BTreeMap<DateTime<Utc>, EpgEntry>> {
        if let Some(epg_id) = channel.epg_id.as_deref() {
            if let Some(entries) = self.by_channel.get(epg_id) {
                return Some(entries);
            }
            if let Some(id) = self.by_key.get(&match_key(epg_id)) {
                return self.by_channel.get(id);
            }
        }
        let id = self.by_key.get(&match_key(&channel.name))?;
        self.by_channel.get(id)
    }

    /// `(current, next)`: current has `start <= now < end`, next is the first
    /// entry starting after `now`
    pub fn current_and_next(&self, channel: &Channel, now: DateTime<Utc>) -> (Option<&EpgEntry>, Option<&EpgEntry>) {
        let Some(entries) = self.entries_for(channel) else {
            return (None, None);
        };

        let current = entries
            .range(..=now)
            .next_back()
            .map(|(_, e)| e)
            .filter(|e| e.contains(now));
        let next = entries.range((Excluded(now), Unbounded)).next().map(|(_, e)| e);

        (current, next)
    }

    /// Entries overlapping `[from, to)`, in start order
    pub fn schedule(&self, channel: &Channel, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&EpgEntry> {
        let Some(entries) = self.entries_for(channel) else {
            return Vec::new();
        };
        if from >= to {
            return Vec::new();
        }

        let running = entries
            .range(..from)
            .next_back()
            .map(|(_, e)| e)
            .filter(|e| e.end > from);

        running
            .into_iter()
            .chain(entries.range(from..to).map(|(_, e)| e))
            .collect()
    }
}
