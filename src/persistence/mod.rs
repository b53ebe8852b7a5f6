//! Persistence port
//!
//! The sync engine only talks to storage through [`PersistencePort`].
//! Applying a changeset writes the new canonical set, the removals it
//! implies and the playlist's sync bookkeeping as one atomic step, and
//! applying the same changeset twice leaves the store unchanged.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::config::RemovalPolicy;
use crate::error::SyncError;
use crate::models::{CatalogSnapshot, Favorite, Playlist, SyncChangeset, SyncStatus};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome of a successful cycle, written together with the changeset
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub synced_at: DateTime<Utc>,
    pub dropped_records: usize,
}

#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn save_playlist(&self, playlist: &Playlist) -> Result<(), SyncError>;

    async fn load_playlist(&self, id: Uuid) -> Result<Option<Playlist>, SyncError>;

    async fn list_playlists(&self) -> Result<Vec<Playlist>, SyncError>;

    /// Delete a playlist with its channels, categories, guide and favorites
    async fn remove_playlist(&self, id: Uuid) -> Result<bool, SyncError>;

    /// Currently persisted canonical set (empty before the first sync)
    async fn load_snapshot(&self, playlist_id: Uuid) -> Result<CatalogSnapshot, SyncError>;

    /// Apply `changeset`, taking entity content from `next`, and record the
    /// successful cycle. Atomic and idempotent.
    async fn apply_changeset(
        &self,
        playlist_id: Uuid,
        changeset: &SyncChangeset,
        next: &CatalogSnapshot,
        outcome: &CycleOutcome,
    ) -> Result<(), SyncError>;

    async fn update_status(
        &self,
        playlist_id: Uuid,
        status: SyncStatus,
        last_error: Option<&str>,
    ) -> Result<(), SyncError>;

    async fn add_favorite(&self, playlist_id: Uuid, channel_id: &str) -> Result<Favorite, SyncError>;

    async fn remove_favorite(&self, playlist_id: Uuid, channel_id: &str) -> Result<bool, SyncError>;

    async fn favorites(&self, playlist_id: Uuid) -> Result<Vec<Favorite>, SyncError>;
}

/// What happens to the channels a changeset removes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRemovals {
    pub delete: Vec<String>,
    pub mark_stale: Vec<String>,
}

impl ChannelRemovals {
    /// Favorites are never deleted; under [`RemovalPolicy::MarkStale`] nothing is
    pub fn plan(changeset: &SyncChangeset, favorites: &HashSet<String>, policy: RemovalPolicy) -> Self {
        let mut removals = Self::default();
        for id in &changeset.channels.removed {
            if policy == RemovalPolicy::MarkStale || favorites.contains(id) {
                removals.mark_stale.push(id.clone());
            } else {
                removals.delete.push(id.clone());
            }
        }
        removals
    }
}

/// Apply a changeset to an in-memory canonical set.
///
/// Upserts come from `next`; removed channels are deleted or kept as stale
/// per [`ChannelRemovals`]; a removed category that a kept channel still
/// points at stays. Display order follows `next`, with entities it no longer
/// lists (stale favorites and their categories) at the end.
pub fn apply_to_snapshot(
    current: &mut CatalogSnapshot,
    changeset: &SyncChangeset,
    next: &CatalogSnapshot,
    removals: &ChannelRemovals,
) {
    for id in changeset.categories.upserts() {
        if let Some(category) = next.categories.get(id) {
            current.categories.upsert(category.clone());
        }
    }
    for id in changeset.channels.upserts() {
        if let Some(channel) = next.channels.get(id) {
            current.channels.upsert(channel.clone());
        }
    }
    for id in changeset.epg.upserts() {
        if let Some(entry) = next.epg.get(id) {
            current.epg.upsert(entry.clone());
        }
    }

    for id in &removals.mark_stale {
        if let Some(channel) = current.channels.get_mut(id) {
            channel.stale = true;
        }
    }
    current
        .channels
        .remove_all(removals.delete.iter().map(String::as_str));

    let referenced: HashSet<&str> = current.channels.iter().map(|c| c.category_id.as_str()).collect();
    let doomed: Vec<&str> = changeset
        .categories
        .removed
        .iter()
        .map(String::as_str)
        .filter(|id| !referenced.contains(id))
        .collect();
    current.categories.remove_all(doomed);

    current
        .epg
        .remove_all(changeset.epg.removed.iter().map(String::as_str));

    current.categories.arrange_like(next.categories.ids());
    current.channels.arrange_like(next.channels.ids());
}
