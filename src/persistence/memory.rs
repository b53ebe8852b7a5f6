//! In-process store, used by tests and by hosts without a database

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{apply_to_snapshot, ChannelRemovals, CycleOutcome, PersistencePort};
use crate::config::RemovalPolicy;
use crate::error::SyncError;
use crate::models::{CatalogSnapshot, Favorite, Playlist, SyncChangeset, SyncStatus};

#[derive(Debug, Default)]
struct State {
    playlists: BTreeMap<Uuid, Playlist>,
    catalogs: HashMap<Uuid, CatalogSnapshot>,
    favorites: HashMap<Uuid, BTreeMap<String, Favorite>>,
    applied: usize,
    snapshot_loads: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    policy: RemovalPolicy,
}

impl MemoryStore {
    pub fn new(policy: RemovalPolicy) -> Self {
        Self {
            state: Mutex::new(State::default()),
            policy,
        }
    }

    /// Number of changesets applied so far
    pub fn applied_changesets(&self) -> usize {
        self.lock().map(|s| s.applied).unwrap_or(0)
    }

    /// Number of full catalog loads served so far
    pub fn snapshot_loads(&self) -> usize {
        self.lock().map(|s| s.snapshot_loads).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, SyncError> {
        self.state
            .lock()
            .map_err(|_| SyncError::Persistence("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl PersistencePort for MemoryStore {
    async fn save_playlist(&self, playlist: &Playlist) -> Result<(), SyncError> {
        self.lock()?.playlists.insert(playlist.id, playlist.clone());
        Ok(())
    }

    async fn load_playlist(&self, id: Uuid) -> Result<Option<Playlist>, SyncError> {
        Ok(self.lock()?.playlists.get(&id).cloned())
    }

    async fn list_playlists(&self) -> Result<Vec<Playlist>, SyncError> {
        Ok(self.lock()?.playlists.values().cloned().collect())
    }

    async fn remove_playlist(&self, id: Uuid) -> Result<bool, SyncError> {
        let mut state = self.lock()?;
        state.catalogs.remove(&id);
        state.favorites.remove(&id);
        Ok(state.playlists.remove(&id).is_some())
    }

    async fn load_snapshot(&self, playlist_id: Uuid) -> Result<CatalogSnapshot, SyncError> {
        let mut state = self.lock()?;
        state.snapshot_loads += 1;
        Ok(state.catalogs.get(&playlist_id).cloned().unwrap_or_default())
    }

    async fn apply_changeset(
        &self,
        playlist_id: Uuid,
        changeset: &SyncChangeset,
        next: &CatalogSnapshot,
        outcome: &CycleOutcome,
    ) -> Result<(), SyncError> {
        let mut state = self.lock()?;
        if !state.playlists.contains_key(&playlist_id) {
            return Err(SyncError::NotFound(playlist_id));
        }

        let favorites: HashSet<String> = state
            .favorites
            .get(&playlist_id)
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        let removals = ChannelRemovals::plan(changeset, &favorites, self.policy);

        // Work on a copy so a half-applied set is never visible
        let mut catalog = state.catalogs.get(&playlist_id).cloned().unwrap_or_default();
        apply_to_snapshot(&mut catalog, changeset, next, &removals);
        state.catalogs.insert(playlist_id, catalog);

        if let Some(playlist) = state.playlists.get_mut(&playlist_id) {
            playlist.last_synced_at = Some(outcome.synced_at);
            playlist.status = SyncStatus::Idle;
            playlist.last_error = None;
            playlist.dropped_records = outcome.dropped_records;
        }
        state.applied += 1;

        debug!(
            "Applied changeset for {}: {} changes, {} kept as stale",
            playlist_id,
            changeset.len(),
            removals.mark_stale.len()
        );
        Ok(())
    }

    async fn update_status(
        &self,
        playlist_id: Uuid,
        status: SyncStatus,
        last_error: Option<&str>,
    ) -> Result<(), SyncError> {
        let mut state = self.lock()?;
        let playlist = state
            .playlists
            .get_mut(&playlist_id)
            .ok_or(SyncError::NotFound(playlist_id))?;
        playlist.status = status;
        playlist.last_error = last_error.map(String::from);
        Ok(())
    }

    async fn add_favorite(&self, playlist_id: Uuid, channel_id: &str) -> Result<Favorite, SyncError> {
        let mut state = self.lock()?;
        if !state.playlists.contains_key(&playlist_id) {
            return Err(SyncError::NotFound(playlist_id));
        }
        let favorite = state
            .favorites
            .entry(playlist_id)
            .or_default()
            .entry(channel_id.to_string())
            .or_insert_with(|| Favorite {
                playlist_id,
                channel_id: channel_id.to_string(),
                added_at: Utc::now(),
            })
            .clone();
        Ok(favorite)
    }

    async fn remove_favorite(&self, playlist_id: Uuid, channel_id: &str) -> Result<bool, SyncError> {
        let mut state = self.lock()?;
        Ok(state
            .favorites
            .get_mut(&playlist_id)
            .map(|f| f.remove(channel_id).is_some())
            .unwrap_or(false))
    }

    async fn favorites(&self, playlist_id: Uuid) -> Result<Vec<Favorite>, SyncError> {
        Ok(self
            .lock()?
            .favorites
            .get(&playlist_id)
            .map(|f| f.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlaylistSource;

    #[tokio::test]
    async fn test_favorites_are_per_playlist_and_unique() {
        let store = MemoryStore::default();
        let playlist = Playlist::new("Home", PlaylistSource::M3uUrl { url: "http://x".into() });
        store.save_playlist(&playlist).await.unwrap();

        let first = store.add_favorite(playlist.id, "m3u-1").await.unwrap();
        let again = store.add_favorite(playlist.id, "m3u-1").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(store.favorites(playlist.id).await.unwrap().len(), 1);

        assert!(store.remove_favorite(playlist.id, "m3u-1").await.unwrap());
        assert!(!store.remove_favorite(playlist.id, "m3u-1").await.unwrap());

        let missing = store.add_favorite(Uuid::new_v4(), "x").await.unwrap_err();
        assert!(matches!(missing, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_playlist_drops_everything() {
        let store = MemoryStore::default();
        let playlist = Playlist::new("Home", PlaylistSource::M3uUrl { url: "http://x".into() });
        store.save_playlist(&playlist).await.unwrap();
        store.add_favorite(playlist.id, "a").await.unwrap();

        assert!(store.remove_playlist(playlist.id).await.unwrap());
        assert!(store.load_playlist(playlist.id).await.unwrap().is_none());
        assert!(store.favorites(playlist.id).await.unwrap().is_empty());
    }
}
