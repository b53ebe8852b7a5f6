//! PostgreSQL store
//!
//! One transaction per changeset: upserts, removals, stale markings and the
//! playlist's sync bookkeeping commit together or not at all.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use super::{ChannelRemovals, CycleOutcome, PersistencePort};
use crate::config::{Config, RemovalPolicy};
use crate::db::repository::{catalog, favorites, playlists, CatalogWriter};
use crate::db::{create_pool, health_check, run_migrations};
use crate::error::SyncError;
use crate::models::{CatalogSnapshot, Favorite, Playlist, SyncChangeset, SyncStatus};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    policy: RemovalPolicy,
}

impl PgStore {
    pub fn new(pool: PgPool, policy: RemovalPolicy) -> Self {
        Self { pool, policy }
    }

    /// Connect with the configured pool size and bring the schema up to date
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = create_pool(config).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool, config.removal_policy))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn is_healthy(&self) -> bool {
        health_check(&self.pool).await
    }

    async fn write_changeset(
        &self,
        playlist_id: Uuid,
        changeset: &SyncChangeset,
        next: &CatalogSnapshot,
        outcome: &CycleOutcome,
    ) -> anyhow::Result<()> {
        let mut writer = CatalogWriter::new(&self.pool, playlist_id)
            .await
            .context("failed to open changeset transaction")?;

        let favorite_ids: HashSet<String> = favorites::channel_ids(writer.conn(), playlist_id)
            .await
            .context("failed to load favorites")?
            .into_iter()
            .collect();
        let removals = ChannelRemovals::plan(changeset, &favorite_ids, self.policy);

        let categories: Vec<_> = changeset
            .categories
            .upserts()
            .filter_map(|id| next.categories.get(id))
            .collect();
        writer
            .upsert_categories(&categories)
            .await
            .context("failed to write categories")?;

        let wanted: HashSet<&str> = changeset.channels.upserts().collect();
        let channels: Vec<_> = next
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| wanted.contains(c.id.as_str()))
            .collect();
        writer
            .upsert_channels(&channels)
            .await
            .context("failed to write channels")?;

        writer
            .delete_channels(&removals.delete)
            .await
            .context("failed to delete channels")?;
        writer
            .mark_channels_stale(&removals.mark_stale)
            .await
            .context("failed to mark channels stale")?;

        let order: Vec<&str> = next.channels.ids().collect();
        writer
            .reorder_channels(&order)
            .await
            .context("failed to reorder channels")?;

        let removed_categories: Vec<String> = changeset.categories.removed.iter().cloned().collect();
        writer
            .delete_unreferenced_categories(&removed_categories)
            .await
            .context("failed to delete categories")?;

        let entries: Vec<_> = changeset
            .epg
            .upserts()
            .filter_map(|id| next.epg.get(id))
            .collect();
        writer.upsert_epg(&entries).await.context("failed to write EPG")?;
        let removed_epg: Vec<String> = changeset.epg.removed.iter().cloned().collect();
        writer
            .delete_epg(&removed_epg)
            .await
            .context("failed to delete EPG entries")?;

        let found = playlists::record_sync(writer.conn(), playlist_id, outcome.synced_at, outcome.dropped_records)
            .await
            .context("failed to record sync")?;
        if !found {
            // Dropping the writer rolls the transaction back
            anyhow::bail!("playlist {} disappeared during sync", playlist_id);
        }

        let rows = writer.finish().await.context("failed to commit changeset")?;
        info!(
            "Changeset committed for {}: {} rows written, {} deleted, {} kept as stale",
            playlist_id,
            rows,
            removals.delete.len(),
            removals.mark_stale.len()
        );
        Ok(())
    }
}

#[async_trait]
impl PersistencePort for PgStore {
    async fn save_playlist(&self, playlist: &Playlist) -> Result<(), SyncError> {
        playlists::upsert_playlist(&self.pool, playlist)
            .await
            .context("failed to save playlist")?;
        Ok(())
    }

    async fn load_playlist(&self, id: Uuid) -> Result<Option<Playlist>, SyncError> {
        let row = playlists::find_by_id(&self.pool, id)
            .await
            .context("failed to load playlist")?;
        Ok(row.map(Playlist::from))
    }

    async fn list_playlists(&self) -> Result<Vec<Playlist>, SyncError> {
        let rows = playlists::list_all(&self.pool)
            .await
            .context("failed to list playlists")?;
        Ok(rows.into_iter().map(Playlist::from).collect())
    }

    async fn remove_playlist(&self, id: Uuid) -> Result<bool, SyncError> {
        Ok(playlists::delete_playlist(&self.pool, id)
            .await
            .context("failed to delete playlist")?)
    }

    async fn load_snapshot(&self, playlist_id: Uuid) -> Result<CatalogSnapshot, SyncError> {
        let categories = catalog::get_categories(&self.pool, playlist_id)
            .await
            .context("failed to load categories")?;
        let channels = catalog::get_channels(&self.pool, playlist_id)
            .await
            .context("failed to load channels")?;
        let epg = catalog::get_epg(&self.pool, playlist_id)
            .await
            .context("failed to load EPG")?;

        Ok(CatalogSnapshot {
            categories: categories.into_iter().map(Into::into).collect(),
            channels: channels.into_iter().map(Into::into).collect(),
            epg: epg.into_iter().map(Into::into).collect(),
        })
    }

    async fn apply_changeset(
        &self,
        playlist_id: Uuid,
        changeset: &SyncChangeset,
        next: &CatalogSnapshot,
        outcome: &CycleOutcome,
    ) -> Result<(), SyncError> {
        Ok(self.write_changeset(playlist_id, changeset, next, outcome).await?)
    }

    async fn update_status(
        &self,
        playlist_id: Uuid,
        status: SyncStatus,
        last_error: Option<&str>,
    ) -> Result<(), SyncError> {
        let found = playlists::update_status(&self.pool, playlist_id, status, last_error)
            .await
            .context("failed to update sync status")?;
        if found {
            Ok(())
        } else {
            Err(SyncError::NotFound(playlist_id))
        }
    }

    async fn add_favorite(&self, playlist_id: Uuid, channel_id: &str) -> Result<Favorite, SyncError> {
        if self.load_playlist(playlist_id).await?.is_none() {
            return Err(SyncError::NotFound(playlist_id));
        }
        let row = favorites::add(&self.pool, playlist_id, channel_id)
            .await
            .context("failed to add favorite")?;
        Ok(row.into())
    }

    async fn remove_favorite(&self, playlist_id: Uuid, channel_id: &str) -> Result<bool, SyncError> {
        Ok(favorites::remove(&self.pool, playlist_id, channel_id)
            .await
            .context("failed to remove favorite")?)
    }

    async fn favorites(&self, playlist_id: Uuid) -> Result<Vec<Favorite>, SyncError> {
        let rows = favorites::get_by_playlist(&self.pool, playlist_id)
            .await
            .context("failed to load favorites")?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
