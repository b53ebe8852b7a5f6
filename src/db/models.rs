//! Database row types for PostgreSQL
//!
//! These types map directly to database rows and convert into the
//! canonical entities in `models/`.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{Category, CatchUp, Channel, EpgEntry, Favorite, MediaKind, Playlist, PlaylistSource};

/// Playlist row from database
#[derive(Debug, Clone, FromRow)]
pub struct PlaylistRow {
    pub id: Uuid,
    pub name: String,
    pub source: Json<PlaylistSource>,
    pub status: String,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub dropped_records: i32,
}

impl From<PlaylistRow> for Playlist {
    fn from(row: PlaylistRow) -> Self {
        Playlist {
            id: row.id,
            name: row.name,
            source: row.source.0,
            last_synced_at: row.last_synced_at,
            status: row.status.parse().unwrap_or_default(),
            last_error: row.last_error,
            dropped_records: row.dropped_records.max(0) as usize,
        }
    }
}

/// Category row from database
#[derive(Debug, Clone, FromRow)]
pub struct CategoryRow {
    pub id: String,
    pub name: String,
    pub sort_order: i32,
    pub media_kind: String,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Category {
            id: row.id,
            name: row.name,
            order: row.sort_order.max(0) as u32,
            media_kind: MediaKind::parse(&row.media_kind),
        }
    }
}

/// Channel row from database
#[derive(Debug, Clone, FromRow)]
pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    pub logo_url: Option<String>,
    pub category_id: String,
    pub epg_id: Option<String>,
    pub media_kind: String,
    pub channel_number: Option<i32>,
    pub catchup: Option<Json<CatchUp>>,
    pub stale: bool,
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel {
            id: row.id,
            name: row.name,
            stream_url: row.stream_url,
            logo_url: row.logo_url,
            category_id: row.category_id,
            epg_id: row.epg_id,
            media_kind: MediaKind::parse(&row.media_kind),
            number: row.channel_number.and_then(|n| u32::try_from(n).ok()),
            catchup: row.catchup.map(|c| c.0),
            stale: row.stale,
        }
    }
}

/// EPG entry row from database
#[derive(Debug, Clone, FromRow)]
pub struct EpgRow {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub description: Option<String>,
}

impl From<EpgRow> for EpgEntry {
    fn from(row: EpgRow) -> Self {
        EpgEntry {
            id: row.id,
            channel_id: row.channel_id,
            title: row.title,
            start: row.start_at,
            end: row.end_at,
            description: row.description,
        }
    }
}

/// Favorite row from database
#[derive(Debug, Clone, FromRow)]
pub struct FavoriteRow {
    pub playlist_id: Uuid,
    pub channel_id: String,
    pub added_at: DateTime<Utc>,
}

impl From<FavoriteRow> for Favorite {
    fn from(row: FavoriteRow) -> Self {
        Favorite {
            playlist_id: row.playlist_id,
            channel_id: row.channel_id,
            added_at: row.added_at,
        }
    }
}
