use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::stalker::StalkerCredentials;
use crate::services::xtream::XtreamCredentials;

/// Kind of source a playlist was imported from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    M3uFile,
    M3uUrl,
    Xtream,
    Stalker,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::M3uFile => write!(f, "m3u-file"),
            SourceKind::M3uUrl => write!(f, "m3u-url"),
            SourceKind::Xtream => write!(f, "xtream"),
            SourceKind::Stalker => write!(f, "stalker"),
        }
    }
}

/// Connection parameters, opaque per source kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PlaylistSource {
    M3uFile { path: String },
    M3uUrl { url: String },
    Xtream(XtreamCredentials),
    Stalker(StalkerCredentials),
}

impl PlaylistSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            PlaylistSource::M3uFile { .. } => SourceKind::M3uFile,
            PlaylistSource::M3uUrl { .. } => SourceKind::M3uUrl,
            PlaylistSource::Xtream(_) => SourceKind::Xtream,
            PlaylistSource::Stalker(_) => SourceKind::Stalker,
        }
    }
}

/// Sync state machine: `idle -> syncing -> {idle, error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncStatus::Idle),
            "syncing" => Ok(SyncStatus::Syncing),
            "error" => Ok(SyncStatus::Error),
            other => Err(format!("unknown sync status `{}`", other)),
        }
    }
}

/// Imported playlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: Uuid,
    pub name: String,
    pub source: PlaylistSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Records dropped during the last successful cycle
    #[serde(default)]
    pub dropped_records: usize,
}

impl Playlist {
    /// Create a playlist on import, with a fresh id and no sync history
    pub fn new(name: impl Into<String>, source: PlaylistSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source,
            last_synced_at: None,
            status: SyncStatus::Idle,
            last_error: None,
            dropped_records: 0,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.source.kind()
    }
}

/// A favorited channel; lives apart from the channel so re-syncs never drop it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub playlist_id: Uuid,
    pub channel_id: String,
    pub added_at: DateTime<Utc>,
}
