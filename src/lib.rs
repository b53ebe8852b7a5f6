//! Playlist ingestion and sync core for IPTV sources.
//!
//! M3U playlists, Xtream Codes panels and Stalker portals are fetched,
//! normalized into one catalog of categories, channels and programmes, and
//! kept in sync with a persistence backend through minimal changesets.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ativeplay_sync::{Config, MemoryStore, NetworkFetcher, PlaylistSource, SyncEngine};
//!
//! # async fn run() -> Result<(), ativeplay_sync::SyncError> {
//! let config = Config::from_env();
//! let store = Arc::new(MemoryStore::new(config.removal_policy));
//! let fetcher = Arc::new(NetworkFetcher::new(&config)?);
//! let engine = SyncEngine::new(store, fetcher, &config);
//!
//! let playlist = engine
//!     .import("Home", PlaylistSource::M3uUrl { url: "http://example.com/list.m3u".into() })
//!     .await?;
//! let changeset = engine.sync(playlist.id).await?;
//! println!("{} channels added", changeset.channels.added.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod services;
pub mod telemetry;

pub use config::{Config, RemovalPolicy};
pub use error::{ParseError, SyncError, ValidationError};
pub use models::{
    CatalogSnapshot, Category, CatchUp, Channel, DropReason, DropReport, EntityDiff, EntityMap, EpgEntry, Favorite,
    MediaKind, Playlist, PlaylistSource, SourceKind, SyncChangeset, SyncStatus,
};
pub use persistence::{MemoryStore, PersistencePort, PgStore};
pub use services::epg::EpgIndex;
pub use services::fetcher::{NetworkFetcher, SourceFetcher};
pub use services::scheduler::{start_refresh_task, RefreshConfig};
pub use services::sync::SyncEngine;
