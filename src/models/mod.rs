//! Canonical data model

pub mod catalog;
pub mod changeset;
pub mod playlist;
pub mod report;

pub use catalog::{CatalogSnapshot, Category, CatchUp, Channel, Entity, EntityMap, EpgEntry, MediaKind};
pub use changeset::{EntityDiff, SyncChangeset};
pub use playlist::{Favorite, Playlist, PlaylistSource, SourceKind, SyncStatus};
pub use report::{DropReason, DropReport};
