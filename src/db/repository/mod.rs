//! Database repositories
//!
//! Repository pattern for database access, separating data access logic
//! from the sync engine.

pub mod catalog;
pub mod favorites;
pub mod playlists;

// Re-export commonly used items
pub use catalog::CatalogWriter;
