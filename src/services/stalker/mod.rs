//! Stalker Portal (Ministra) Integration
//!
//! Session handshake, paginated live channel listing, bulk EPG and
//! on-demand stream links over the portal's `load.php` API.

pub mod client;
pub mod types;

pub use client::{StalkerClient, StalkerError};
pub use types::{stream_url_from_cmd, StalkerChannel, StalkerCredentials, StalkerGenre, StalkerProfile};
