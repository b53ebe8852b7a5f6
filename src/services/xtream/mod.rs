//! Xtream Codes Integration
//!
//! This module provides integration with Xtream Codes Player API v2.
//!
//! - **Detection**: Identify Xtream URLs from M3U playlist URLs
//! - **Validation**: Verify credentials against Xtream servers
//! - **API Client**: Categories, streams, series and EPG endpoints
//!
//! # Usage
//!
//! ```rust,ignore
//! use ativeplay_sync::services::xtream::{drain_stream, XtreamClient, XtreamCredentials};
//!
//! let client = XtreamClient::new(http, XtreamCredentials::new(server, user, pass), retry);
//! let auth = client.authenticate().await?;
//! let streams = drain_stream("get_live_streams", client.live_streams().await?, &mut report).await?;
//! ```

pub mod client;
pub mod detector;
pub mod types;

pub use client::{drain_stream, Listing, XtreamClient, XtreamError};
pub use detector::{extract_credentials, source_from_url};
pub use types::{
    XtreamAuthResponse, XtreamCategory, XtreamCredentials, XtreamEpgEntry, XtreamEpgListings,
    XtreamLiveStream, XtreamSeries, XtreamServerInfo, XtreamUserInfo, XtreamVodStream,
};
