//! Xtream Codes API Client
//!
//! HTTP client for the Xtream Codes Player API v2. Every call carries the
//! credentials as URL-encoded query parameters and goes through the shared
//! retry policy. The two big lists (live and VOD streams) are decoded
//! incrementally; everything else is small enough to read whole.

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::*;
use crate::error::SyncError;
use crate::models::{DropReason, DropReport};
use crate::services::http::{read_body_limited, send_with_retry, FetchError, RetryPolicy};
use crate::services::json_stream::{for_each_element, ElementStream};
use crate::services::records::RawProgramme;

/// Small JSON answers (auth, categories, short EPG) are capped at this size
const SMALL_BODY_LIMIT_MB: usize = 64;

/// Xtream API Error types
#[derive(Debug, Clone, Error)]
pub enum XtreamError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Credentials rejected or account not active
    #[error("xtream account rejected: {0}")]
    Auth(String),
    /// Server answered with something that is not the expected JSON
    #[error("invalid xtream response for `{action}`: {message}")]
    Parse { action: String, message: String },
}

impl From<XtreamError> for SyncError {
    fn from(err: XtreamError) -> Self {
        match err {
            XtreamError::Fetch(e) => e.into(),
            XtreamError::Auth(message) => SyncError::Auth(message),
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

/// A list read in one piece, with the elements that failed to decode
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub skipped: usize,
}

/// Xtream API Client
pub struct XtreamClient {
    http: Client,
    credentials: XtreamCredentials,
    retry: RetryPolicy,
}

impl XtreamClient {
    pub fn new(http: Client, credentials: XtreamCredentials, retry: RetryPolicy) -> Self {
        Self {
            http,
            credentials,
            retry,
        }
    }

    pub fn credentials(&self) -> &XtreamCredentials {
        &self.credentials
    }

    fn query(&self, action: Option<&str>, params: &[(&str, String)]) -> Vec<(String, String)> {
        let mut query = vec![
            ("username".to_string(), self.credentials.username.clone()),
            ("password".to_string(), self.credentials.password.clone()),
        ];
        if let Some(action) = action {
            query.push(("action".to_string(), action.to_string()));
        }
        query.extend(params.iter().map(|(k, v)| (k.to_string(), v.clone())));
        query
    }

    /// Send a player_api.php request with optional action parameter
    async fn send(&self, action: Option<&str>, params: &[(&str, String)]) -> Result<Response, XtreamError> {
        let url = self.credentials.api_endpoint();
        let query = self.query(action, params);

        debug!("Xtream API request: {}", action.unwrap_or("auth"));

        let response = send_with_retry(&self.retry, "xtream", || self.http.get(&url).query(&query)).await?;
        Ok(response)
    }

    async fn read_json_bytes(&self, action: &str, response: Response) -> Result<Vec<u8>, XtreamError> {
        let body = read_body_limited(response, SMALL_BODY_LIMIT_MB).await?;

        // Some servers return HTML error pages instead of JSON
        let head = body.iter().find(|b| !b.is_ascii_whitespace());
        if head == Some(&b'<') {
            return Err(XtreamError::Parse {
                action: action.to_string(),
                message: "server returned HTML instead of JSON".to_string(),
            });
        }
        Ok(body)
    }

    /// GET a single JSON object
    async fn get<T: DeserializeOwned>(&self, action: Option<&str>, params: &[(&str, String)]) -> Result<T, XtreamError> {
        let label = action.unwrap_or("auth");
        let response = self.send(action, params).await?;
        let body = self.read_json_bytes(label, response).await?;

        serde_json::from_slice(&body).map_err(|e| {
            debug!(
                "Response text: {}",
                String::from_utf8_lossy(&body[..body.len().min(500)])
            );
            XtreamError::Parse {
                action: label.to_string(),
                message: e.to_string(),
            }
        })
    }

    /// GET a JSON list (array, id-keyed object, null or empty body), skipping bad elements
    async fn get_list<T: DeserializeOwned>(&self, action: &str, params: &[(&str, String)]) -> Result<Listing<T>, XtreamError> {
        let response = self.send(Some(action), params).await?;
        let body = self.read_json_bytes(action, response).await?;

        let mut items = Vec::new();
        let mut skipped = 0;
        for_each_element(body.as_slice(), |value| {
            match serde_json::from_value::<T>(value) {
                Ok(item) => items.push(item),
                Err(e) => {
                    skipped += 1;
                    debug!("Skipping malformed `{}` element: {}", action, e);
                }
            }
            true
        })
        .map_err(|e| XtreamError::Parse {
            action: action.to_string(),
            message: e.to_string(),
        })?;

        if skipped > 0 {
            warn!("Xtream `{}`: skipped {} malformed element(s)", action, skipped);
        }
        Ok(Listing { items, skipped })
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// Validate credentials: `user_info.auth` must not be 0 and the account must be active
    pub async fn authenticate(&self) -> Result<XtreamAuthResponse, XtreamError> {
        let auth: XtreamAuthResponse = self.get(None, &[]).await?;

        if !auth.user_info.is_authenticated() {
            return Err(XtreamError::Auth("invalid username or password".to_string()));
        }
        if !auth.user_info.is_active() {
            return Err(XtreamError::Auth(format!(
                "account not active (status: {})",
                if auth.user_info.status.is_empty() { "unknown" } else { auth.user_info.status.as_str() }
            )));
        }

        info!(
            "Xtream credentials validated. Account: {}, Expires: {:?}, Timezone: {:?}",
            auth.user_info.username,
            auth.user_info.exp_date,
            auth.timezone()
        );
        Ok(auth)
    }

    // ========================================================================
    // Categories
    // ========================================================================

    pub async fn live_categories(&self) -> Result<Listing<XtreamCategory>, XtreamError> {
        self.get_list("get_live_categories", &[]).await
    }

    pub async fn vod_categories(&self) -> Result<Listing<XtreamCategory>, XtreamError> {
        self.get_list("get_vod_categories", &[]).await
    }

    pub async fn series_categories(&self) -> Result<Listing<XtreamCategory>, XtreamError> {
        self.get_list("get_series_categories", &[]).await
    }

    // ========================================================================
    // Streams
    // ========================================================================

    /// All live streams, decoded element by element as the body arrives
    pub async fn live_streams(&self) -> Result<ElementStream<XtreamLiveStream>, XtreamError> {
        let response = self.send(Some("get_live_streams"), &[]).await?;
        Ok(ElementStream::from_response(response))
    }

    /// All VOD streams, decoded element by element as the body arrives
    pub async fn vod_streams(&self) -> Result<ElementStream<XtreamVodStream>, XtreamError> {
        let response = self.send(Some("get_vod_streams"), &[]).await?;
        Ok(ElementStream::from_response(response))
    }

    pub async fn series(&self) -> Result<Listing<XtreamSeries>, XtreamError> {
        self.get_list("get_series", &[]).await
    }

    // ========================================================================
    // EPG
    // ========================================================================

    /// Short EPG for a stream (next few programmes)
    pub async fn short_epg(&self, stream_id: i64, limit: Option<u32>) -> Result<XtreamEpgListings, XtreamError> {
        let mut params = vec![("stream_id", stream_id.to_string())];
        if let Some(limit) = limit {
            params.push(("limit", limit.to_string()));
        }
        self.get(Some("get_short_epg"), &params).await
    }

    /// Full stored EPG for a stream
    pub async fn simple_data_table(&self, stream_id: i64) -> Result<XtreamEpgListings, XtreamError> {
        self.get(Some("get_simple_data_table"), &[("stream_id", stream_id.to_string())])
            .await
    }

    /// Per-channel EPG decoded into programmes keyed by `channel_ref`
    pub async fn channel_programmes(
        &self,
        stream_id: i64,
        channel_ref: &str,
        report: &mut DropReport,
    ) -> Result<Vec<RawProgramme>, XtreamError> {
        let listings = self.simple_data_table(stream_id).await?;
        let mut programmes = Vec::with_capacity(listings.epg_listings.len());
        for entry in &listings.epg_listings {
            match entry.to_programme(channel_ref) {
                Some(programme) => programmes.push(programme),
                None => report.record(DropReason::MalformedRecord),
            }
        }
        Ok(programmes)
    }

    /// Bulk XMLTV guide from xmltv.php
    pub async fn xmltv(&self, limit_mb: usize) -> Result<Vec<u8>, XtreamError> {
        let url = self.credentials.xmltv_endpoint();
        let query = self.query(None, &[]);

        debug!("Xtream XMLTV request");
        let response = send_with_retry(&self.retry, "xtream", || self.http.get(&url).query(&query)).await?;
        Ok(read_body_limited(response, limit_mb).await?)
    }
}

/// Drain an element stream into a vector, counting elements that failed to decode.
///
/// A body that breaks off mid-list fails the whole call: a truncated list
/// must not be mistaken for the full catalog.
pub async fn drain_stream<T>(
    action: &str,
    mut stream: ElementStream<T>,
    report: &mut DropReport,
) -> Result<Vec<T>, XtreamError>
where
    T: DeserializeOwned + Send + 'static,
{
    let mut items = Vec::new();
    let mut skipped = 0usize;
    while let Some(item) = stream.next().await {
        match item {
            Ok(item) => items.push(item),
            Err(e) => {
                skipped += 1;
                debug!("Skipping malformed `{}` element: {}", action, e);
            }
        }
    }

    stream.finish().await.map_err(|message| XtreamError::Parse {
        action: action.to_string(),
        message,
    })?;

    if skipped > 0 {
        warn!("Xtream `{}`: skipped {} malformed element(s)", action, skipped);
        report.add(DropReason::MalformedRecord, skipped);
    }
    Ok(items)
}
