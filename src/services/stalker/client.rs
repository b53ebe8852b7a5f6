//! Stalker Portal API Client
//!
//! Session based: a handshake returns a token which is then authorized
//! (`do_auth` when a login is configured, then `get_profile`). Every data call
//! sends the token as a bearer header together with the MAC cookie. When the
//! portal reports the session as expired, the handshake is re-run once and the
//! call retried once; a second expiry in the same cycle is fatal.

use async_stream::try_stream;
use futures::{pin_mut, Stream, StreamExt};
use reqwest::header::{COOKIE, USER_AGENT};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::*;
use crate::error::SyncError;
use crate::models::{DropReason, DropReport};
use crate::services::http::{read_body_limited, send_with_retry, FetchError, RetryPolicy};
use crate::services::records::GuideRecords;

const MAG_USER_AGENT: &str =
    "Mozilla/5.0 (QtEmbedded; U; Linux; C) AppleWebKit/533.3 (KHTML, like Gecko) MAG200 stbapp ver: 2 rev: 250 Safari/533.3";
const MAG_X_USER_AGENT: &str = "Model: MAG250; Link: WiFi";

/// Handshake re-runs allowed per sync cycle
const SESSION_REFRESHES_PER_CYCLE: u32 = 1;

/// Portal answers are paged or per-call; EPG for a day is the largest
const BODY_LIMIT_MB: usize = 128;

const AUTH_FAILED_MARKER: &[u8] = b"Authorization failed";

#[derive(Debug, Clone, Error)]
pub enum StalkerError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// MAC not registered, login rejected or profile refused
    #[error("portal rejected the device: {0}")]
    Auth(String),
    /// Session token no longer accepted
    #[error("portal session expired")]
    SessionExpired,
    /// Session expired again after the refresh budget was used
    #[error("{0}")]
    Session(String),
    #[error("unexpected portal response for `{action}`: {message}")]
    Protocol { action: String, message: String },
    #[error("channel listing cancelled")]
    Cancelled,
}

impl From<StalkerError> for SyncError {
    fn from(err: StalkerError) -> Self {
        match err {
            StalkerError::Fetch(e) => e.into(),
            StalkerError::Auth(message) => SyncError::Auth(message),
            StalkerError::SessionExpired => SyncError::Session("portal session expired".to_string()),
            StalkerError::Session(message) => SyncError::Session(message),
            StalkerError::Cancelled => SyncError::Cancelled,
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

#[derive(Debug)]
struct Session {
    token: Option<String>,
    refreshes_left: u32,
}

/// Stalker API Client
pub struct StalkerClient {
    http: Client,
    credentials: StalkerCredentials,
    retry: RetryPolicy,
    endpoint: String,
    session: Mutex<Session>,
}

fn protocol(action: &str, message: impl ToString) -> StalkerError {
    StalkerError::Protocol {
        action: action.to_string(),
        message: message.to_string(),
    }
}

fn action_of<'a>(params: &'a [(&str, String)]) -> &'a str {
    params
        .iter()
        .find(|(k, _)| *k == "action")
        .map(|(_, v)| v.as_str())
        .unwrap_or("?")
}

fn is_auth_failure(body: &[u8]) -> bool {
    body.windows(AUTH_FAILED_MARKER.len())
        .any(|w| w.eq_ignore_ascii_case(AUTH_FAILED_MARKER))
}

/// Decode each element of a JSON array, counting the ones that do not fit `T`
fn decode_list<T: DeserializeOwned>(value: Value, report: &mut DropReport) -> Vec<T> {
    let elements = match value {
        Value::Array(elements) => elements,
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        _ => Vec::new(),
    };
    let mut items = Vec::with_capacity(elements.len());
    for element in elements {
        match serde_json::from_value(element) {
            Ok(item) => items.push(item),
            Err(e) => {
                debug!("Skipping malformed portal element: {}", e);
                report.record(DropReason::MalformedRecord);
            }
        }
    }
    items
}

impl StalkerClient {
    pub fn new(http: Client, credentials: StalkerCredentials, retry: RetryPolicy) -> Self {
        let endpoint = credentials.load_url();
        Self {
            http,
            credentials,
            retry,
            endpoint,
            session: Mutex::new(Session {
                token: None,
                refreshes_left: SESSION_REFRESHES_PER_CYCLE,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Restore the session refresh budget; called at the start of each sync cycle
    pub fn begin_cycle(&self) {
        if let Ok(mut session) = self.session.lock() {
            session.refreshes_left = SESSION_REFRESHES_PER_CYCLE;
        }
    }

    fn token(&self) -> Option<String> {
        self.session.lock().ok().and_then(|s| s.token.clone())
    }

    fn set_token(&self, token: &str) {
        if let Ok(mut session) = self.session.lock() {
            session.token = Some(token.to_string());
        }
    }

    fn take_refresh(&self) -> bool {
        match self.session.lock() {
            Ok(mut session) if session.refreshes_left > 0 => {
                session.refreshes_left -= 1;
                true
            }
            _ => false,
        }
    }

    fn cookie(&self) -> String {
        format!(
            "mac={}; stb_lang=en; timezone=UTC",
            urlencoding::encode(&self.credentials.mac)
        )
    }

    /// One `load.php` exchange, returning the `js` payload
    async fn request(&self, token: Option<&str>, params: &[(&str, String)]) -> Result<Value, StalkerError> {
        let action = action_of(params);
        let mut query: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        query.push(("JsHttpRequest", "1-xml"));
        let cookie = self.cookie();

        debug!("Stalker request: {}", action);

        let result = send_with_retry(&self.retry, "stalker", || {
            let request = self
                .http
                .get(&self.endpoint)
                .query(&query)
                .header(USER_AGENT, MAG_USER_AGENT)
                .header("X-User-Agent", MAG_X_USER_AGENT)
                .header(COOKIE, cookie.as_str());
            match token {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        })
        .await;

        let response = match result {
            Ok(response) => response,
            Err(FetchError::Unauthorized(401)) if token.is_some() => return Err(StalkerError::SessionExpired),
            Err(FetchError::Unauthorized(status)) => {
                return Err(StalkerError::Auth(format!("HTTP {} on `{}`", status, action)))
            }
            Err(e) => return Err(e.into()),
        };

        let body = read_body_limited(response, BODY_LIMIT_MB).await?;
        if is_auth_failure(&body) {
            return Err(if token.is_some() {
                StalkerError::SessionExpired
            } else {
                StalkerError::Auth("authorization failed during handshake".to_string())
            });
        }

        let envelope: Envelope = serde_json::from_slice(&body).map_err(|e| protocol(action, e))?;
        Ok(envelope.js)
    }

    async fn handshake(&self) -> Result<String, StalkerError> {
        let js = self
            .request(
                None,
                &[
                    ("type", "stb".into()),
                    ("action", "handshake".into()),
                    ("token", String::new()),
                    ("prehash", "0".into()),
                ],
            )
            .await?;

        let handshake: HandshakeResponse = serde_json::from_value(js).map_err(|e| protocol("handshake", e))?;
        if handshake.token.is_empty() {
            return Err(StalkerError::Auth("portal returned no session token".to_string()));
        }
        Ok(handshake.token)
    }

    async fn authorize(&self, token: &str) -> Result<StalkerProfile, StalkerError> {
        if let Some((login, password)) = self.credentials.login() {
            let js = self
                .request(
                    Some(token),
                    &[
                        ("type", "stb".into()),
                        ("action", "do_auth".into()),
                        ("login", login.into()),
                        ("password", password.into()),
                        ("device_id", self.credentials.device_id.clone().unwrap_or_default()),
                    ],
                )
                .await?;
            if js != Value::Bool(true) {
                return Err(StalkerError::Auth("portal rejected login".to_string()));
            }
        }

        let js = self
            .request(
                Some(token),
                &[
                    ("type", "stb".into()),
                    ("action", "get_profile".into()),
                    ("hd", "1".into()),
                    ("sn", self.credentials.serial()),
                    ("stb_type", "MAG250".into()),
                    ("device_id", self.credentials.device_id.clone().unwrap_or_default()),
                    ("device_id2", self.credentials.device_id.clone().unwrap_or_default()),
                    ("auth_second_step", "1".into()),
                ],
            )
            .await?;

        match js {
            Value::Object(_) => serde_json::from_value(js).map_err(|e| protocol("get_profile", e)),
            _ => Err(StalkerError::Auth("portal refused the device profile".to_string())),
        }
    }

    /// Run the handshake and authorize the new token
    pub async fn connect(&self) -> Result<StalkerProfile, StalkerError> {
        let token = self.handshake().await?;
        let profile = self.authorize(&token).await.map_err(|e| match e {
            StalkerError::SessionExpired => StalkerError::Auth("portal rejected the new session token".to_string()),
            other => other,
        })?;
        self.set_token(&token);

        info!(
            "Stalker session established at {} (profile: {:?})",
            self.endpoint, profile.name
        );
        Ok(profile)
    }

    async fn session_token(&self) -> Result<String, StalkerError> {
        if let Some(token) = self.token() {
            return Ok(token);
        }
        self.connect().await?;
        self.token()
            .ok_or_else(|| StalkerError::Session("no session token after handshake".to_string()))
    }

    /// Data call with one transparent session refresh per cycle
    async fn call(&self, params: &[(&str, String)]) -> Result<Value, StalkerError> {
        let token = self.session_token().await?;
        match self.request(Some(&token), params).await {
            Err(StalkerError::SessionExpired) => {
                let action = action_of(params);
                if !self.take_refresh() {
                    return Err(StalkerError::Session(format!(
                        "session expired again on `{}` after it was already refreshed this cycle",
                        action
                    )));
                }
                warn!("Stalker session expired on `{}`, re-running handshake", action);
                self.connect().await?;
                let token = self.session_token().await?;
                match self.request(Some(&token), params).await {
                    Err(StalkerError::SessionExpired) => Err(StalkerError::Session(format!(
                        "session expired again on `{}` right after refresh",
                        action
                    ))),
                    other => other,
                }
            }
            other => other,
        }
    }

    // ========================================================================
    // Live TV
    // ========================================================================

    pub async fn genres(&self, report: &mut DropReport) -> Result<Vec<StalkerGenre>, StalkerError> {
        let js = self
            .call(&[("type", "itv".into()), ("action", "get_genres".into())])
            .await?;
        Ok(decode_list(js, report))
    }

    /// Raw pages of `get_ordered_list`, checked for cancellation between pages.
    /// Stops at an empty page, once `total_items` were seen, or at `max_pages`.
    pub fn channel_pages<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        max_pages: u32,
    ) -> impl Stream<Item = Result<Vec<Value>, StalkerError>> + 'a {
        try_stream! {
            let mut page = 1u32;
            let mut seen = 0i64;
            loop {
                if cancel.is_cancelled() {
                    Err::<(), _>(StalkerError::Cancelled)?;
                }
                if page > max_pages {
                    warn!("Stalker channel list truncated at {} pages ({} channels)", max_pages, seen);
                    break;
                }

                let js = self
                    .call(&[
                        ("type", "itv".into()),
                        ("action", "get_ordered_list".into()),
                        ("genre", "*".into()),
                        ("fav", "0".into()),
                        ("sortby", "number".into()),
                        ("p", page.to_string()),
                    ])
                    .await?;
                let chunk: ChannelPage = serde_json::from_value(js)
                    .map_err(|e| protocol("get_ordered_list", e))?;

                if chunk.data.is_empty() {
                    break;
                }
                seen += chunk.data.len() as i64;
                let total = chunk.total_items;
                debug!("Stalker page {}: {} channels so far (total {:?})", page, seen, total);
                yield chunk.data;

                if matches!(total, Some(total) if seen >= total) {
                    break;
                }
                page += 1;
            }
        }
    }

    /// All channels across pages
    pub async fn channels(
        &self,
        cancel: &CancellationToken,
        max_pages: u32,
        report: &mut DropReport,
    ) -> Result<Vec<StalkerChannel>, StalkerError> {
        let pages = self.channel_pages(cancel, max_pages);
        pin_mut!(pages);

        let mut channels = Vec::new();
        while let Some(page) = pages.next().await {
            channels.extend(decode_list::<StalkerChannel>(Value::Array(page?), report));
        }
        Ok(channels)
    }

    /// Bulk EPG for all channels, keyed by the portal's channel id
    pub async fn epg_info(&self, period_hours: u32) -> Result<GuideRecords, StalkerError> {
        let js = self
            .call(&[
                ("type", "itv".into()),
                ("action", "get_epg_info".into()),
                ("period", period_hours.to_string()),
            ])
            .await?;

        let data = match js {
            Value::Object(mut map) if map.contains_key("data") => map.remove("data").unwrap_or_default(),
            other => other,
        };

        let mut guide = GuideRecords::default();
        if let Value::Object(map) = data {
            for (ch_id, entries) in map {
                let Value::Array(entries) = entries else {
                    continue;
                };
                for entry in entries {
                    let programme = serde_json::from_value::<StalkerEpgEntry>(entry)
                        .ok()
                        .and_then(|e| e.to_programme(&ch_id));
                    match programme {
                        Some(programme) => guide.programmes.push(programme),
                        None => guide.report.record(DropReason::MalformedRecord),
                    }
                }
            }
        }

        debug!("Stalker EPG: {} programmes", guide.programmes.len());
        Ok(guide)
    }

    /// Resolve a playable URL for a channel `cmd` (temporary links)
    pub async fn create_link(&self, cmd: &str) -> Result<String, StalkerError> {
        let js = self
            .call(&[
                ("type", "itv".into()),
                ("action", "create_link".into()),
                ("cmd", cmd.into()),
                ("forced_storage", "undefined".into()),
                ("disable_ad", "0".into()),
            ])
            .await?;

        js.get("cmd")
            .and_then(Value::as_str)
            .and_then(stream_url_from_cmd)
            .ok_or_else(|| protocol("create_link", "no cmd in response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_marker() {
        assert!(is_auth_failure(b"Authorization failed."));
        assert!(is_auth_failure(b"<html>authorization FAILED</html>"));
        assert!(!is_auth_failure(br#"{"js":{"token":"abc"}}"#));
    }

    #[test]
    fn test_refresh_budget_per_cycle() {
        let client = StalkerClient::new(
            Client::new(),
            StalkerCredentials::new("http://portal/c/", "00:1A:79:00:00:01"),
            RetryPolicy::none(),
        );
        assert!(client.take_refresh());
        assert!(!client.take_refresh());
        client.begin_cycle();
        assert!(client.take_refresh());
    }

    #[test]
    fn test_decode_list_counts_bad_elements() {
        let mut report = DropReport::new();
        let genres: Vec<StalkerGenre> = decode_list(
            serde_json::json!([{"id": "*", "title": "All"}, {"title": "no id"}, {"id": 3, "title": "News"}]),
            &mut report,
        );
        assert_eq!(genres.len(), 2);
        assert!(genres[0].is_catch_all());
        assert_eq!(report.count(DropReason::MalformedRecord), 1);
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(SyncError::from(StalkerError::SessionExpired), SyncError::Session(_)));
        assert!(matches!(SyncError::from(StalkerError::Cancelled), SyncError::Cancelled));
        assert!(matches!(SyncError::from(StalkerError::Auth("mac".into())), SyncError::Auth(_)));
    }
}
