//! Xtream Codes API Types
//!
//! Type definitions for Xtream Codes Player API v2 responses.
//!
//! Panels disagree about JSON types: ids arrive as numbers on one server and
//! as strings on the next, and empty values show up as `""`, `null` or are
//! missing entirely. Fields that vary go through the `lenient` decoders.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::services::lenient;
use crate::services::records::{RawProgramme, RawTime};

/// Server credentials, either configured directly or extracted from an M3U URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XtreamCredentials {
    /// Server base URL (e.g., "http://example.com:8080")
    pub server: String,
    pub username: String,
    pub password: String,
}

impl XtreamCredentials {
    pub fn new(server: &str, username: &str, password: &str) -> Self {
        Self {
            server: server.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn base(&self) -> &str {
        self.server.trim_end_matches('/')
    }

    fn path_credentials(&self) -> String {
        format!(
            "{}/{}",
            urlencoding::encode(&self.username),
            urlencoding::encode(&self.password)
        )
    }

    /// player_api.php endpoint, credentials go in the query
    pub fn api_endpoint(&self) -> String {
        format!("{}/player_api.php", self.base())
    }

    /// xmltv.php endpoint, credentials go in the query
    pub fn xmltv_endpoint(&self) -> String {
        format!("{}/xmltv.php", self.base())
    }

    /// Build playback URL for live streams
    pub fn live_url(&self, stream_id: i64, extension: &str) -> String {
        format!(
            "{}/live/{}/{}.{}",
            self.base(),
            self.path_credentials(),
            stream_id,
            extension
        )
    }

    /// Build playback URL for VOD
    pub fn vod_url(&self, stream_id: i64, extension: &str) -> String {
        format!(
            "{}/movie/{}/{}.{}",
            self.base(),
            self.path_credentials(),
            stream_id,
            extension
        )
    }
}

// ============================================================================
// Authentication Response Types
// ============================================================================

/// Main authentication response from player_api.php (no action)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct XtreamAuthResponse {
    pub user_info: XtreamUserInfo,
    #[serde(default)]
    pub server_info: Option<XtreamServerInfo>,
}

impl XtreamAuthResponse {
    /// Server timezone name (e.g. "Europe/London"), when advertised
    pub fn timezone(&self) -> Option<&str> {
        self.server_info.as_ref()?.timezone.as_deref()
    }
}

/// User account information
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct XtreamUserInfo {
    #[serde(default, deserialize_with = "lenient::string")]
    pub username: String,
    /// 1 when the credentials were accepted
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub auth: Option<i64>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub exp_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub is_trial: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub active_cons: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub max_connections: Option<String>,
    #[serde(default)]
    pub allowed_output_formats: Vec<String>,
}

impl XtreamUserInfo {
    /// Check if account is active
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }

    /// Panels that reject credentials answer with `auth: 0`
    pub fn is_authenticated(&self) -> bool {
        self.auth != Some(0)
    }

    /// Parse expiration timestamp to Unix timestamp
    pub fn exp_timestamp(&self) -> Option<i64> {
        self.exp_date.as_ref()?.parse().ok()
    }

    /// Check if trial account
    pub fn is_trial_account(&self) -> bool {
        self.is_trial.as_deref() == Some("1")
    }

    /// Container for live playback: `ts` when allowed, else the first advertised
    pub fn live_extension(&self) -> &str {
        if self.allowed_output_formats.is_empty()
            || self.allowed_output_formats.iter().any(|f| f == "ts")
        {
            "ts"
        } else {
            &self.allowed_output_formats[0]
        }
    }
}

/// Server information
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct XtreamServerInfo {
    #[serde(default, deserialize_with = "lenient::string")]
    pub url: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub port: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub https_port: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub server_protocol: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub timezone: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub timestamp_now: Option<i64>,
}

// ============================================================================
// Category Types
// ============================================================================

/// Category for live, VOD, or series
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct XtreamCategory {
    #[serde(deserialize_with = "lenient::string")]
    pub category_id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub category_name: String,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub parent_id: Option<i64>,
}

// ============================================================================
// Stream Types
// ============================================================================

/// Live stream (channel) information
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct XtreamLiveStream {
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub num: Option<u32>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(deserialize_with = "lenient::i64")]
    pub stream_id: i64,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub stream_icon: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub epg_channel_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub tv_archive: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub tv_archive_duration: Option<u32>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub direct_source: Option<String>,
}

impl XtreamLiveStream {
    pub fn has_archive(&self) -> bool {
        self.tv_archive.unwrap_or(0) > 0
    }
}

/// VOD (movie) stream information
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct XtreamVodStream {
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub num: Option<u32>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(deserialize_with = "lenient::i64")]
    pub stream_id: i64,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub stream_icon: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub container_extension: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub rating: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub direct_source: Option<String>,
}

/// Series information from get_series
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct XtreamSeries {
    #[serde(deserialize_with = "lenient::i64")]
    pub series_id: i64,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub cover: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub plot: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub genre: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub category_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub last_modified: Option<i64>,
}

// ============================================================================
// EPG Types
// ============================================================================

/// EPG entry from get_short_epg / get_simple_data_table.
/// Title and description are base64 encoded.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct XtreamEpgEntry {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub epg_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub channel_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub start_timestamp: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub stop_timestamp: Option<i64>,
}

impl XtreamEpgEntry {
    /// Decode into a programme for `channel_ref`; None without timestamps or title
    pub fn to_programme(&self, channel_ref: &str) -> Option<RawProgramme> {
        let title = decode_base64_text(&self.title);
        if title.is_empty() {
            return None;
        }
        Some(RawProgramme {
            channel_ref: channel_ref.to_string(),
            title,
            description: self
                .description
                .as_deref()
                .map(decode_base64_text)
                .filter(|d| !d.is_empty()),
            start: RawTime::Unix(self.start_timestamp?),
            end: Some(RawTime::Unix(self.stop_timestamp?)),
        })
    }
}

/// EPG listings container
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct XtreamEpgListings {
    #[serde(default)]
    pub epg_listings: Vec<XtreamEpgEntry>,
}

/// Base64 text as sent by panels; plain text passes through unchanged
pub fn decode_base64_text(value: &str) -> String {
    let trimmed = value.trim();
    match STANDARD.decode(trimmed) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text.trim().to_string(),
            Err(_) => trimmed.to_string(),
        },
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_url_builders() {
        let creds = XtreamCredentials::new("http://example.com:8080/", "user", "p@ss");

        assert_eq!(creds.api_endpoint(), "http://example.com:8080/player_api.php");
        assert_eq!(creds.xmltv_endpoint(), "http://example.com:8080/xmltv.php");
        assert_eq!(
            creds.live_url(123, "ts"),
            "http://example.com:8080/live/user/p%40ss/123.ts"
        );
        assert_eq!(
            creds.vod_url(456, "mkv"),
            "http://example.com:8080/movie/user/p%40ss/456.mkv"
        );
    }

    #[test]
    fn test_lenient_ids() {
        let numeric: XtreamLiveStream =
            serde_json::from_str(r#"{"stream_id": 42, "name": "A", "category_id": 7, "num": "3"}"#).unwrap();
        let textual: XtreamLiveStream =
            serde_json::from_str(r#"{"stream_id": "42", "name": "A", "category_id": "7", "num": 3}"#).unwrap();

        assert_eq!(numeric, textual);
        assert_eq!(numeric.stream_id, 42);
        assert_eq!(numeric.category_id.as_deref(), Some("7"));
        assert_eq!(numeric.num, Some(3));
    }

    #[test]
    fn test_lenient_empty_values() {
        let stream: XtreamLiveStream = serde_json::from_str(
            r#"{"stream_id": 1, "name": "A", "stream_icon": "", "epg_channel_id": null, "tv_archive": ""}"#,
        )
        .unwrap();
        assert!(stream.stream_icon.is_none());
        assert!(stream.epg_channel_id.is_none());
        assert!(!stream.has_archive());
    }

    #[test]
    fn test_missing_stream_id_is_an_error() {
        assert!(serde_json::from_str::<XtreamLiveStream>(r#"{"name": "A"}"#).is_err());
        assert!(serde_json::from_str::<XtreamLiveStream>(r#"{"stream_id": "abc", "name": "A"}"#).is_err());
    }

    #[test]
    fn test_user_info_auth() {
        let rejected: XtreamAuthResponse = serde_json::from_str(r#"{"user_info": {"auth": 0}}"#).unwrap();
        assert!(!rejected.user_info.is_authenticated());
        assert!(!rejected.user_info.is_active());

        let ok: XtreamAuthResponse = serde_json::from_str(
            r#"{"user_info": {"username": "u", "auth": 1, "status": "Active", "allowed_output_formats": ["m3u8"]},
                "server_info": {"url": "x", "port": 8080, "timezone": "Europe/London"}}"#,
        )
        .unwrap();
        assert!(ok.user_info.is_authenticated());
        assert!(ok.user_info.is_active());
        assert_eq!(ok.user_info.live_extension(), "m3u8");
        assert_eq!(ok.timezone(), Some("Europe/London"));
    }

    #[test]
    fn test_epg_entry_decodes_base64() {
        let entry: XtreamEpgEntry = serde_json::from_str(
            r#"{"epg_id": "bbc1", "title": "TmV3cw==", "description": "SGVhZGxpbmVz",
                "start_timestamp": "1705316400", "stop_timestamp": 1705320000}"#,
        )
        .unwrap();
        let programme = entry.to_programme("xt-1").unwrap();

        assert_eq!(programme.title, "News");
        assert_eq!(programme.description.as_deref(), Some("Headlines"));
        assert_eq!(programme.start, RawTime::Unix(1705316400));
        assert_eq!(programme.end, Some(RawTime::Unix(1705320000)));
    }

    #[test]
    fn test_plain_text_title_passes_through() {
        assert_eq!(decode_base64_text("Match of the Day"), "Match of the Day");
    }
}
