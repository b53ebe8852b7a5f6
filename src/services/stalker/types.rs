//! Stalker Portal (Ministra) types
//!
//! Every `load.php` answer is wrapped in `{"js": ...}`. Fields are decoded
//! leniently: portals mix numbers and strings for ids and leave optional
//! values empty instead of omitting them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::services::lenient;
use crate::services::records::{RawProgramme, RawTime};

/// Player names that portals put in front of the stream URL in `cmd`
const CMD_PLAYERS: &[&str] = &["ffmpeg", "ffrt", "ffrt2", "ffrt3", "auto"];

/// Portal connection parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalkerCredentials {
    /// Portal address as given by the provider, e.g. `http://host/stalker_portal/c/`
    pub portal_url: String,
    /// Device MAC, `00:1A:79:xx:xx:xx`
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl StalkerCredentials {
    pub fn new(portal_url: &str, mac: &str) -> Self {
        Self {
            portal_url: portal_url.trim().to_string(),
            mac: mac.trim().to_uppercase(),
            ..Default::default()
        }
    }

    pub fn with_login(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Login credentials, when both are configured and non-empty
    pub fn login(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }

    /// API endpoint derived from the portal address:
    /// - an explicit `*.php` URL is used as is
    /// - `.../stalker_portal/c/` maps to `.../stalker_portal/server/load.php`
    /// - anything else (`http://host:port/c/`) maps to `http://host:port/portal.php`
    pub fn load_url(&self) -> String {
        let url = self.portal_url.trim().trim_end_matches('/');
        if url.ends_with(".php") {
            return url.to_string();
        }
        let base = url.strip_suffix("/c").unwrap_or(url);
        if base.ends_with("/stalker_portal") {
            format!("{}/server/load.php", base)
        } else {
            format!("{}/portal.php", base)
        }
    }

    /// Serial number sent to get_profile, derived from the MAC when unset
    pub fn serial(&self) -> String {
        self.serial_number.clone().unwrap_or_else(|| {
            let hex: String = self.mac.chars().filter(|c| c.is_ascii_hexdigit()).collect();
            format!("{:0>13}", hex).chars().take(13).collect::<String>().to_uppercase()
        })
    }
}

/// Strip player prefixes from a `cmd` value, leaving the stream URL
pub fn stream_url_from_cmd(cmd: &str) -> Option<String> {
    let mut value = cmd.trim();
    loop {
        let (token, rest) = value.split_once(char::is_whitespace).unwrap_or((value, ""));
        if !CMD_PLAYERS.contains(&token) {
            break;
        }
        value = rest.trim_start();
    }
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// `{"js": ...}` envelope
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub js: Value,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HandshakeResponse {
    #[serde(default, deserialize_with = "lenient::string")]
    pub token: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub random: Option<String>,
}

/// Subset of get_profile we look at
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StalkerProfile {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub status: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub msg: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub default_timezone: Option<String>,
}

/// Live TV genre (category)
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StalkerGenre {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub number: Option<u32>,
}

impl StalkerGenre {
    /// The `*` pseudo genre means "all channels"
    pub fn is_catch_all(&self) -> bool {
        self.id == "*"
    }
}

/// Live TV channel from get_ordered_list
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StalkerChannel {
    #[serde(deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub number: Option<u32>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub cmd: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub logo: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub tv_genre_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub xmltv_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub tv_archive: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub tv_archive_duration: Option<u32>,
}

impl StalkerChannel {
    pub fn stream_url(&self) -> Option<String> {
        stream_url_from_cmd(&self.cmd)
    }

    pub fn has_archive(&self) -> bool {
        self.tv_archive.unwrap_or(0) > 0
    }
}

/// One page of get_ordered_list
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChannelPage {
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub total_items: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub max_page_items: Option<i64>,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Programme from get_epg_info
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StalkerEpgEntry {
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub ch_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub descr: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub start_timestamp: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub stop_timestamp: Option<i64>,
}

impl StalkerEpgEntry {
    pub fn to_programme(&self, channel_ref: &str) -> Option<RawProgramme> {
        if self.name.is_empty() {
            return None;
        }
        Some(RawProgramme {
            channel_ref: channel_ref.to_string(),
            title: self.name.clone(),
            description: self.descr.clone(),
            start: RawTime::Unix(self.start_timestamp?),
            end: Some(RawTime::Unix(self.stop_timestamp?)),
        })
    }
}
