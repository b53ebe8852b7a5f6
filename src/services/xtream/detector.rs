//! Recognizes Xtream panel links among plain M3U URLs, e.g.
//! `http://server:port/get.php?username=X&password=Y&type=m3u_plus`, so the
//! panel's API can be used instead of its generated playlist.

use tracing::debug;
use url::Url;

use super::types::XtreamCredentials;
use crate::models::PlaylistSource;

/// Credentials of a `get.php` / `player_api.php` link, `None` for any other URL.
/// A path prefix in front of the script (`/iptv/get.php`) stays part of the server.
pub fn extract_credentials(m3u_url: &str) -> Option<XtreamCredentials> {
    let parsed = Url::parse(m3u_url.trim()).ok()?;
    let (prefix, script) = parsed.path().rsplit_once('/')?;
    if !matches!(script.to_ascii_lowercase().as_str(), "get.php" | "player_api.php") {
        return None;
    }

    let param = |key: &str| {
        parsed
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
    };
    let (username, password) = (param("username")?, param("password")?);

    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
    let server = format!("{}://{}{}{}", parsed.scheme(), parsed.host_str()?, port, prefix);
    debug!("Xtream link detected: server={}, username={}", server, username);

    Some(XtreamCredentials::new(&server, &username, &password))
}

/// Pick the source kind for a user-supplied playlist URL.
///
/// Xtream `get.php` links become API sources, everything else is fetched
/// and parsed as M3U.
pub fn source_from_url(url: &str) -> PlaylistSource {
    match extract_credentials(url) {
        Some(credentials) => PlaylistSource::Xtream(credentials),
        None => PlaylistSource::M3uUrl {
            url: url.trim().to_string(),
        },
    }
}
