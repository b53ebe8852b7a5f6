//! Source fetching
//!
//! [`SourceFetcher`] is the seam between the sync engine and the network:
//! given a playlist it returns the source-specific records of one cycle.
//! [`NetworkFetcher`] reads M3U files and URLs and drives the Xtream and
//! Stalker clients.

use async_trait::async_trait;
use reqwest::Client;
use std::future::Future;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::SyncError;
use crate::models::{DropReason, DropReport, Playlist, PlaylistSource};
use crate::services::http::{build_client, read_body_limited, send_with_retry, RetryPolicy};
use crate::services::m3u_parser::parse_m3u_bytes;
use crate::services::records::{FetchedSource, GuideRecords, SourceRecords, StalkerCatalog, XtreamCatalog};
use crate::services::stalker::{StalkerClient, StalkerCredentials};
use crate::services::xmltv::parse_xmltv_bytes;
use crate::services::xtream::{drain_stream, XtreamClient, XtreamCredentials};

/// Produces the raw records of one sync cycle for a playlist
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, playlist: &Playlist, cancel: &CancellationToken) -> Result<FetchedSource, SyncError>;
}

/// Run `fut` unless the cycle is cancelled first
async fn cancellable<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<SyncError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}

/// Fetches M3U, Xtream and Stalker sources over HTTP (or from disk)
#[derive(Clone)]
pub struct NetworkFetcher {
    http: Client,
    retry: RetryPolicy,
    max_m3u_size_mb: usize,
    max_epg_size_mb: usize,
    fetch_epg: bool,
    include_vod: bool,
    stalker_max_pages: u32,
    stalker_epg_period_hours: u32,
}

impl NetworkFetcher {
    pub fn new(config: &Config) -> Result<Self, SyncError> {
        let http = build_client(config)?;
        Ok(Self::with_client(http, config))
    }

    pub fn with_client(http: Client, config: &Config) -> Self {
        Self {
            http,
            retry: RetryPolicy::from_config(config),
            max_m3u_size_mb: config.max_m3u_size_mb,
            max_epg_size_mb: config.max_epg_size_mb,
            fetch_epg: config.fetch_epg,
            include_vod: config.include_vod,
            stalker_max_pages: config.stalker_max_pages,
            stalker_epg_period_hours: config.stalker_epg_period_hours,
        }
    }

    // ========================================================================
    // M3U
    // ========================================================================

    async fn read_m3u_file(&self, path: &str) -> Result<Vec<u8>, SyncError> {
        let limit = self.max_m3u_size_mb.saturating_mul(1024 * 1024);
        let meta = tokio::fs::metadata(Path::new(path))
            .await
            .map_err(|e| SyncError::Protocol(format!("cannot read playlist file {}: {}", path, e)))?;
        if meta.len() as usize > limit {
            return Err(SyncError::Protocol(format!(
                "playlist file {} exceeds {}MB",
                path, self.max_m3u_size_mb
            )));
        }
        tokio::fs::read(path)
            .await
            .map_err(|e| SyncError::Protocol(format!("cannot read playlist file {}: {}", path, e)))
    }

    async fn download(&self, source: &'static str, url: &str, limit_mb: usize) -> Result<Vec<u8>, SyncError> {
        debug!("Downloading {} from {}", source, url);
        let response = send_with_retry(&self.retry, source, || self.http.get(url)).await?;
        Ok(read_body_limited(response, limit_mb).await?)
    }

    async fn fetch_m3u(&self, source: &PlaylistSource, cancel: &CancellationToken) -> Result<FetchedSource, SyncError> {
        let bytes = match source {
            PlaylistSource::M3uFile { path } => cancellable(cancel, self.read_m3u_file(path)).await?,
            PlaylistSource::M3uUrl { url } => cancellable(cancel, self.download("m3u", url, self.max_m3u_size_mb)).await?,
            _ => return Err(SyncError::Protocol("not an M3U source".to_string())),
        };
        let size_mb = bytes.len() as f64 / 1024.0 / 1024.0;

        let playlist = parse_m3u_bytes(&bytes)?;
        info!(
            "Parsed M3U ({:.2}MB): {} records, {} dropped",
            size_mb,
            playlist.records.len(),
            playlist.report.total()
        );

        let guide_urls = playlist.guide_urls.clone();
        let mut fetched = FetchedSource::new(SourceRecords::M3u(playlist));
        if self.fetch_epg && !guide_urls.is_empty() {
            fetched = self.attach_guides(fetched, &guide_urls, cancel).await?;
        }
        Ok(fetched)
    }

    /// Download and parse every advertised guide; the cycle keeps going when
    /// none of them can be read
    async fn attach_guides(
        &self,
        fetched: FetchedSource,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<FetchedSource, SyncError> {
        let mut guide = GuideRecords::default();
        let mut failures = Vec::new();

        for url in urls {
            let bytes = match cancellable(cancel, self.download("xmltv", url, self.max_epg_size_mb)).await {
                Ok(bytes) => bytes,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!("Guide {} unavailable: {}", url, e);
                    failures.push(format!("{}: {}", url, e));
                    continue;
                }
            };
            match parse_xmltv_bytes(&bytes) {
                Ok(parsed) => guide.extend(parsed),
                Err(e) => {
                    warn!("Guide {} unreadable: {}", url, e);
                    failures.push(format!("{}: {}", url, e));
                }
            }
        }

        if guide.is_empty() && !failures.is_empty() {
            return Ok(fetched.with_guide_error(failures.join("; ")));
        }
        info!(
            "Guide: {} channels, {} programmes from {} source(s)",
            guide.channels.len(),
            guide.programmes.len(),
            urls.len() - failures.len()
        );
        Ok(fetched.with_guide(guide))
    }

    // ========================================================================
    // Xtream Codes
    // ========================================================================

    async fn fetch_xtream(
        &self,
        credentials: &XtreamCredentials,
        cancel: &CancellationToken,
    ) -> Result<FetchedSource, SyncError> {
        let client = XtreamClient::new(self.http.clone(), credentials.clone(), self.retry.clone());
        let auth = cancellable(cancel, client.authenticate()).await?;

        let mut report = DropReport::new();
        let mut catalog = XtreamCatalog {
            credentials: credentials.clone(),
            timezone: auth.timezone().map(String::from),
            live_extension: auth.user_info.live_extension().to_string(),
            ..Default::default()
        };

        let categories = cancellable(cancel, client.live_categories()).await?;
        report.add(DropReason::MalformedRecord, categories.skipped);
        catalog.live_categories = categories.items;

        let streams = cancellable(cancel, client.live_streams()).await?;
        catalog.live_streams = cancellable(cancel, drain_stream("get_live_streams", streams, &mut report)).await?;

        if self.include_vod {
            let categories = cancellable(cancel, client.vod_categories()).await?;
            report.add(DropReason::MalformedRecord, categories.skipped);
            catalog.vod_categories = categories.items;

            let streams = cancellable(cancel, client.vod_streams()).await?;
            catalog.vod_streams = cancellable(cancel, drain_stream("get_vod_streams", streams, &mut report)).await?;
        }

        info!(
            "Xtream catalog: {} live categories, {} live streams, {} VOD streams",
            catalog.live_categories.len(),
            catalog.live_streams.len(),
            catalog.vod_streams.len()
        );
        catalog.report = report;

        let fetched = FetchedSource::new(SourceRecords::Xtream(catalog));
        if !self.fetch_epg {
            return Ok(fetched);
        }

        match cancellable(cancel, client.xmltv(self.max_epg_size_mb)).await {
            Ok(bytes) => match parse_xmltv_bytes(&bytes) {
                Ok(guide) => Ok(fetched.with_guide(guide)),
                Err(e) => {
                    warn!("Xtream XMLTV unreadable: {}", e);
                    Ok(fetched.with_guide_error(e.to_string()))
                }
            },
            Err(SyncError::Cancelled) => Err(SyncError::Cancelled),
            Err(e) => {
                warn!("Xtream XMLTV unavailable: {}", e);
                Ok(fetched.with_guide_error(e.to_string()))
            }
        }
    }

    // ========================================================================
    // Stalker Portal
    // ========================================================================

    async fn fetch_stalker(
        &self,
        credentials: &StalkerCredentials,
        cancel: &CancellationToken,
    ) -> Result<FetchedSource, SyncError> {
        let client = StalkerClient::new(self.http.clone(), credentials.clone(), self.retry.clone());
        client.begin_cycle();
        cancellable(cancel, client.connect()).await?;

        let mut report = DropReport::new();
        let genres = cancellable(cancel, client.genres(&mut report)).await?;
        let channels = client
            .channels(cancel, self.stalker_max_pages, &mut report)
            .await?;

        info!(
            "Stalker catalog: {} genres, {} channels",
            genres.len(),
            channels.len()
        );

        let fetched = FetchedSource::new(SourceRecords::Stalker(StalkerCatalog {
            genres,
            channels,
            report,
        }));
        if !self.fetch_epg {
            return Ok(fetched);
        }

        match cancellable(cancel, client.epg_info(self.stalker_epg_period_hours)).await {
            Ok(guide) => Ok(fetched.with_guide(guide)),
            // A second expiry is fatal for the cycle, wherever it happens
            Err(e @ (SyncError::Session(_) | SyncError::Cancelled)) => Err(e),
            Err(e) => {
                warn!("Stalker EPG unavailable: {}", e);
                Ok(fetched.with_guide_error(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl SourceFetcher for NetworkFetcher {
    async fn fetch(&self, playlist: &Playlist, cancel: &CancellationToken) -> Result<FetchedSource, SyncError> {
        match &playlist.source {
            source @ (PlaylistSource::M3uFile { .. } | PlaylistSource::M3uUrl { .. }) => {
                self.fetch_m3u(source, cancel).await
            }
            PlaylistSource::Xtream(credentials) => self.fetch_xtream(credentials, cancel).await,
            PlaylistSource::Stalker(credentials) => self.fetch_stalker(credentials, cancel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fetcher(config: Config) -> NetworkFetcher {
        NetworkFetcher::with_client(Client::new(), &config)
    }

    #[tokio::test]
    async fn test_fetch_m3u_file() {
        let path = std::env::temp_dir().join(format!("ativeplay-{}.m3u", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#EXTM3U\n#EXTINF:-1 group-title=\"News\",BBC One\nhttp://x/1.ts").unwrap();

        let playlist = Playlist::new(
            "Local",
            PlaylistSource::M3uFile {
                path: path.to_string_lossy().into_owned(),
            },
        );
        let fetched = fetcher(Config::default())
            .fetch(&playlist, &CancellationToken::new())
            .await
            .unwrap();
        std::fs::remove_file(&path).ok();

        match fetched.records {
            SourceRecords::M3u(m3u) => assert_eq!(m3u.records.len(), 1),
            other => panic!("unexpected records: {:?}", other),
        }
        assert!(fetched.guide_error.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let playlist = Playlist::new(
            "Missing",
            PlaylistSource::M3uFile {
                path: "/nonexistent/list.m3u".into(),
            },
        );
        let err = fetcher(Config::default())
            .fetch(&playlist, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let playlist = Playlist::new(
            "Remote",
            PlaylistSource::M3uUrl {
                url: "http://127.0.0.1:9/list.m3u".into(),
            },
        );
        let err = fetcher(Config::default()).fetch(&playlist, &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }
}
