//! Sync engine
//!
//! One cycle per playlist: fetch, normalize, diff against the persisted set,
//! apply the changeset atomically. Requests for a playlist that is already
//! syncing join the running cycle and get its result. Cycles run on spawned
//! tasks so a caller that goes away never interrupts persistence, and a
//! semaphore bounds how many playlists sync at once.
//!
//! EPG queries run against a per-playlist index that is built from storage
//! on first use and dropped whenever a cycle writes a new changeset.

use chrono::{DateTime, Duration, Utc};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::SyncError;
use crate::metrics;
use crate::models::{CatalogSnapshot, Channel, EntityMap, EpgEntry, Playlist, PlaylistSource, SyncChangeset, SyncStatus};
use crate::persistence::{CycleOutcome, PersistencePort};
use crate::services::epg::EpgIndex;
use crate::services::fetcher::SourceFetcher;
use crate::services::normalizer::{normalize, NormalizeOptions};
use crate::services::xtream::source_from_url;

type CycleFuture = Shared<BoxFuture<'static, Result<SyncChangeset, SyncError>>>;

struct InFlight {
    cycle: CycleFuture,
    cancel: CancellationToken,
}

/// Channels and programme index of one playlist, as last persisted
struct GuideView {
    channels: EntityMap<Channel>,
    index: EpgIndex,
}

impl GuideView {
    fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            index: EpgIndex::from_snapshot(&snapshot),
            channels: snapshot.channels,
        }
    }
}

struct Inner {
    store: Arc<dyn PersistencePort>,
    fetcher: Arc<dyn SourceFetcher>,
    options: NormalizeOptions,
    refresh_interval: Duration,
    limiter: Arc<Semaphore>,
    in_flight: Mutex<HashMap<Uuid, InFlight>>,
    guides: Mutex<HashMap<Uuid, Arc<GuideView>>>,
    /// Bumped on every invalidation so a view loaded before a write is not cached
    guide_epoch: AtomicU64,
}

/// Orchestrates sync cycles for every playlist in a store
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn PersistencePort>, fetcher: Arc<dyn SourceFetcher>, config: &Config) -> Self {
        let refresh_secs = i64::try_from(config.refresh_interval_secs).unwrap_or(i64::MAX);
        Self {
            inner: Arc::new(Inner {
                store,
                fetcher,
                options: NormalizeOptions::from_config(config),
                refresh_interval: Duration::try_seconds(refresh_secs).unwrap_or(Duration::MAX),
                limiter: Arc::new(Semaphore::new(config.max_concurrent_syncs.max(1))),
                in_flight: Mutex::new(HashMap::new()),
                guides: Mutex::new(HashMap::new()),
                guide_epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn PersistencePort> {
        &self.inner.store
    }

    // ========================================================================
    // Playlists
    // ========================================================================

    /// Register a new playlist; it is due for sync right away
    pub async fn import(&self, name: &str, source: PlaylistSource) -> Result<Playlist, SyncError> {
        let playlist = Playlist::new(name.trim(), source);
        self.inner.store.save_playlist(&playlist).await?;
        info!("Imported playlist {} ({}, {})", playlist.id, playlist.name, playlist.kind());
        Ok(playlist)
    }

    /// Register a playlist from a URL; Xtream `get.php` links use the panel API
    pub async fn import_url(&self, name: &str, url: &str) -> Result<Playlist, SyncError> {
        self.import(name, source_from_url(url)).await
    }

    pub async fn playlist(&self, playlist_id: Uuid) -> Result<Playlist, SyncError> {
        self.inner
            .store
            .load_playlist(playlist_id)
            .await?
            .ok_or(SyncError::NotFound(playlist_id))
    }

    /// Cancel any running cycle and delete the playlist with its catalog
    pub async fn remove(&self, playlist_id: Uuid) -> Result<bool, SyncError> {
        self.cancel(playlist_id);
        let removed = self.inner.store.remove_playlist(playlist_id).await?;
        self.inner.invalidate_guide(playlist_id);
        Ok(removed)
    }

    // ========================================================================
    // Sync cycles
    // ========================================================================

    /// Run a sync cycle, or join the one already running for this playlist
    pub async fn sync(&self, playlist_id: Uuid) -> Result<SyncChangeset, SyncError> {
        let cycle = self.begin(playlist_id)?;
        cycle.await
    }

    fn begin(&self, playlist_id: Uuid) -> Result<CycleFuture, SyncError> {
        let mut in_flight = self.inner.lock_in_flight()?;
        if let Some(running) = in_flight.get(&playlist_id) {
            debug!("Joining in-flight sync of {}", playlist_id);
            return Ok(running.cycle.clone());
        }

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = inner.run_cycle(playlist_id, &token).await;
            inner.forget(playlist_id);
            result
        });

        let cycle = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(SyncError::Protocol(format!("sync task failed: {}", e))))
        }
        .boxed()
        .shared();

        in_flight.insert(
            playlist_id,
            InFlight {
                cycle: cycle.clone(),
                cancel,
            },
        );
        Ok(cycle)
    }

    /// Request cancellation of the running cycle; false when none is running
    pub fn cancel(&self, playlist_id: Uuid) -> bool {
        match self.inner.lock_in_flight() {
            Ok(in_flight) => match in_flight.get(&playlist_id) {
                Some(running) => {
                    info!("Cancelling sync of {}", playlist_id);
                    running.cancel.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_syncing(&self, playlist_id: Uuid) -> bool {
        self.inner
            .lock_in_flight()
            .map(|in_flight| in_flight.contains_key(&playlist_id))
            .unwrap_or(false)
    }

    /// Due when never synced, or when the refresh interval has passed
    pub fn is_stale(&self, playlist: &Playlist, now: DateTime<Utc>) -> bool {
        match playlist.last_synced_at {
            None => true,
            Some(at) => now.signed_duration_since(at) >= self.inner.refresh_interval,
        }
    }

    /// Sync every due playlist, concurrently under the worker limit
    pub async fn sync_stale(&self) -> Result<Vec<(Uuid, Result<SyncChangeset, SyncError>)>, SyncError> {
        let now = Utc::now();
        let due: Vec<Uuid> = self
            .inner
            .store
            .list_playlists()
            .await?
            .into_iter()
            .filter(|p| self.is_stale(p, now))
            .map(|p| p.id)
            .collect();

        if due.is_empty() {
            return Ok(Vec::new());
        }
        info!("{} playlist(s) due for refresh", due.len());

        let results = join_all(due.iter().map(|id| self.sync(*id))).await;
        Ok(due.into_iter().zip(results).collect())
    }

    // ========================================================================
    // EPG
    // ========================================================================

    async fn guide_view(&self, playlist_id: Uuid) -> Result<Arc<GuideView>, SyncError> {
        if let Some(view) = self.inner.cached_guide(playlist_id) {
            return Ok(view);
        }

        let epoch = self.inner.guide_epoch.load(Ordering::SeqCst);
        let snapshot = self.inner.store.load_snapshot(playlist_id).await?;
        let view = Arc::new(GuideView::new(snapshot));
        if let Ok(mut guides) = self.inner.guides.lock() {
            if self.inner.guide_epoch.load(Ordering::SeqCst) == epoch {
                guides.insert(playlist_id, view.clone());
            }
        }
        debug!("Built EPG index for {} ({} guide channels)", playlist_id, view.index.channel_count());
        Ok(view)
    }

    /// Programme on air at `now` and the one after it
    pub async fn current_and_next(
        &self,
        playlist_id: Uuid,
        channel_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Option<EpgEntry>, Option<EpgEntry>), SyncError> {
        let view = self.guide_view(playlist_id).await?;
        let Some(channel) = view.channels.get(channel_id) else {
            return Ok((None, None));
        };
        let (current, next) = view.index.current_and_next(channel, now);
        Ok((current.cloned(), next.cloned()))
    }

    /// Programmes overlapping `[from, to)`
    pub async fn schedule(
        &self,
        playlist_id: Uuid,
        channel_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EpgEntry>, SyncError> {
        let view = self.guide_view(playlist_id).await?;
        let Some(channel) = view.channels.get(channel_id) else {
            return Ok(Vec::new());
        };
        Ok(view.index.schedule(channel, from, to).into_iter().cloned().collect())
    }
}

impl Inner {
    fn lock_in_flight(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, InFlight>>, SyncError> {
        self.in_flight
            .lock()
            .map_err(|_| SyncError::Protocol("sync table lock poisoned".to_string()))
    }

    fn cached_guide(&self, playlist_id: Uuid) -> Option<Arc<GuideView>> {
        self.guides.lock().ok()?.get(&playlist_id).cloned()
    }

    fn invalidate_guide(&self, playlist_id: Uuid) {
        self.guide_epoch.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guides) = self.guides.lock() {
            guides.remove(&playlist_id);
        }
    }

    fn forget(&self, playlist_id: Uuid) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&playlist_id);
        }
    }

    /// Whole cycle including the state machine transitions
    async fn run_cycle(&self, playlist_id: Uuid, cancel: &CancellationToken) -> Result<SyncChangeset, SyncError> {
        let playlist = self
            .store
            .load_playlist(playlist_id)
            .await?
            .ok_or(SyncError::NotFound(playlist_id))?;
        let source = playlist.kind().to_string();

        self.store
            .update_status(playlist_id, SyncStatus::Syncing, playlist.last_error.as_deref())
            .await?;
        info!("Sync started for {} ({})", playlist_id, source);

        match self.fetch_and_apply(&playlist, cancel).await {
            Ok(changeset) => {
                metrics::record_cycle(&source, "ok");
                Ok(changeset)
            }
            Err(SyncError::Cancelled) => {
                info!("Sync of {} cancelled", playlist_id);
                metrics::record_cycle(&source, "cancelled");
                self.store
                    .update_status(playlist_id, SyncStatus::Idle, playlist.last_error.as_deref())
                    .await?;
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                error!("Sync of {} failed ({}): {}", playlist_id, e.kind(), e);
                metrics::record_cycle(&source, e.kind());
                if let Err(status_err) = self
                    .store
                    .update_status(playlist_id, SyncStatus::Error, Some(&e.to_string()))
                    .await
                {
                    warn!("Could not record failure of {}: {}", playlist_id, status_err);
                }
                Err(e)
            }
        }
    }

    async fn fetch_and_apply(&self, playlist: &Playlist, cancel: &CancellationToken) -> Result<SyncChangeset, SyncError> {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            permit = self.limiter.clone().acquire_owned() => permit
                .map_err(|_| SyncError::Protocol("sync limiter closed".to_string()))?,
        };

        let fetched = self.fetcher.fetch(playlist, cancel).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let normalized = normalize(fetched, &self.options);
        let previous = self.store.load_snapshot(playlist.id).await?;

        let mut next = normalized.snapshot;
        if let Some(reason) = &normalized.guide_error {
            warn!("Keeping previous guide for {}: {}", playlist.id, reason);
            next.epg = previous.epg.clone();
            keep_guide_ids(&previous, &mut next);
        }

        let changeset = SyncChangeset::between(&previous, &next);

        // Last point where cancellation is honoured
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let report = normalized.report;
        metrics::record_dropped(&report);
        if !report.is_empty() {
            let summary: Vec<String> = report.iter().map(|(r, n)| format!("{}={}", r.as_str(), n)).collect();
            warn!("Dropped {} record(s) for {}: {}", report.total(), playlist.id, summary.join(", "));
        }

        let outcome = CycleOutcome {
            synced_at: Utc::now(),
            dropped_records: report.total(),
        };
        self.invalidate_guide(playlist.id);
        let applied = self.store.apply_changeset(playlist.id, &changeset, &next, &outcome).await;
        self.invalidate_guide(playlist.id);
        applied?;

        info!(
            "Sync of {} complete: channels +{} ~{} -{}, categories +{} ~{} -{}, programmes +{} ~{} -{}",
            playlist.id,
            changeset.channels.added.len(),
            changeset.channels.updated.len(),
            changeset.channels.removed.len(),
            changeset.categories.added.len(),
            changeset.categories.updated.len(),
            changeset.categories.removed.len(),
            changeset.epg.added.len(),
            changeset.epg.updated.len(),
            changeset.epg.removed.len(),
        );
        Ok(changeset)
    }
}

/// While the guide is unavailable, channels keep the guide id they were
/// matched to last time when the kept programmes are filed under it and the
/// freshly normalized id finds none (matches made by display name).
fn keep_guide_ids(previous: &CatalogSnapshot, next: &mut CatalogSnapshot) {
    let guided: HashSet<&str> = previous.epg.iter().map(|e| e.channel_id.as_str()).collect();
    let ids: Vec<String> = next.channels.ids().map(String::from).collect();
    for id in ids {
        let Some(before) = previous.channels.get(&id) else {
            continue;
        };
        let Some(guide_id) = before.epg_id.as_deref().filter(|g| guided.contains(g)) else {
            continue;
        };
        if let Some(channel) = next.channels.get_mut(&id) {
            if !channel.epg_id.as_deref().is_some_and(|g| guided.contains(g)) {
                channel.epg_id = Some(guide_id.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use crate::services::m3u_parser::parse_m3u;
    use crate::services::records::{FetchedSource, GuideChannel, GuideRecords, RawProgramme, RawTime, SourceRecords};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves M3U text set by the test, counting fetches
    struct ScriptedFetcher {
        text: Mutex<String>,
        calls: AtomicUsize,
        delay: std::time::Duration,
        fail_with: Mutex<Option<SyncError>>,
        guide: Mutex<Option<Result<GuideRecords, String>>>,
    }

    impl ScriptedFetcher {
        fn new(text: &str) -> Self {
            Self {
                text: Mutex::new(text.to_string()),
                calls: AtomicUsize::new(0),
                delay: std::time::Duration::ZERO,
                fail_with: Mutex::new(None),
                guide: Mutex::new(None),
            }
        }

        fn set_text(&self, text: &str) {
            *self.text.lock().unwrap() = text.to_string();
        }
    }

    #[async_trait]
    impl SourceFetcher for ScriptedFetcher {
        async fn fetch(&self, _playlist: &Playlist, cancel: &CancellationToken) -> Result<FetchedSource, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
            if let Some(err) = self.fail_with.lock().unwrap().clone() {
                return Err(err);
            }
            let text = self.text.lock().unwrap().clone();
            let fetched = FetchedSource::new(SourceRecords::M3u(parse_m3u(&text)?));
            Ok(match self.guide.lock().unwrap().clone() {
                Some(Ok(guide)) => fetched.with_guide(guide),
                Some(Err(reason)) => fetched.with_guide_error(reason),
                None => fetched,
            })
        }
    }

    const TWO_CHANNELS: &str = "#EXTM3U\n#EXTINF:-1 group-title=\"News\",BBC One\nhttp://x/1.ts\n#EXTINF:-1 group-title=\"Sport\",Sky Sports\nhttp://x/2.ts\n";
    const ONE_CHANNEL: &str = "#EXTM3U\n#EXTINF:-1 group-title=\"News\",BBC One\nhttp://x/1.ts\n";

    async fn setup(fetcher: ScriptedFetcher) -> (SyncEngine, Arc<MemoryStore>, Arc<ScriptedFetcher>, Playlist) {
        let store = Arc::new(MemoryStore::default());
        let fetcher = Arc::new(fetcher);
        let engine = SyncEngine::new(store.clone(), fetcher.clone(), &Config::default());
        let playlist = engine
            .import("Home", PlaylistSource::M3uUrl { url: "http://x/list.m3u".into() })
            .await
            .unwrap();
        (engine, store, fetcher, playlist)
    }

    #[tokio::test]
    async fn test_first_sync_adds_everything() {
        let (engine, _, _, playlist) = setup(ScriptedFetcher::new(TWO_CHANNELS)).await;

        let changeset = engine.sync(playlist.id).await.unwrap();
        assert_eq!(changeset.channels.added.len(), 2);
        assert_eq!(changeset.categories.added.len(), 2);

        let stored = engine.playlist(playlist.id).await.unwrap();
        assert_eq!(stored.status, SyncStatus::Idle);
        assert!(stored.last_synced_at.is_some());
        assert!(!engine.is_stale(&stored, Utc::now()));
    }

    #[tokio::test]
    async fn test_unchanged_source_gives_empty_changeset() {
        let (engine, _, _, playlist) = setup(ScriptedFetcher::new(TWO_CHANNELS)).await;

        engine.sync(playlist.id).await.unwrap();
        let second = engine.sync(playlist.id).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_favorite_survives_removal_as_stale() {
        let (engine, store, fetcher, playlist) = setup(ScriptedFetcher::new(TWO_CHANNELS)).await;
        engine.sync(playlist.id).await.unwrap();

        let snapshot = store.load_snapshot(playlist.id).await.unwrap();
        let sky = snapshot.channels.iter().find(|c| c.name == "Sky Sports").unwrap().id.clone();
        store.add_favorite(playlist.id, &sky).await.unwrap();

        fetcher.set_text(ONE_CHANNEL);
        let changeset = engine.sync(playlist.id).await.unwrap();
        assert!(changeset.channels.removed.contains(&sky));

        let snapshot = store.load_snapshot(playlist.id).await.unwrap();
        assert!(snapshot.channels.get(&sky).unwrap().stale);
        assert_eq!(store.favorites(playlist.id).await.unwrap().len(), 1);

        // Already stale: nothing more to do
        assert!(engine.sync(playlist.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_sets_error_and_keeps_data() {
        let (engine, store, fetcher, playlist) = setup(ScriptedFetcher::new(TWO_CHANNELS)).await;
        engine.sync(playlist.id).await.unwrap();

        *fetcher.fail_with.lock().unwrap() = Some(SyncError::Auth("HTTP 401".into()));
        let err = engine.sync(playlist.id).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));

        let stored = engine.playlist(playlist.id).await.unwrap();
        assert_eq!(stored.status, SyncStatus::Error);
        assert!(stored.last_error.unwrap().contains("401"));
        assert_eq!(store.load_snapshot(playlist.id).await.unwrap().channels.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_syncs_coalesce() {
        let mut fetcher = ScriptedFetcher::new(TWO_CHANNELS);
        fetcher.delay = std::time::Duration::from_millis(100);
        let (engine, store, fetcher, playlist) = setup(fetcher).await;

        let (a, b, c) = tokio::join!(
            engine.sync(playlist.id),
            engine.sync(playlist.id),
            engine.sync(playlist.id)
        );

        let a = a.unwrap();
        assert_eq!(a, b.unwrap());
        assert_eq!(a, c.unwrap());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.applied_changesets(), 1);
        assert!(!engine.is_syncing(playlist.id));
    }

    #[tokio::test]
    async fn test_cancel_returns_to_idle() {
        let mut fetcher = ScriptedFetcher::new(TWO_CHANNELS);
        fetcher.delay = std::time::Duration::from_secs(30);
        let (engine, store, _, playlist) = setup(fetcher).await;

        let running = tokio::spawn({
            let engine = engine.clone();
            async move { engine.sync(playlist.id).await }
        });
        while !engine.is_syncing(playlist.id) {
            tokio::task::yield_now().await;
        }
        assert!(engine.cancel(playlist.id));

        let result = running.await.unwrap();
        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(engine.playlist(playlist.id).await.unwrap().status, SyncStatus::Idle);
        assert_eq!(store.applied_changesets(), 0);
        assert!(!engine.cancel(playlist.id));
    }

    #[tokio::test]
    async fn test_sync_stale_only_touches_due_playlists() {
        let (engine, _, fetcher, first) = setup(ScriptedFetcher::new(TWO_CHANNELS)).await;
        engine.sync(first.id).await.unwrap();
        let second = engine
            .import("Other", PlaylistSource::M3uUrl { url: "http://y/list.m3u".into() })
            .await
            .unwrap();

        let results = engine.sync_stale().await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, second.id);
        assert!(results[0].1.is_ok());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_playlist() {
        let (engine, _, _, _) = setup(ScriptedFetcher::new(TWO_CHANNELS)).await;
        let err = engine.sync(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    fn noon(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, minute, 0).unwrap()
    }

    /// Guide that only knows "BBC One HD" by its display name
    fn named_guide() -> GuideRecords {
        GuideRecords {
            channels: vec![GuideChannel {
                id: "bbc1.uk".into(),
                display_names: vec!["BBC One".into()],
                icon: None,
            }],
            programmes: vec![RawProgramme {
                channel_ref: "bbc1.uk".into(),
                title: "News".into(),
                description: None,
                start: RawTime::Unix(noon(0).timestamp()),
                end: Some(RawTime::Unix(noon(0).timestamp() + 3600)),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_guide_outage_keeps_name_matched_channels_guided() {
        let fetcher = ScriptedFetcher::new(ONE_CHANNEL);
        *fetcher.guide.lock().unwrap() = Some(Ok(named_guide()));
        let (engine, store, fetcher, playlist) = setup(fetcher).await;

        engine.sync(playlist.id).await.unwrap();
        let bbc = store.load_snapshot(playlist.id).await.unwrap().channels.ids().next().unwrap().to_string();
        let (current, _) = engine.current_and_next(playlist.id, &bbc, noon(30)).await.unwrap();
        assert_eq!(current.unwrap().title, "News");

        *fetcher.guide.lock().unwrap() = Some(Err("HTTP 503".into()));
        let changeset = engine.sync(playlist.id).await.unwrap();
        assert!(changeset.is_empty(), "unexpected changes: {:?}", changeset);

        let snapshot = store.load_snapshot(playlist.id).await.unwrap();
        assert_eq!(snapshot.channels.get(&bbc).unwrap().epg_id.as_deref(), Some("bbc1.uk"));
        let (current, _) = engine.current_and_next(playlist.id, &bbc, noon(30)).await.unwrap();
        assert_eq!(current.unwrap().title, "News");
    }

    #[tokio::test]
    async fn test_epg_queries_reuse_the_index_until_next_sync() {
        let fetcher = ScriptedFetcher::new(ONE_CHANNEL);
        *fetcher.guide.lock().unwrap() = Some(Ok(named_guide()));
        let (engine, store, _, playlist) = setup(fetcher).await;
        engine.sync(playlist.id).await.unwrap();
        let bbc = store.load_snapshot(playlist.id).await.unwrap().channels.ids().next().unwrap().to_string();

        let before = store.snapshot_loads();
        for minute in 0..5 {
            let (current, _) = engine.current_and_next(playlist.id, &bbc, noon(minute)).await.unwrap();
            assert!(current.is_some());
        }
        engine.schedule(playlist.id, &bbc, noon(0), noon(59)).await.unwrap();
        assert_eq!(store.snapshot_loads() - before, 1);

        // A new cycle drops the cached index
        engine.sync(playlist.id).await.unwrap();
        let before = store.snapshot_loads();
        engine.current_and_next(playlist.id, &bbc, noon(5)).await.unwrap();
        engine.current_and_next(playlist.id, &bbc, noon(6)).await.unwrap();
        assert_eq!(store.snapshot_loads() - before, 1);
    }
}
