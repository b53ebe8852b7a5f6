//! Normalizer
//!
//! Maps the source-specific records of one fetch into the canonical entity
//! graph: stable ids, categories on first encounter, required-field checks,
//! keep-first duplicate resolution and UTC programme times without overlaps.
//! Pure and synchronous; every record it leaves out is counted in the
//! [`DropReport`].

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ValidationError;
use crate::models::{
    CatalogSnapshot, Category, CatchUp, Channel, DropReason, DropReport, EntityMap, EpgEntry, MediaKind,
};
use crate::services::epg::GuideAliases;
use crate::services::m3u_parser::{hash_hex, M3uPlaylist};
use crate::services::records::{
    FetchedSource, GuideRecords, RawProgramme, RawTime, SourceRecords, StalkerCatalog, XtreamCatalog,
};

pub const UNCATEGORIZED_ID: &str = "uncategorized";
pub const UNCATEGORIZED_NAME: &str = "Uncategorized";

/// Containers that mark an M3U entry as a movie rather than a live stream
const MOVIE_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".avi", ".mov", ".wmv", ".m4v"];

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Zone for guide times that carry no offset
    pub timezone: Tz,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self { timezone: Tz::UTC }
    }
}

impl NormalizeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self::default().with_timezone_name(Some(&config.source_timezone))
    }

    /// Switch to a named zone (e.g. "Europe/London"); unknown names keep the current one
    pub fn with_timezone_name(mut self, name: Option<&str>) -> Self {
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            match name.parse::<Tz>() {
                Ok(tz) => self.timezone = tz,
                Err(_) => warn!("Unknown source timezone `{}`, keeping {}", name, self.timezone),
            }
        }
        self
    }
}

/// Canonical set for one playlist plus what was dropped on the way
#[derive(Debug, Clone, Default)]
pub struct NormalizedCatalog {
    pub snapshot: CatalogSnapshot,
    pub report: DropReport,
    /// Guide fetch failure carried over from the fetch step
    pub guide_error: Option<String>,
}

/// Channel id for an M3U entry: name and URL are the only stable identity
pub fn m3u_channel_id(name: &str, url: &str) -> String {
    format!("m3u-{}", &hash_hex(&format!("{}\n{}", name, url))[..16])
}

/// Category id for an M3U group name
pub fn m3u_category_id(group: &str) -> String {
    format!("grp-{}", &hash_hex(group)[..12])
}

/// Live or movie, from the stream URL of an M3U entry
pub fn classify_m3u_url(url: &str) -> MediaKind {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .to_ascii_lowercase();
    if path.contains("/movie/") || MOVIE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        MediaKind::Movie
    } else {
        MediaKind::Live
    }
}

pub fn to_utc(time: RawTime, tz: &Tz) -> Option<DateTime<Utc>> {
    match time {
        RawTime::Unix(secs) => Utc.timestamp_opt(secs, 0).single(),
        RawTime::Offset(dt) => Some(dt.with_timezone(&Utc)),
        // Ambiguous local times (DST fold) take the earlier instant
        RawTime::Naive(naive) => tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

fn validate(channel: &Channel) -> Result<(), ValidationError> {
    if channel.name.trim().is_empty() {
        return Err(ValidationError {
            record: channel.id.clone(),
            field: "name",
        });
    }
    if channel.stream_url.trim().is_empty() {
        return Err(ValidationError {
            record: channel.id.clone(),
            field: "stream_url",
        });
    }
    Ok(())
}

/// Accumulates entities with keep-first uniqueness
struct CatalogBuilder {
    categories: EntityMap<Category>,
    channels: EntityMap<Channel>,
    report: DropReport,
}

impl CatalogBuilder {
    fn new(report: DropReport) -> Self {
        Self {
            categories: EntityMap::new(),
            channels: EntityMap::new(),
            report,
        }
    }

    /// Declare a category; a repeated id keeps the first declaration
    fn declare_category(&mut self, id: String, name: &str, media_kind: MediaKind) {
        if self.categories.contains(&id) {
            return;
        }
        let name = if name.trim().is_empty() {
            UNCATEGORIZED_NAME.to_string()
        } else {
            name.trim().to_string()
        };
        let order = self.categories.len() as u32;
        let _ = self.categories.insert(Category {
            id,
            name,
            order,
            media_kind,
        });
    }

    /// Validate and insert a channel, creating its category on first use.
    /// `category_name` names the category if it does not exist yet.
    fn add_channel(&mut self, channel: Channel, category_name: &str) {
        if let Err(e) = validate(&channel) {
            debug!("Dropping channel: {}", e);
            self.report.record(if e.field == "name" {
                DropReason::MissingName
            } else {
                DropReason::MissingUrl
            });
            return;
        }

        if self.channels.contains(&channel.id) {
            warn!(
                "Duplicate channel id `{}` (`{}`), keeping the first occurrence",
                channel.id, channel.name
            );
            self.report.record(DropReason::DuplicateId);
            return;
        }

        self.declare_category(channel.category_id.clone(), category_name, channel.media_kind);
        let _ = self.channels.insert(channel);
    }

    /// Point the channel at the uncategorized bucket when its category was never declared
    fn declared_or_uncategorized(&self, id: Option<String>) -> String {
        match id {
            Some(id) if self.categories.contains(&id) => id,
            _ => UNCATEGORIZED_ID.to_string(),
        }
    }
}

/// Normalize one fetch into the canonical set
pub fn normalize(fetched: FetchedSource, options: &NormalizeOptions) -> NormalizedCatalog {
    let FetchedSource {
        records,
        guide,
        guide_error,
    } = fetched;

    let (mut builder, tz) = match records {
        SourceRecords::M3u(playlist) => (normalize_m3u(playlist), options.timezone),
        SourceRecords::Xtream(catalog) => {
            let tz = options
                .clone()
                .with_timezone_name(catalog.timezone.as_deref())
                .timezone;
            (normalize_xtream(catalog), tz)
        }
        SourceRecords::Stalker(catalog) => (normalize_stalker(catalog), options.timezone),
    };

    let epg = normalize_guide(guide, &mut builder.channels, &tz, &mut builder.report);

    info!(
        "Normalized {} categories, {} channels, {} programmes ({} records dropped)",
        builder.categories.len(),
        builder.channels.len(),
        epg.len(),
        builder.report.total()
    );

    NormalizedCatalog {
        snapshot: CatalogSnapshot {
            categories: builder.categories,
            channels: builder.channels,
            epg,
        },
        report: builder.report,
        guide_error,
    }
}

fn normalize_m3u(playlist: M3uPlaylist) -> CatalogBuilder {
    let mut builder = CatalogBuilder::new(playlist.report);

    for record in playlist.records {
        let media_kind = classify_m3u_url(&record.url);
        let (category_id, category_name) = match record.group.as_deref().map(str::trim) {
            Some(group) if !group.is_empty() => (m3u_category_id(group), group.to_string()),
            _ => (UNCATEGORIZED_ID.to_string(), UNCATEGORIZED_NAME.to_string()),
        };

        let channel = Channel {
            id: m3u_channel_id(&record.name, &record.url),
            name: record.name,
            stream_url: record.url,
            logo_url: record.logo,
            category_id,
            epg_id: record.tvg_id,
            media_kind,
            number: record.channel_number,
            catchup: record.catchup,
            stale: false,
        };
        builder.add_channel(channel, &category_name);
    }

    builder
}

fn normalize_xtream(catalog: XtreamCatalog) -> CatalogBuilder {
    let XtreamCatalog {
        live_categories,
        live_streams,
        vod_categories,
        vod_streams,
        credentials,
        live_extension,
        report,
        ..
    } = catalog;
    let mut builder = CatalogBuilder::new(report);
    let live_extension = if live_extension.is_empty() { "ts".to_string() } else { live_extension };

    for category in &live_categories {
        builder.declare_category(
            format!("xt-{}", category.category_id),
            &category.category_name,
            MediaKind::Live,
        );
    }
    for category in &vod_categories {
        builder.declare_category(
            format!("xt-vod-{}", category.category_id),
            &category.category_name,
            MediaKind::Movie,
        );
    }

    for stream in live_streams {
        let category_id = builder.declared_or_uncategorized(stream.category_id.as_ref().map(|c| format!("xt-{}", c)));
        let catchup = stream.has_archive().then(|| CatchUp {
            mode: Some("xc".to_string()),
            days: stream.tv_archive_duration,
            source: None,
        });
        let channel = Channel {
            id: format!("xt-{}", stream.stream_id),
            stream_url: credentials.live_url(stream.stream_id, &live_extension),
            name: stream.name,
            logo_url: stream.stream_icon,
            category_id,
            epg_id: stream.epg_channel_id,
            media_kind: MediaKind::Live,
            number: stream.num,
            catchup,
            stale: false,
        };
        builder.add_channel(channel, UNCATEGORIZED_NAME);
    }

    for stream in vod_streams {
        let category_id =
            builder.declared_or_uncategorized(stream.category_id.as_ref().map(|c| format!("xt-vod-{}", c)));
        let extension = stream.container_extension.as_deref().unwrap_or("mp4");
        let channel = Channel {
            id: format!("xt-vod-{}", stream.stream_id),
            stream_url: credentials.vod_url(stream.stream_id, extension),
            name: stream.name,
            logo_url: stream.stream_icon,
            category_id,
            epg_id: None,
            media_kind: MediaKind::Movie,
            number: stream.num,
            catchup: None,
            stale: false,
        };
        builder.add_channel(channel, UNCATEGORIZED_NAME);
    }

    builder
}

fn normalize_stalker(catalog: StalkerCatalog) -> CatalogBuilder {
    let mut builder = CatalogBuilder::new(catalog.report);

    for genre in catalog.genres.iter().filter(|g| !g.is_catch_all()) {
        builder.declare_category(format!("stk-{}", genre.id), &genre.title, MediaKind::Live);
    }

    for channel in catalog.channels {
        let category_id =
            builder.declared_or_uncategorized(channel.tv_genre_id.as_ref().map(|g| format!("stk-{}", g)));
        let catchup = channel.has_archive().then(|| CatchUp {
            mode: Some("stalker".to_string()),
            // portals report the archive depth in hours
            days: channel.tv_archive_duration.map(|hours| (hours + 23) / 24),
            source: None,
        });
        let stream_url = channel.stream_url().unwrap_or_default();
        let normalized = Channel {
            id: format!("stk-{}", channel.id),
            name: channel.name,
            stream_url,
            logo_url: channel.logo,
            category_id,
            // get_epg_info keys programmes by the portal channel id
            epg_id: Some(channel.id),
            media_kind: MediaKind::Live,
            number: channel.number,
            catchup,
            stale: false,
        };
        builder.add_channel(normalized, UNCATEGORIZED_NAME);
    }

    builder
}

/// UTC conversion, range checks, channel matching and overlap resolution.
///
/// Channels whose EPG id does not name a guide channel are matched by
/// display name and get the guide id written back. Programmes for guide
/// channels no channel refers to are not kept.
fn normalize_guide(
    guide: GuideRecords,
    channels: &mut EntityMap<Channel>,
    tz: &Tz,
    report: &mut DropReport,
) -> EntityMap<EpgEntry> {
    report.merge(&guide.report);
    let mut epg = EntityMap::new();
    if guide.programmes.is_empty() {
        return epg;
    }

    let aliases = GuideAliases::new(
        &guide.channels,
        guide.programmes.iter().map(|p| p.channel_ref.as_str()),
    );

    let ids: Vec<String> = channels.ids().map(String::from).collect();
    let mut wanted: HashSet<String> = HashSet::new();
    for id in ids {
        let Some(channel) = channels.get_mut(&id) else {
            continue;
        };
        if let Some(guide_id) = aliases.resolve(channel.epg_id.as_deref(), &channel.name) {
            if channel.epg_id.as_deref() != Some(guide_id) {
                channel.epg_id = Some(guide_id.to_string());
            }
            wanted.insert(guide_id.to_string());
        }
    }

    let mut per_channel: HashMap<String, Vec<(DateTime<Utc>, Option<DateTime<Utc>>, RawProgramme)>> =
        HashMap::new();
    let mut unmatched = 0usize;
    for programme in guide.programmes {
        let Some(start) = to_utc(programme.start, tz) else {
            report.record(DropReason::InvalidTimeRange);
            continue;
        };
        let end = match programme.end {
            Some(end) => match to_utc(end, tz) {
                Some(end) => Some(end),
                None => {
                    report.record(DropReason::InvalidTimeRange);
                    continue;
                }
            },
            None => None,
        };
        if !wanted.contains(&programme.channel_ref) {
            unmatched += 1;
            continue;
        }
        per_channel
            .entry(programme.channel_ref.clone())
            .or_default()
            .push((start, end, programme));
    }
    if unmatched > 0 {
        debug!("Skipped {} programmes for guide channels without a matching channel", unmatched);
    }

    let mut channel_ids: Vec<String> = per_channel.keys().cloned().collect();
    channel_ids.sort();
    for channel_id in channel_ids {
        let Some(mut programmes) = per_channel.remove(&channel_id) else {
            continue;
        };
        // Stable: equal starts keep source order, so the later one wins below
        programmes.sort_by_key(|(start, _, _)| *start);
        let programmes = close_open_ends(programmes, report);

        let mut kept: Vec<(DateTime<Utc>, DateTime<Utc>, RawProgramme)> = Vec::with_capacity(programmes.len());
        for entry in programmes {
            while matches!(kept.last(), Some((_, end, _)) if *end > entry.0) {
                kept.pop();
                report.record(DropReason::OverlappingProgramme);
            }
            kept.push(entry);
        }

        for (start, end, programme) in kept {
            let entry = EpgEntry::new(channel_id.as_str(), programme.title, start, end, programme.description);
            if epg.insert(entry).is_err() {
                report.record(DropReason::DuplicateId);
            }
        }
    }

    epg
}

/// Give programmes without an end the start of the next later programme on
/// the same channel, then drop the ones that still have no positive length.
/// `programmes` must be sorted by start.
fn close_open_ends(
    programmes: Vec<(DateTime<Utc>, Option<DateTime<Utc>>, RawProgramme)>,
    report: &mut DropReport,
) -> Vec<(DateTime<Utc>, DateTime<Utc>, RawProgramme)> {
    let starts: Vec<DateTime<Utc>> = programmes.iter().map(|(start, _, _)| *start).collect();
    let mut closed = Vec::with_capacity(programmes.len());
    for (i, (start, end, programme)) in programmes.into_iter().enumerate() {
        let end = end.or_else(|| starts[i + 1..].iter().copied().find(|next| *next > start));
        match end {
            Some(end) if end > start => closed.push((start, end, programme)),
            _ => report.record(DropReason::InvalidTimeRange),
        }
    }
    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::m3u_parser::parse_m3u;
    use crate::services::records::GuideChannel;
    use crate::services::stalker::{StalkerChannel, StalkerGenre};
    use crate::services::xtream::{XtreamCategory, XtreamCredentials, XtreamLiveStream};
    use chrono::{FixedOffset, NaiveDate};

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
    }

    fn unix(h: u32, m: u32) -> RawTime {
        RawTime::Unix(utc(h, m).timestamp())
    }

    fn live_stream(id: i64, name: &str, category: Option<&str>) -> XtreamLiveStream {
        XtreamLiveStream {
            num: None,
            name: name.to_string(),
            stream_id: id,
            stream_icon: None,
            epg_channel_id: None,
            category_id: category.map(String::from),
            tv_archive: None,
            tv_archive_duration: None,
            direct_source: None,
        }
    }

    fn xtream_catalog() -> XtreamCatalog {
        XtreamCatalog {
            live_categories: vec![XtreamCategory {
                category_id: "5".into(),
                category_name: "News".into(),
                parent_id: None,
            }],
            live_streams: vec![
                live_stream(1, "BBC One", Some("5")),
                live_stream(2, "CNN", Some("99")),
                live_stream(1, "BBC One again", Some("5")),
                live_stream(3, "", Some("5")),
            ],
            credentials: XtreamCredentials::new("http://x:8080", "u", "p"),
            live_extension: "ts".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_bbc_one_m3u_scenario() {
        let text = "#EXTM3U\n#EXTINF:-1 tvg-id=\"bbc1.uk\" group-title=\"News\",BBC One\nhttp://x/1.ts\n";
        let playlist = parse_m3u(text).unwrap();
        let catalog = normalize(FetchedSource::new(SourceRecords::M3u(playlist)), &NormalizeOptions::default());

        let snapshot = &catalog.snapshot;
        assert_eq!(snapshot.channels.len(), 1);
        assert_eq!(snapshot.categories.len(), 1);

        let channel = snapshot.channels.iter().next().unwrap();
        let category = snapshot.categories.iter().next().unwrap();
        assert_eq!(channel.name, "BBC One");
        assert_eq!(channel.stream_url, "http://x/1.ts");
        assert_eq!(channel.epg_id.as_deref(), Some("bbc1.uk"));
        assert_eq!(category.name, "News");
        assert_eq!(channel.category_id, category.id);
        assert_eq!(channel.id, m3u_channel_id("BBC One", "http://x/1.ts"));
        assert!(catalog.report.is_empty());
    }

    #[test]
    fn test_m3u_without_group_goes_to_uncategorized() {
        let playlist = parse_m3u("#EXTM3U\n#EXTINF:-1,Film\nhttp://x/movie/u/p/9.mkv\n").unwrap();
        let catalog = normalize(FetchedSource::new(SourceRecords::M3u(playlist)), &NormalizeOptions::default());

        let channel = catalog.snapshot.channels.iter().next().unwrap();
        assert_eq!(channel.category_id, UNCATEGORIZED_ID);
        assert_eq!(channel.media_kind, MediaKind::Movie);
        assert_eq!(
            catalog.snapshot.categories.get(UNCATEGORIZED_ID).unwrap().name,
            UNCATEGORIZED_NAME
        );
    }

    #[test]
    fn test_xtream_ids_are_stable_and_duplicates_keep_first() {
        let first = normalize(
            FetchedSource::new(SourceRecords::Xtream(xtream_catalog())),
            &NormalizeOptions::default(),
        );
        let second = normalize(
            FetchedSource::new(SourceRecords::Xtream(xtream_catalog())),
            &NormalizeOptions::default(),
        );

        let ids: Vec<_> = first.snapshot.channels.ids().collect();
        assert_eq!(ids, vec!["xt-1", "xt-2"]);
        assert_eq!(ids, second.snapshot.channels.ids().collect::<Vec<_>>());

        let bbc = first.snapshot.channels.get("xt-1").unwrap();
        assert_eq!(bbc.name, "BBC One");
        assert_eq!(bbc.category_id, "xt-5");
        assert_eq!(bbc.stream_url, "http://x:8080/live/u/p/1.ts");

        // Undeclared category falls back
        assert_eq!(first.snapshot.channels.get("xt-2").unwrap().category_id, UNCATEGORIZED_ID);

        assert_eq!(first.report.count(DropReason::DuplicateId), 1);
        assert_eq!(first.report.count(DropReason::MissingName), 1);
    }

    #[test]
    fn test_stalker_channels() {
        let catalog = StalkerCatalog {
            genres: vec![
                StalkerGenre { id: "*".into(), title: "All".into(), number: None },
                StalkerGenre { id: "7".into(), title: "Sport".into(), number: None },
            ],
            channels: vec![
                StalkerChannel {
                    id: "17".into(),
                    name: "Sky Sports".into(),
                    number: Some(4),
                    cmd: "ffmpeg http://cdn/17".into(),
                    logo: None,
                    tv_genre_id: Some("7".into()),
                    xmltv_id: None,
                    tv_archive: Some(1),
                    tv_archive_duration: Some(48),
                },
                StalkerChannel {
                    id: "18".into(),
                    name: "No URL".into(),
                    number: None,
                    cmd: "ffmpeg ".into(),
                    logo: None,
                    tv_genre_id: None,
                    xmltv_id: None,
                    tv_archive: None,
                    tv_archive_duration: None,
                },
            ],
            report: DropReport::new(),
        };
        let normalized = normalize(
            FetchedSource::new(SourceRecords::Stalker(catalog)),
            &NormalizeOptions::default(),
        );

        assert_eq!(normalized.snapshot.categories.len(), 1);
        let channel = normalized.snapshot.channels.get("stk-17").unwrap();
        assert_eq!(channel.stream_url, "http://cdn/17");
        assert_eq!(channel.category_id, "stk-7");
        assert_eq!(channel.epg_id.as_deref(), Some("17"));
        assert_eq!(channel.catchup.as_ref().unwrap().days, Some(2));
        assert_eq!(normalized.report.count(DropReason::MissingUrl), 1);
    }

    fn guided_m3u(guide: GuideRecords) -> NormalizedCatalog {
        let playlist = parse_m3u("#EXTM3U\n#EXTINF:-1 tvg-id=\"bbc1.uk\",BBC One\nhttp://x/1.ts\n").unwrap();
        normalize(
            FetchedSource::new(SourceRecords::M3u(playlist)).with_guide(guide),
            &NormalizeOptions::default(),
        )
    }

    fn programme(channel: &str, title: &str, start: RawTime, end: RawTime) -> RawProgramme {
        RawProgramme {
            channel_ref: channel.into(),
            title: title.into(),
            description: None,
            start,
            end: Some(end),
        }
    }

    #[test]
    fn test_epg_overlap_later_start_wins() {
        let guide = GuideRecords {
            programmes: vec![
                programme("bbc1.uk", "A", unix(10, 0), unix(11, 0)),
                programme("bbc1.uk", "B", unix(10, 30), unix(11, 30)),
                programme("bbc1.uk", "C", unix(11, 30), unix(12, 0)),
                programme("bbc1.uk", "Zero", unix(12, 0), unix(12, 0)),
            ],
            ..Default::default()
        };
        let catalog = guided_m3u(guide);

        let titles: Vec<_> = catalog.snapshot.epg.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "C"]);
        assert_eq!(catalog.report.count(DropReason::OverlappingProgramme), 1);
        assert_eq!(catalog.report.count(DropReason::InvalidTimeRange), 1);

        let entries: Vec<_> = catalog.snapshot.epg.iter().collect();
        for pair in entries.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn test_missing_stop_ends_at_next_programme() {
        let open = |title: &str, start: RawTime| RawProgramme {
            end: None,
            ..programme("bbc1.uk", title, start, start)
        };
        let guide = GuideRecords {
            programmes: vec![
                open("Late", unix(22, 0)),
                open("Breakfast", unix(6, 0)),
                programme("bbc1.uk", "News", unix(12, 0), unix(13, 0)),
                open("Lunch", unix(12, 0)),
            ],
            ..Default::default()
        };
        let catalog = guided_m3u(guide);

        let entries: Vec<_> = catalog.snapshot.epg.iter().collect();
        let titles: Vec<_> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Breakfast", "Lunch"]);
        assert_eq!(entries[0].end, utc(12, 0));
        // Lunch starts with News and wins the tie, and ends when Late starts
        assert_eq!(entries[1].end, utc(22, 0));
        // News lost the overlap; Late has nothing after it
        assert_eq!(catalog.report.count(DropReason::OverlappingProgramme), 1);
        assert_eq!(catalog.report.count(DropReason::InvalidTimeRange), 1);
    }

    #[test]
    fn test_epg_times_normalized_to_utc() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let local = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap().and_hms_opt(20, 0, 0).unwrap();
        let guide = GuideRecords {
            programmes: vec![
                programme(
                    "bbc1.uk",
                    "Offset",
                    RawTime::Offset(offset.from_local_datetime(&local).unwrap()),
                    RawTime::Offset(offset.from_local_datetime(&(local + chrono::Duration::hours(1))).unwrap()),
                ),
                programme(
                    "bbc1.uk",
                    "Naive",
                    RawTime::Naive(local + chrono::Duration::hours(2)),
                    RawTime::Naive(local + chrono::Duration::hours(3)),
                ),
            ],
            ..Default::default()
        };
        let playlist = parse_m3u("#EXTM3U\n#EXTINF:-1 tvg-id=\"bbc1.uk\",BBC One\nhttp://x/1.ts\n").unwrap();
        let options = NormalizeOptions::default().with_timezone_name(Some("Europe/London"));
        let catalog = normalize(
            FetchedSource::new(SourceRecords::M3u(playlist)).with_guide(guide),
            &options,
        );

        let entries: Vec<_> = catalog.snapshot.epg.iter().collect();
        assert_eq!(entries[0].start.to_rfc3339(), "2024-07-01T19:00:00+00:00");
        // 22:00 BST is 21:00 UTC
        assert_eq!(entries[1].start.to_rfc3339(), "2024-07-01T21:00:00+00:00");
    }

    #[test]
    fn test_channel_matched_by_display_name() {
        let playlist = parse_m3u("#EXTM3U\n#EXTINF:-1,BBC 1 HD\nhttp://x/1.ts\n").unwrap();
        let guide = GuideRecords {
            channels: vec![GuideChannel {
                id: "bbc1.uk".into(),
                display_names: vec!["BBC One".into(), "BBC 1 HD".into()],
                icon: None,
            }],
            programmes: vec![
                programme("bbc1.uk", "News", unix(12, 0), unix(13, 0)),
                programme("other.uk", "Ignored", unix(12, 0), unix(13, 0)),
            ],
            ..Default::default()
        };
        let catalog = normalize(
            FetchedSource::new(SourceRecords::M3u(playlist)).with_guide(guide),
            &NormalizeOptions::default(),
        );

        let channel = catalog.snapshot.channels.iter().next().unwrap();
        assert_eq!(channel.epg_id.as_deref(), Some("bbc1.uk"));
        assert_eq!(catalog.snapshot.epg.len(), 1);
        assert!(catalog.snapshot.epg.contains(&EpgEntry::key("bbc1.uk", utc(12, 0))));
    }

    #[test]
    fn test_classify_m3u_url() {
        assert_eq!(classify_m3u_url("http://x/live/u/p/1.ts"), MediaKind::Live);
        assert_eq!(classify_m3u_url("http://x/movie/u/p/1.mp4"), MediaKind::Movie);
        assert_eq!(classify_m3u_url("http://x/film.MKV?token=1"), MediaKind::Movie);
        assert_eq!(classify_m3u_url("http://x/stream.m3u8"), MediaKind::Live);
    }
}
