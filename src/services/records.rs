//! Intermediate, source-specific record sets handed from the parsers and
//! protocol clients to the normalizer.

use chrono::{DateTime, FixedOffset, NaiveDateTime};

use crate::models::DropReport;
use crate::services::m3u_parser::M3uPlaylist;
use crate::services::stalker::types::{StalkerChannel, StalkerGenre};
use crate::services::xtream::types::{XtreamCategory, XtreamLiveStream, XtreamVodStream};

/// Timestamp as encoded by the source, before UTC normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTime {
    /// Seconds since the Unix epoch
    Unix(i64),
    /// Local time with an explicit offset
    Offset(DateTime<FixedOffset>),
    /// Local time in the source's timezone
    Naive(NaiveDateTime),
}

/// Programme entry before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawProgramme {
    /// Guide channel id the programme belongs to
    pub channel_ref: String,
    pub title: String,
    pub description: Option<String>,
    pub start: RawTime,
    /// Absent when the guide omits it; the next programme's start is used then
    pub end: Option<RawTime>,
}

/// `<channel>` element of a guide
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuideChannel {
    pub id: String,
    pub display_names: Vec<String>,
    pub icon: Option<String>,
}

/// Guide data from any source
#[derive(Debug, Clone, Default)]
pub struct GuideRecords {
    pub channels: Vec<GuideChannel>,
    pub programmes: Vec<RawProgramme>,
    pub report: DropReport,
}

impl GuideRecords {
    pub fn extend(&mut self, other: GuideRecords) {
        self.channels.extend(other.channels);
        self.programmes.extend(other.programmes);
        self.report.merge(&other.report);
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.programmes.is_empty()
    }
}

/// Xtream Codes catalog as fetched
#[derive(Debug, Clone, Default)]
pub struct XtreamCatalog {
    pub live_categories: Vec<XtreamCategory>,
    pub live_streams: Vec<XtreamLiveStream>,
    pub vod_categories: Vec<XtreamCategory>,
    pub vod_streams: Vec<XtreamVodStream>,
    /// Builds playback URLs for stream ids
    pub credentials: crate::services::xtream::XtreamCredentials,
    /// Server timezone from `server_info`, if advertised
    pub timezone: Option<String>,
    /// Preferred container for live playback URLs
    pub live_extension: String,
    pub report: DropReport,
}

/// Stalker portal catalog as fetched
#[derive(Debug, Clone, Default)]
pub struct StalkerCatalog {
    pub genres: Vec<StalkerGenre>,
    pub channels: Vec<StalkerChannel>,
    pub report: DropReport,
}

/// Everything a fetch step produced for one playlist
#[derive(Debug, Clone)]
pub enum SourceRecords {
    M3u(M3uPlaylist),
    Xtream(XtreamCatalog),
    Stalker(StalkerCatalog),
}

/// Source records plus optional guide data
#[derive(Debug, Clone)]
pub struct FetchedSource {
    pub records: SourceRecords,
    pub guide: GuideRecords,
    /// Set when a guide was expected but could not be fetched; the
    /// previously persisted programmes are kept in that case
    pub guide_error: Option<String>,
}

impl FetchedSource {
    pub fn new(records: SourceRecords) -> Self {
        Self {
            records,
            guide: GuideRecords::default(),
            guide_error: None,
        }
    }

    pub fn with_guide(mut self, guide: GuideRecords) -> Self {
        self.guide = guide;
        self
    }

    pub fn with_guide_error(mut self, message: impl Into<String>) -> Self {
        self.guide_error = Some(message.into());
        self
    }

    pub fn kind(&self) -> &'static str {
        match self.records {
            SourceRecords::M3u(_) => "m3u",
            SourceRecords::Xtream(_) => "xtream",
            SourceRecords::Stalker(_) => "stalker",
        }
    }
}
