use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why a record was left out of the canonical set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// `#EXTINF` line with no URL line after it
    OrphanedMetadata,
    /// URL line with no `#EXTINF` before it
    UrlWithoutMetadata,
    MissingName,
    MissingUrl,
    DuplicateId,
    /// Source element that could not be decoded
    MalformedRecord,
    /// Programme whose times could not be read or do not form a range
    InvalidTimeRange,
    /// Programme replaced by a later-starting overlapping one
    OverlappingProgramme,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::OrphanedMetadata => "orphaned_metadata",
            DropReason::UrlWithoutMetadata => "url_without_metadata",
            DropReason::MissingName => "missing_name",
            DropReason::MissingUrl => "missing_url",
            DropReason::DuplicateId => "duplicate_id",
            DropReason::MalformedRecord => "malformed_record",
            DropReason::InvalidTimeRange => "invalid_time_range",
            DropReason::OverlappingProgramme => "overlapping_programme",
        }
    }
}

/// Count of dropped records per reason
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropReport {
    counts: BTreeMap<DropReason, usize>,
}

impl DropReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, reason: DropReason) {
        self.add(reason, 1);
    }

    pub fn add(&mut self, reason: DropReason, count: usize) {
        if count > 0 {
            *self.counts.entry(reason).or_insert(0) += count;
        }
    }

    pub fn merge(&mut self, other: &DropReport) {
        for (reason, count) in &other.counts {
            self.add(*reason, *count);
        }
    }

    pub fn count(&self, reason: DropReason) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DropReason, usize)> + '_ {
        self.counts.iter().map(|(r, c)| (*r, *c))
    }
}
