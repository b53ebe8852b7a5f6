//! M3U / M3U8 playlist parser
//!
//! Pure, line-oriented parsing of extended M3U text into intermediate
//! records. An `#EXTINF:` line is paired with the next URL line; directives in
//! between (`#EXTVLCOPT`, `#KODIPROP`, ...) are ignored, `#EXTGRP:` supplies a
//! group when the `#EXTINF` has none.

use lazy_static::lazy_static;
use regex::Regex;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::models::{CatchUp, DropReason, DropReport};

lazy_static! {
    /// Regex to normalize multiple whitespaces into single space
    static ref MULTI_SPACE_REGEX: Regex = Regex::new(r"\s{2,}").unwrap();
    /// Regex to parse EXTINF attributes (tvg-id="...", group-title='...', tvg-chno=5)
    static ref ATTR_REGEX: Regex =
        Regex::new(r#"([A-Za-z][\w-]*)=(?:"([^"]*)"|'([^']*)'|([^\s"',]+))"#).unwrap();
    /// Regex to extract duration from EXTINF line
    static ref DURATION_REGEX: Regex = Regex::new(r"^\s*(-?\d+)").unwrap();
}

/// One channel entry as written in the playlist
#[derive(Debug, Clone, Default, PartialEq)]
pub struct M3uRecord {
    pub name: String,
    pub url: String,
    pub group: Option<String>,
    pub logo: Option<String>,
    pub tvg_id: Option<String>,
    pub tvg_name: Option<String>,
    pub channel_number: Option<u32>,
    pub duration: i32,
    pub catchup: Option<CatchUp>,
}

/// Parsed playlist: records, guide URLs from the header, dropped lines
#[derive(Debug, Clone, Default)]
pub struct M3uPlaylist {
    pub guide_urls: Vec<String>,
    pub records: Vec<M3uRecord>,
    pub report: DropReport,
}

/// Parsed EXTINF line data
#[derive(Debug, Default)]
struct ExtinfData {
    duration: i32,
    attributes: HashMap<String, String>,
    title: String,
    line_no: usize,
}

impl ExtinfData {
    fn attr(&self, key: &str) -> Option<String> {
        self.attributes
            .get(key)
            .map(|v| normalize_text(v))
            .filter(|v| !v.is_empty())
    }
}

/// Generate SHA1 hash of a string as lowercase hex
pub fn hash_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalize text: trim and collapse multiple spaces into single space
pub fn normalize_text(text: &str) -> String {
    MULTI_SPACE_REGEX.replace_all(text.trim(), " ").to_string()
}

/// Split `duration attrs,Title` at the first comma outside quotes.
///
/// An unterminated quote falls back to the first comma anywhere.
fn split_header_title(content: &str) -> (&str, &str) {
    let mut in_quotes = false;
    for (idx, ch) in content.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return (&content[..idx], &content[idx + 1..]),
            _ => {}
        }
    }
    match content.find(',') {
        Some(idx) => (&content[..idx], &content[idx + 1..]),
        None => (content, ""),
    }
}

fn parse_attributes(header: &str) -> HashMap<String, String> {
    let mut attributes = HashMap::new();
    for caps in ATTR_REGEX.captures_iter(header) {
        let key = match caps.get(1) {
            Some(m) => m.as_str().to_ascii_lowercase(),
            None => continue,
        };
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        attributes.entry(key).or_insert(value);
    }
    attributes
}

/// Parse an EXTINF line
/// Format: #EXTINF:duration tvg-id="..." tvg-name="..." tvg-logo="..." group-title="...",Title
fn parse_extinf(line: &str, line_no: usize) -> ExtinfData {
    let content = &line["#EXTINF:".len()..];
    let (header, title) = split_header_title(content);

    let duration = DURATION_REGEX
        .captures(header)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(-1);

    ExtinfData {
        duration,
        attributes: parse_attributes(header),
        title: title.to_string(),
        line_no,
    }
}

fn parse_catchup(extinf: &ExtinfData) -> Option<CatchUp> {
    let mode = extinf.attr("catchup").or_else(|| extinf.attr("catchup-type"));
    let days = extinf
        .attr("catchup-days")
        .or_else(|| extinf.attr("timeshift"))
        .and_then(|d| d.parse().ok());
    let source = extinf.attr("catchup-source");

    if mode.is_none() && days.is_none() && source.is_none() {
        return None;
    }
    Some(CatchUp { mode, days, source })
}

fn build_record(extinf: ExtinfData, group_hint: Option<String>, url: &str) -> Option<M3uRecord> {
    let tvg_name = extinf.attr("tvg-name");
    let title = normalize_text(&extinf.title);
    let name = if title.is_empty() {
        tvg_name.clone()?
    } else {
        title
    };

    Some(M3uRecord {
        group: extinf.attr("group-title").or(group_hint),
        logo: extinf.attr("tvg-logo").or_else(|| extinf.attr("logo")),
        tvg_id: extinf.attr("tvg-id"),
        channel_number: extinf.attr("tvg-chno").and_then(|n| n.parse().ok()),
        catchup: parse_catchup(&extinf),
        duration: extinf.duration,
        tvg_name,
        name,
        url: url.to_string(),
    })
}

fn header_guide_urls(line: &str) -> Vec<String> {
    let attributes = parse_attributes(line);
    ["url-tvg", "x-tvg-url"]
        .iter()
        .filter_map(|key| attributes.get(*key))
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse raw playlist bytes; invalid UTF-8 sequences are replaced
pub fn parse_m3u_bytes(bytes: &[u8]) -> Result<M3uPlaylist, ParseError> {
    parse_m3u(&String::from_utf8_lossy(bytes))
}

/// Parse playlist text into intermediate records.
///
/// Record-level problems are counted in the returned report. Fails with
/// [`ParseError::Empty`] only when non-blank input yields no record at all.
pub fn parse_m3u(text: &str) -> Result<M3uPlaylist, ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut playlist = M3uPlaylist::default();
    let mut pending: Option<ExtinfData> = None;
    let mut pending_group: Option<String> = None;
    let mut saw_content = false;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw_line.trim().trim_start_matches('\u{feff}');

        if trimmed.is_empty() {
            continue;
        }
        saw_content = true;

        if trimmed.starts_with("#EXTM3U") {
            playlist.guide_urls.extend(header_guide_urls(trimmed));
            continue;
        }

        if trimmed.starts_with("#EXTINF:") {
            if let Some(orphan) = pending.replace(parse_extinf(trimmed, line_no)) {
                debug!("Discarding #EXTINF at line {} without URL", orphan.line_no);
                playlist.report.record(DropReason::OrphanedMetadata);
            }
            pending_group = None;
            continue;
        }

        if let Some(group) = trimmed.strip_prefix("#EXTGRP:") {
            let group = normalize_text(group);
            if !group.is_empty() {
                pending_group = Some(group);
            }
            continue;
        }

        // Unknown directives and comments
        if trimmed.starts_with('#') {
            continue;
        }

        match pending.take() {
            Some(extinf) => {
                let line_of_extinf = extinf.line_no;
                match build_record(extinf, pending_group.take(), trimmed) {
                    Some(record) => playlist.records.push(record),
                    None => {
                        debug!("Entry at line {} has no name", line_of_extinf);
                        playlist.report.record(DropReason::MissingName);
                    }
                }
            }
            None => {
                debug!("URL at line {} has no #EXTINF", line_no);
                playlist.report.record(DropReason::UrlWithoutMetadata);
            }
        }
    }

    if let Some(orphan) = pending {
        debug!("Discarding trailing #EXTINF at line {}", orphan.line_no);
        playlist.report.record(DropReason::OrphanedMetadata);
    }

    if !playlist.report.is_empty() {
        warn!(
            "M3U parse dropped {} line(s): {:?}",
            playlist.report.total(),
            playlist.report.iter().collect::<Vec<_>>()
        );
    }

    if playlist.records.is_empty() && saw_content {
        return Err(ParseError::Empty);
    }

    Ok(playlist)
}
