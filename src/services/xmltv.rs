//! XMLTV guide parser
//!
//! Streaming quick-xml reader over plain or gzip-compressed XMLTV. Only the
//! parts the correlator needs are kept: channel ids with display names, and
//! programme times/title/description.

use chrono::{DateTime, NaiveDateTime};
use flate2::read::GzDecoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::io::{BufRead, BufReader};
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::models::DropReason;
use crate::services::records::{GuideChannel, GuideRecords, RawProgramme, RawTime};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Which text node is being collected
#[derive(Debug, Clone, Copy, PartialEq)]
enum Capture {
    None,
    DisplayName,
    Title,
    Desc,
}

#[derive(Debug, Default)]
struct ProgrammeBuilder {
    channel: Option<String>,
    start: Option<String>,
    stop: Option<String>,
    title: Option<String>,
    desc: Option<String>,
}

/// Parse guide bytes, gunzipping when they carry the gzip magic
pub fn parse_xmltv_bytes(bytes: &[u8]) -> Result<GuideRecords, ParseError> {
    if bytes.starts_with(&GZIP_MAGIC) {
        parse_xmltv_reader(BufReader::new(GzDecoder::new(bytes)))
    } else {
        parse_xmltv_reader(bytes)
    }
}

/// Parse XMLTV from any buffered reader.
///
/// A read error after some programmes were collected keeps what was read;
/// an error before that fails with [`ParseError::Xml`].
pub fn parse_xmltv_reader<R: BufRead>(reader: R) -> Result<GuideRecords, ParseError> {
    let mut reader = Reader::from_reader(reader);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut guide = GuideRecords::default();
    let mut buf = Vec::new();
    let mut capture = Capture::None;
    let mut text = String::new();
    let mut channel: Option<GuideChannel> = None;
    let mut programme: Option<ProgrammeBuilder> = None;

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) => {
                let position = reader.buffer_position();
                if guide.programmes.is_empty() && guide.channels.is_empty() {
                    return Err(ParseError::Xml(format!("{} at byte {}", e, position)));
                }
                warn!(
                    "XMLTV read error at byte {} after {} programmes, keeping partial guide: {}",
                    position,
                    guide.programmes.len(),
                    e
                );
                break;
            }
        };

        match event {
            Event::Start(ref e) => match e.name().as_ref() {
                b"channel" => {
                    channel = Some(GuideChannel {
                        id: attribute(e, b"id").unwrap_or_default(),
                        ..Default::default()
                    });
                }
                b"programme" => {
                    programme = Some(ProgrammeBuilder {
                        channel: attribute(e, b"channel"),
                        start: attribute(e, b"start"),
                        stop: attribute(e, b"stop"),
                        ..Default::default()
                    });
                }
                b"display-name" if channel.is_some() => start_capture(&mut capture, &mut text, Capture::DisplayName),
                b"title" if programme.is_some() => start_capture(&mut capture, &mut text, Capture::Title),
                b"desc" if programme.is_some() => start_capture(&mut capture, &mut text, Capture::Desc),
                b"icon" => set_icon(&mut channel, e),
                _ => {}
            },
            Event::Empty(ref e) => {
                if e.name().as_ref() == b"icon" {
                    set_icon(&mut channel, e);
                }
            }
            Event::Text(t) if capture != Capture::None => match t.unescape() {
                Ok(value) => text.push_str(&value),
                Err(_) => text.push_str(&String::from_utf8_lossy(&t)),
            },
            Event::CData(t) if capture != Capture::None => {
                text.push_str(&String::from_utf8_lossy(&t));
            }
            Event::End(ref e) => match e.name().as_ref() {
                b"display-name" | b"title" | b"desc" => {
                    let value = std::mem::take(&mut text).trim().to_string();
                    match (capture, channel.as_mut(), programme.as_mut()) {
                        (Capture::DisplayName, Some(ch), _) if !value.is_empty() => {
                            ch.display_names.push(value);
                        }
                        (Capture::Title, _, Some(p)) if p.title.is_none() && !value.is_empty() => {
                            p.title = Some(value);
                        }
                        (Capture::Desc, _, Some(p)) if p.desc.is_none() && !value.is_empty() => {
                            p.desc = Some(value);
                        }
                        _ => {}
                    }
                    capture = Capture::None;
                }
                b"channel" => {
                    if let Some(ch) = channel.take() {
                        if ch.id.is_empty() {
                            guide.report.record(DropReason::MalformedRecord);
                        } else {
                            guide.channels.push(ch);
                        }
                    }
                }
                b"programme" => {
                    if let Some(p) = programme.take() {
                        finish_programme(p, &mut guide);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }

        buf.clear();
    }

    debug!(
        "XMLTV parsed: {} channels, {} programmes, {} dropped",
        guide.channels.len(),
        guide.programmes.len(),
        guide.report.total()
    );

    Ok(guide)
}

fn start_capture(capture: &mut Capture, text: &mut String, target: Capture) {
    *capture = target;
    text.clear();
}

fn set_icon(channel: &mut Option<GuideChannel>, e: &BytesStart<'_>) {
    if let Some(ch) = channel.as_mut() {
        if ch.icon.is_none() {
            ch.icon = attribute(e, b"src");
        }
    }
}

fn finish_programme(p: ProgrammeBuilder, guide: &mut GuideRecords) {
    let (channel_ref, title) = match (p.channel, p.title) {
        (Some(channel), Some(title)) if !channel.is_empty() => (channel, title),
        _ => {
            guide.report.record(DropReason::MalformedRecord);
            return;
        }
    };

    let start = p.start.as_deref().and_then(parse_xmltv_time);
    // `stop` is optional, but one that is present has to parse
    let end = match p.stop.as_deref() {
        Some(stop) => match parse_xmltv_time(stop) {
            Some(end) => Some(end),
            None => {
                guide.report.record(DropReason::InvalidTimeRange);
                return;
            }
        },
        None => None,
    };
    match start {
        Some(start) => guide.programmes.push(RawProgramme {
            channel_ref,
            title,
            description: p.desc,
            start,
            end,
        }),
        None => guide.report.record(DropReason::InvalidTimeRange),
    }
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Parse XMLTV time format: "20240115120000 +0100", "202401151200", "20240115120000Z"
pub fn parse_xmltv_time(value: &str) -> Option<RawTime> {
    let value = value.trim();
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, zone) = value.split_at(digits_end);

    let digits = match digits.len() {
        14 => digits.to_string(),
        12 => format!("{}00", digits),
        _ => return None,
    };
    let zone = zone.trim();

    if zone.is_empty() {
        return NaiveDateTime::parse_from_str(&digits, "%Y%m%d%H%M%S")
            .ok()
            .map(RawTime::Naive);
    }

    let zone = match zone {
        "Z" | "UTC" | "GMT" => "+0000".to_string(),
        other => other.replace(':', ""),
    };
    DateTime::parse_from_str(&format!("{} {}", digits, zone), "%Y%m%d%H%M%S %z")
        .ok()
        .map(RawTime::Offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<tv>
  <channel id="bbc1.uk">
    <display-name>BBC One</display-name>
    <display-name>BBC 1 HD</display-name>
    <icon src="http://logo/bbc1.png"/>
  </channel>
  <programme start="20240115120000 +0100" stop="20240115130000 +0100" channel="bbc1.uk">
    <title lang="en">News &amp; Weather</title>
    <desc>Headlines.</desc>
  </programme>
  <programme start="20240115130000" stop="20240115140000" channel="bbc1.uk">
    <title><![CDATA[Film]]></title>
  </programme>
  <programme start="garbage" stop="20240115140000 +0000" channel="bbc1.uk">
    <title>Broken</title>
  </programme>
  <programme start="20240115140000" channel="bbc1.uk">
    <title>Late Film</title>
  </programme>
</tv>"#;

    #[test]
    fn test_parse_sample_guide() {
        let guide = parse_xmltv_bytes(SAMPLE.as_bytes()).unwrap();

        assert_eq!(guide.channels.len(), 1);
        let channel = &guide.channels[0];
        assert_eq!(channel.id, "bbc1.uk");
        assert_eq!(channel.display_names, vec!["BBC One", "BBC 1 HD"]);
        assert_eq!(channel.icon.as_deref(), Some("http://logo/bbc1.png"));

        assert_eq!(guide.programmes.len(), 3);
        let first = &guide.programmes[0];
        assert_eq!(first.title, "News & Weather");
        assert_eq!(first.description.as_deref(), Some("Headlines."));
        match first.start {
            RawTime::Offset(dt) => {
                assert_eq!(dt.with_timezone(&Utc).to_rfc3339(), "2024-01-15T11:00:00+00:00")
            }
            other => panic!("unexpected time {:?}", other),
        }
        assert_eq!(guide.programmes[1].title, "Film");
        assert!(matches!(guide.programmes[1].start, RawTime::Naive(_)));
        assert!(guide.programmes[1].end.is_some());
        // No stop attribute: kept, end left to the normalizer
        assert_eq!(guide.programmes[2].title, "Late Film");
        assert!(guide.programmes[2].end.is_none());
        assert_eq!(guide.report.count(DropReason::InvalidTimeRange), 1);
    }

    #[test]
    fn test_parse_gzip_guide() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(SAMPLE.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let guide = parse_xmltv_bytes(&compressed).unwrap();
        assert_eq!(guide.programmes.len(), 3);
    }

    #[test]
    fn test_parse_xmltv_time_variants() {
        assert!(matches!(parse_xmltv_time("20240115120000 +0000"), Some(RawTime::Offset(_))));
        assert!(matches!(parse_xmltv_time("20240115120000+0530"), Some(RawTime::Offset(_))));
        assert!(matches!(parse_xmltv_time("20240115120000Z"), Some(RawTime::Offset(_))));
        assert!(matches!(parse_xmltv_time("202401151200"), Some(RawTime::Naive(_))));
        assert!(parse_xmltv_time("2024").is_none());
        assert!(parse_xmltv_time("").is_none());
    }

    #[test]
    fn test_non_xml_yields_empty_guide() {
        let guide = parse_xmltv_bytes(b"not xml at all").unwrap();
        assert!(guide.is_empty());
    }
}
