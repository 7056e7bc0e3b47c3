//! TCX (Training Center XML) reader.
//!
//! Reads the sport of the first `<Activity>` and every `<Trackpoint>` with a
//! `<Time>` and a `<Position>`. A trackpoint missing either one, or with an
//! unparseable timestamp or out-of-range coordinates, is skipped and
//! counted. Malformed XML fails the whole file.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{CoverageError, Result};
use crate::ingest::{ActivityKind, ParsedActivity, TrackReader};
use crate::{GpsPoint, TrackPoint};

/// [`TrackReader`] for `.tcx` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcxReader;

impl TrackReader for TcxReader {
    fn extension(&self) -> &str {
        "tcx"
    }

    fn read_activity(&self, path: &Path) -> Result<ParsedActivity> {
        let text = fs::read_to_string(path).map_err(|e| CoverageError::TrackRead {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        parse_tcx(&text).map_err(|e| match e {
            CoverageError::TrackRead { message, .. } => CoverageError::TrackRead {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }
}

/// Text fields of one trackpoint, as found in the document.
#[derive(Debug, Default)]
struct RawTrackpoint {
    time: Option<String>,
    latitude: Option<String>,
    longitude: Option<String>,
    has_position: bool,
}

impl RawTrackpoint {
    fn into_point(self) -> Option<TrackPoint> {
        if !self.has_position {
            return None;
        }
        let timestamp = self
            .time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t.trim()).ok())
            .map(|t| t.with_timezone(&Utc))?;
        let latitude: f64 = self.latitude.as_deref()?.trim().parse().ok()?;
        let longitude: f64 = self.longitude.as_deref()?.trim().parse().ok()?;
        let position = GpsPoint::new(latitude, longitude);
        position.is_valid().then_some(TrackPoint::new(timestamp, position))
    }
}

/// Which text field the reader is inside.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Time,
    Latitude,
    Longitude,
}

fn sport_attr(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"Sport")
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn xml_error(reader: &Reader<&[u8]>, e: impl std::fmt::Display) -> CoverageError {
    CoverageError::TrackRead {
        path: String::new(),
        message: format!("XML error at byte {}: {}", reader.buffer_position(), e),
    }
}

/// Parse a TCX document.
///
/// ```
/// use street_coverage::tcx::parse_tcx;
/// use street_coverage::ActivityKind;
///
/// let doc = r#"<TrainingCenterDatabase><Activities><Activity Sport="Walking"><Lap><Track>
///   <Trackpoint><Time>2024-01-01T10:00:00Z</Time>
///     <Position><LatitudeDegrees>40.7128</LatitudeDegrees><LongitudeDegrees>-74.0060</LongitudeDegrees></Position>
///   </Trackpoint>
/// </Track></Lap></Activity></Activities></TrainingCenterDatabase>"#;
///
/// let activity = parse_tcx(doc).unwrap();
/// assert_eq!(activity.kind, ActivityKind::Walking);
/// assert_eq!(activity.points.len(), 1);
/// ```
pub fn parse_tcx(text: &str) -> Result<ParsedActivity> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut kind: Option<ActivityKind> = None;
    let mut points = Vec::new();
    let mut skipped_samples = 0;
    let mut current: Option<RawTrackpoint> = None;
    let mut field: Option<Field> = None;

    loop {
        let event = reader.read_event().map_err(|e| xml_error(&reader, e))?;
        match event {
            Event::Eof => break,
            Event::Start(e) => match e.local_name().as_ref() {
                b"Activity" => {
                    if kind.is_none() {
                        kind = sport_attr(&e).map(|s| ActivityKind::from_label(&s));
                    }
                }
                b"Trackpoint" => current = Some(RawTrackpoint::default()),
                b"Position" => {
                    if let Some(tp) = current.as_mut() {
                        tp.has_position = true;
                    }
                }
                b"Time" if current.is_some() => field = Some(Field::Time),
                b"LatitudeDegrees" if current.is_some() => field = Some(Field::Latitude),
                b"LongitudeDegrees" if current.is_some() => field = Some(Field::Longitude),
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"Activity" && kind.is_none() {
                    kind = sport_attr(&e).map(|s| ActivityKind::from_label(&s));
                }
            }
            Event::Text(t) => {
                if let (Some(tp), Some(f)) = (current.as_mut(), field) {
                    let value = t.unescape().map_err(|e| xml_error(&reader, e))?.into_owned();
                    match f {
                        Field::Time => tp.time = Some(value),
                        Field::Latitude => tp.latitude = Some(value),
                        Field::Longitude => tp.longitude = Some(value),
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"Time" | b"LatitudeDegrees" | b"LongitudeDegrees" => field = None,
                b"Trackpoint" => {
                    if let Some(tp) = current.take() {
                        match tp.into_point() {
                            Some(point) => points.push(point),
                            None => skipped_samples += 1,
                        }
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    if skipped_samples > 0 {
        debug!("[Ingest] Skipped {} invalid trackpoints", skipped_samples);
    }

    Ok(ParsedActivity {
        kind: kind.unwrap_or_else(|| ActivityKind::Other(String::new())),
        points,
        skipped_samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn document(sport: &str, trackpoints: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2">
  <Activities>
    <Activity Sport="{}">
      <Id>2024-01-01T10:00:00Z</Id>
      <Lap StartTime="2024-01-01T10:00:00Z">
        <Track>{}</Track>
      </Lap>
    </Activity>
  </Activities>
</TrainingCenterDatabase>"#,
            sport, trackpoints
        )
    }

    fn trackpoint(time: &str, lat: &str, lon: &str) -> String {
        format!(
            "<Trackpoint><Time>{}</Time><Position><LatitudeDegrees>{}</LatitudeDegrees>\
             <LongitudeDegrees>{}</LongitudeDegrees></Position></Trackpoint>",
            time, lat, lon
        )
    }

    #[test]
    fn test_parse_walking_activity() {
        let points = [
            trackpoint("2024-01-01T10:00:00Z", "40.7128", "-74.0060"),
            trackpoint("2024-01-01T10:01:00Z", "40.7130", "-74.0062"),
        ]
        .concat();
        let activity = parse_tcx(&document("Walking", &points)).unwrap();

        assert_eq!(activity.kind, ActivityKind::Walking);
        assert_eq!(activity.skipped_samples, 0);
        assert_eq!(activity.points.len(), 2);
        assert_eq!(
            activity.points[0].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(activity.points[1].position, GpsPoint::new(40.7130, -74.0062));
    }

    #[test]
    fn test_running_activity_kind() {
        let points = trackpoint("2024-01-01T10:00:00Z", "40.7128", "-74.0060");
        let activity = parse_tcx(&document("Running", &points)).unwrap();
        assert_eq!(activity.kind, ActivityKind::Running);
    }

    #[test]
    fn test_malformed_samples_skipped_individually() {
        let points = [
            trackpoint("2024-01-01T10:00:00Z", "40.7128", "-74.0060"),
            trackpoint("not-a-time", "40.7129", "-74.0061"),
            trackpoint("2024-01-01T10:00:20Z", "north", "-74.0061"),
            trackpoint("2024-01-01T10:00:30Z", "95.0", "-74.0061"),
            "<Trackpoint><Time>2024-01-01T10:00:40Z</Time><HeartRateBpm><Value>90</Value></HeartRateBpm></Trackpoint>"
                .to_string(),
            "<Trackpoint><Position><LatitudeDegrees>40.7</LatitudeDegrees>\
             <LongitudeDegrees>-74.0</LongitudeDegrees></Position></Trackpoint>"
                .to_string(),
            trackpoint("2024-01-01T10:01:00+01:00", "40.7130", "-74.0062"),
        ]
        .concat();
        let activity = parse_tcx(&document("Walking", &points)).unwrap();
        assert_eq!(activity.points.len(), 2);
        assert_eq!(activity.skipped_samples, 5);
        assert_eq!(
            activity.points[1].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 1, 0).unwrap()
        );
    }

    #[test]
    fn test_malformed_xml_fails_file() {
        let err = parse_tcx("<TrainingCenterDatabase><Activities></Trackpoint>").unwrap_err();
        assert!(matches!(err, CoverageError::TrackRead { .. }));
    }

    #[test]
    fn test_reader_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tcx");
        std::fs::write(&path, "<Activity Sport=\"Walking\"></Lap>").unwrap();
        let err = TcxReader.read_activity(&path).unwrap_err();
        assert!(err.to_string().contains("broken.tcx"));

        let missing = TcxReader.read_activity(&dir.path().join("missing.tcx")).unwrap_err();
        assert!(matches!(missing, CoverageError::TrackRead { .. }));
    }
}
