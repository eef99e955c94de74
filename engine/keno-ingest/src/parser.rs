//! Feed document decoding
//!
//! Decoding runs in two steps. `quick-xml` first maps the document onto the
//! wire structs below, where every timestamp is still the raw attribute
//! text. The wire structs are then converted into the domain models through
//! the [`TimestampCodec`]. Either step failing rejects the whole document.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use tracing::debug;

use crate::error::ParseError;
use crate::models::*;
use crate::timestamp::{Instant, TimestampCodec};

#[derive(Debug, Deserialize)]
struct RawEventFeed {
    #[serde(rename = "@LocalTime")]
    local_time: String,
    #[serde(rename = "@UtcTime")]
    utc_time: String,
    #[serde(rename = "@RoundTripTime")]
    round_trip_time: String,
    #[serde(rename = "KenoEvent", default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "@ID")]
    id: i64,
    #[serde(rename = "@EventType")]
    event_type: String,
    #[serde(rename = "@EventNumber")]
    event_number: String,
    #[serde(rename = "@EventTime")]
    event_time: String,
    #[serde(rename = "@FinishTime")]
    finish_time: String,
    #[serde(rename = "@EventStatus")]
    status: String,
    #[serde(rename = "@DrawMode", default)]
    draw_mode: String,
    #[serde(rename = "@Result", default)]
    result: String,
}

#[derive(Debug, Deserialize)]
struct RawBallStats {
    #[serde(rename = "@LocalTime")]
    local_time: String,
    #[serde(rename = "@UtcTime")]
    utc_time: String,
    #[serde(rename = "@RoundTripTime")]
    round_trip_time: String,
    #[serde(rename = "LastGames", default)]
    last_games: RawGameList,
    #[serde(rename = "Hot", default)]
    hot: RawBallList,
    #[serde(rename = "Cold", default)]
    cold: RawBallList,
    #[serde(rename = "Hits", default)]
    hits: RawBallList,
}

#[derive(Debug, Default, Deserialize)]
struct RawGameList {
    #[serde(rename = "Game", default)]
    games: Vec<RawGame>,
}

#[derive(Debug, Deserialize)]
struct RawGame {
    #[serde(rename = "@ID")]
    id: i64,
    #[serde(rename = "@EventNumber")]
    event_number: String,
    #[serde(rename = "@EventTime")]
    event_time: String,
    #[serde(rename = "@Draw")]
    draw: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawBallList {
    #[serde(rename = "Ball", default)]
    balls: Vec<RawBall>,
}

#[derive(Debug, Deserialize)]
struct RawBall {
    #[serde(rename = "@Number")]
    number: i32,
    #[serde(rename = "@Hits")]
    hits: i32,
}

/// Decodes raw feed bodies into typed documents
#[derive(Debug, Clone, Default)]
pub struct FeedParser {
    codec: TimestampCodec,
}

impl FeedParser {
    pub fn new(codec: TimestampCodec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &TimestampCodec {
        &self.codec
    }

    /// Decode `bytes` as a document of the given feed shape
    pub fn parse(&self, kind: FeedKind, bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ParseError::decode(kind, format!("body is not valid UTF-8: {e}")))?;

        let root = root_element(kind, text)?;
        if root != kind.root_element() {
            return Err(ParseError::UnexpectedRoot { expected: kind.root_element(), found: root });
        }

        let feed = match kind {
            FeedKind::Upcoming => {
                let raw: RawEventFeed = decode(kind, text)?;
                let (envelope, events) = self.convert_event_feed(raw)?;
                ParsedFeed::Upcoming(UpcomingEvents { envelope, events })
            }
            FeedKind::Results => {
                let raw: RawEventFeed = decode(kind, text)?;
                let (envelope, events) = self.convert_event_feed(raw)?;
                ParsedFeed::Results(ResultSet { envelope, events })
            }
            FeedKind::BallStats => {
                let raw: RawBallStats = decode(kind, text)?;
                ParsedFeed::BallStats(self.convert_ball_stats(raw)?)
            }
        };

        debug!(feed = %kind, records = feed.record_count(), "decoded feed document");
        Ok(feed)
    }

    fn envelope(
        &self,
        local_time: &str,
        utc_time: &str,
        round_trip_time: &str,
    ) -> Result<FeedEnvelope, ParseError> {
        Ok(FeedEnvelope {
            local_time: self.instant("LocalTime", local_time)?,
            utc_time: self.instant("UtcTime", utc_time)?,
            round_trip_time: self.instant("RoundTripTime", round_trip_time)?,
        })
    }

    fn instant(&self, attribute: &'static str, raw: &str) -> Result<Instant, ParseError> {
        self.codec
            .parse(raw)
            .map_err(|source| ParseError::MalformedTimestamp { attribute, source })
    }

    fn convert_event_feed(
        &self,
        raw: RawEventFeed,
    ) -> Result<(FeedEnvelope, Vec<ScheduledEvent>), ParseError> {
        let envelope = self.envelope(&raw.local_time, &raw.utc_time, &raw.round_trip_time)?;

        let events = raw
            .events
            .into_iter()
            .map(|e| {
                Ok(ScheduledEvent {
                    id: e.id,
                    event_time: self.instant("EventTime", &e.event_time)?,
                    finish_time: self.instant("FinishTime", &e.finish_time)?,
                    event_type: e.event_type,
                    event_number: e.event_number,
                    status: e.status,
                    draw_mode: e.draw_mode,
                    result: e.result,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        for e in &events {
            debug!(
                id = e.id,
                event_type = %e.event_type,
                number = %e.event_number,
                event_time = %e.event_time,
                finish_time = %e.finish_time,
                status = %e.status,
                draw_mode = %e.draw_mode,
                result = %e.result,
                "event"
            );
        }

        Ok((envelope, events))
    }

    fn convert_ball_stats(&self, raw: RawBallStats) -> Result<BallStatisticsSnapshot, ParseError> {
        let envelope = self.envelope(&raw.local_time, &raw.utc_time, &raw.round_trip_time)?;

        let last_games = raw
            .last_games
            .games
            .into_iter()
            .map(|g| {
                Ok(Game {
                    id: g.id,
                    event_time: self.instant("EventTime", &g.event_time)?,
                    event_number: g.event_number,
                    draw: g.draw,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        let snapshot = BallStatisticsSnapshot {
            envelope,
            last_games,
            hot_balls: frequencies(raw.hot),
            cold_balls: frequencies(raw.cold),
            hits: frequencies(raw.hits),
        };

        for g in &snapshot.last_games {
            debug!(id = g.id, number = %g.event_number, event_time = %g.event_time, draw = %g.draw, "game");
        }
        debug!(
            hot = ?snapshot.hot_balls.iter().map(|b| b.number).collect::<Vec<_>>(),
            cold = ?snapshot.cold_balls.iter().map(|b| b.number).collect::<Vec<_>>(),
            tracked = snapshot.hits.len(),
            "ball frequencies"
        );

        Ok(snapshot)
    }
}

fn frequencies(list: RawBallList) -> Vec<BallFrequency> {
    list.balls.into_iter().map(|b| BallFrequency { number: b.number, hit_count: b.hits }).collect()
}

fn decode<T: serde::de::DeserializeOwned>(kind: FeedKind, text: &str) -> Result<T, ParseError> {
    quick_xml::de::from_str(text).map_err(|e| ParseError::decode(kind, e.to_string()))
}

/// Local name of the first element in the document
fn root_element(kind: FeedKind, text: &str) -> Result<String, ParseError> {
    let mut reader = Reader::from_str(text);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Ok(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) => return Err(ParseError::decode(kind, "document has no root element")),
            Ok(_) => continue,
            Err(e) => {
                return Err(ParseError::decode(
                    kind,
                    format!("malformed XML at byte {}: {e}", reader.buffer_position()),
                ))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const UPCOMING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<UpcomingEvents LocalTime="2025-06-27T16:02:47" UtcTime="2025-06-27 13:02:47Z" RoundTripTime="2025-06-27T13:02:47.1234567Z">
  <KenoEvent ID="1001" EventType="Keno" EventNumber="515" EventTime="2025-06-27T13:03:00+01:00" FinishTime="2025-06-27T13:04:00+01:00" EventStatus="Scheduled" />
  <KenoEvent ID="1002" EventType="Keno" EventNumber="516" EventTime="2025-06-27T13:08:00" FinishTime="2025-06-27T13:09:00" EventStatus="Scheduled" Channel="7" />
</UpcomingEvents>"#;

    pub const BALL_STATS: &str = r#"<KenoBallStats LocalTime="2025-06-27T16:02:47" UtcTime="2025-06-27 13:02:47Z" RoundTripTime="2025-06-27T13:02:47Z">
  <LastGames>
    <Game ID="900" EventNumber="510" EventTime="2025-06-27T12:38:00+01:00" Draw="1,5,9,17,22,31,40,44,52,60,61,63,66,70,71,72,75,77,79,80" />
    <Game ID="901" EventNumber="511" EventTime="2025-06-27T12:43:00+01:00" Draw="2,4,8,12,21,30,33,41,49,50,54,58,62,64,67,69,73,74,76,78" />
  </LastGames>
  <Hot><Ball Number="17" Hits="9" /><Ball Number="42" Hits="8" /></Hot>
  <Cold><Ball Number="3" Hits="0" /></Cold>
  <Hits><Ball Number="1" Hits="4" /><Ball Number="2" Hits="5" /><Ball Number="3" Hits="0" /></Hits>
</KenoBallStats>"#;

    pub const RESULTS: &str = r#"<Results LocalTime="2025-06-26T23:59:00" UtcTime="2025-06-26 20:59:00Z" RoundTripTime="2025-06-26T20:59:00.5Z">
  <KenoEvent ID="2001" EventType="Keno" EventNumber="300" EventTime="2025-06-26T10:00:00+03:00" FinishTime="2025-06-26T10:01:00+03:00" EventStatus="Finished" DrawMode="Auto" Result="3,7,11,19,23,29,35,38,41,45,47,53,56,59,65,68,70,74,77,80" />
  <KenoEvent ID="2002" EventType="Keno" EventNumber="301" EventTime="2025-06-26T10:05:00+03:00" FinishTime="2025-06-26T10:06:00+03:00" EventStatus="Cancelled" />
</Results>"#;
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::{TimeZone, Utc};

    fn parser() -> FeedParser {
        FeedParser::default()
    }

    #[test]
    fn test_parse_upcoming_events() {
        let feed = parser().parse(FeedKind::Upcoming, UPCOMING.as_bytes()).unwrap();
        let ParsedFeed::Upcoming(upcoming) = feed else { panic!("wrong feed shape") };

        assert_eq!(upcoming.events.len(), 2);
        assert_eq!(
            upcoming.envelope.utc_time.as_utc(),
            Utc.with_ymd_and_hms(2025, 6, 27, 13, 2, 47).unwrap()
        );

        let first = &upcoming.events[0];
        assert_eq!(first.id, 1001);
        assert_eq!(first.event_number, "515");
        assert_eq!(first.status, "Scheduled");
        assert_eq!(first.event_time.as_utc(), Utc.with_ymd_and_hms(2025, 6, 27, 12, 3, 0).unwrap());

        // mixed encodings on sibling elements
        let second = &upcoming.events[1];
        assert_eq!(second.event_time.as_utc(), Utc.with_ymd_and_hms(2025, 6, 27, 13, 8, 0).unwrap());
    }

    #[test]
    fn test_optional_attributes_default_to_empty() {
        let feed = parser().parse(FeedKind::Upcoming, UPCOMING.as_bytes()).unwrap();
        let ParsedFeed::Upcoming(upcoming) = feed else { panic!("wrong feed shape") };
        assert!(upcoming.events.iter().all(|e| e.draw_mode.is_empty() && e.result.is_empty()));

        let feed = parser().parse(FeedKind::Results, RESULTS.as_bytes()).unwrap();
        let ParsedFeed::Results(results) = feed else { panic!("wrong feed shape") };
        assert_eq!(results.events[0].draw_mode, "Auto");
        assert!(results.events[0].result.starts_with("3,7,11"));
        assert_eq!(results.events[1].draw_mode, "");
        assert_eq!(results.events[1].result, "");
    }

    #[test]
    fn test_parse_ball_stats() {
        let feed = parser().parse(FeedKind::BallStats, BALL_STATS.as_bytes()).unwrap();
        let ParsedFeed::BallStats(stats) = feed else { panic!("wrong feed shape") };

        assert_eq!(stats.last_games.len(), 2);
        assert_eq!(stats.last_games[0].id, 900);
        assert_eq!(stats.last_games[1].event_number, "511");
        assert_eq!(stats.hot_balls, vec![
            BallFrequency { number: 17, hit_count: 9 },
            BallFrequency { number: 42, hit_count: 8 },
        ]);
        assert_eq!(stats.cold_balls.len(), 1);
        assert_eq!(stats.hits.len(), 3);
    }

    #[test]
    fn test_ball_stats_without_sections() {
        let xml = r#"<KenoBallStats LocalTime="2025-06-27T16:02:47" UtcTime="2025-06-27 13:02:47Z" RoundTripTime="2025-06-27T13:02:47Z" />"#;
        let feed = parser().parse(FeedKind::BallStats, xml.as_bytes()).unwrap();
        assert_eq!(feed.record_count(), 0);
    }

    #[test]
    fn test_unknown_elements_between_events_are_ignored() {
        let events = r#"
            <KenoEvent ID="1" EventType="Keno" EventNumber="1" EventTime="2025-06-27T13:03:00" FinishTime="2025-06-27T13:04:00" EventStatus="Finished" />
            <Comment>maintenance window</Comment>
            <KenoEvent ID="2" EventType="Keno" EventNumber="2" EventTime="2025-06-27T13:08:00" FinishTime="2025-06-27T13:09:00" EventStatus="Finished" />
            <Banner Text="x" />
        "#;
        let envelope = r#"LocalTime="2025-06-27T16:02:47" UtcTime="2025-06-27 13:02:47Z" RoundTripTime="2025-06-27T13:02:47Z""#;

        let xml = format!("<Results {envelope}>{events}</Results>");
        let feed = parser().parse(FeedKind::Results, xml.as_bytes()).unwrap();
        let ParsedFeed::Results(results) = feed else { panic!("wrong feed shape") };
        assert_eq!(results.events.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);

        let xml = format!("<UpcomingEvents {envelope}>{events}</UpcomingEvents>");
        let feed = parser().parse(FeedKind::Upcoming, xml.as_bytes()).unwrap();
        assert_eq!(feed.record_count(), 2);
    }

    #[test]
    fn test_unknown_elements_between_games_and_balls_are_ignored() {
        let xml = r#"<KenoBallStats LocalTime="2025-06-27T16:02:47" UtcTime="2025-06-27 13:02:47Z" RoundTripTime="2025-06-27T13:02:47Z">
  <LastGames>
    <Game ID="900" EventNumber="510" EventTime="2025-06-27T12:38:00+01:00" Draw="1,5,9" />
    <Note>delayed</Note>
    <Game ID="901" EventNumber="511" EventTime="2025-06-27T12:43:00+01:00" Draw="2,4,8" />
  </LastGames>
  <Hot><Ball Number="17" Hits="9" /><Separator /><Ball Number="42" Hits="8" /></Hot>
</KenoBallStats>"#;
        let feed = parser().parse(FeedKind::BallStats, xml.as_bytes()).unwrap();
        let ParsedFeed::BallStats(stats) = feed else { panic!("wrong feed shape") };

        assert_eq!(stats.last_games.iter().map(|g| g.id).collect::<Vec<_>>(), vec![900, 901]);
        assert_eq!(stats.hot_balls.iter().map(|b| b.number).collect::<Vec<_>>(), vec![17, 42]);
    }

    #[test]
    fn test_missing_envelope_attribute_is_decode_error() {
        let xml = r#"<UpcomingEvents LocalTime="2025-06-27T16:02:47" UtcTime="2025-06-27 13:02:47Z"></UpcomingEvents>"#;
        let err = parser().parse(FeedKind::Upcoming, xml.as_bytes()).unwrap_err();
        assert!(matches!(err, ParseError::Decode { .. }), "got {err:?}");
    }

    #[test]
    fn test_missing_required_event_attribute_is_decode_error() {
        let xml = r#"<Results LocalTime="2025-06-27T16:02:47" UtcTime="2025-06-27 13:02:47Z" RoundTripTime="2025-06-27T13:02:47Z">
            <KenoEvent ID="1" EventType="Keno" EventTime="2025-06-27T13:03:00" FinishTime="2025-06-27T13:04:00" EventStatus="Finished" />
        </Results>"#;
        let err = parser().parse(FeedKind::Results, xml.as_bytes()).unwrap_err();
        assert!(matches!(err, ParseError::Decode { .. }), "got {err:?}");
    }

    #[test]
    fn test_bad_timestamp_rejects_whole_document() {
        let xml = r#"<UpcomingEvents LocalTime="2025-06-27T16:02:47" UtcTime="2025-06-27 13:02:47Z" RoundTripTime="2025-06-27T13:02:47Z">
            <KenoEvent ID="1" EventType="Keno" EventNumber="1" EventTime="2025-06-27T13:03:00" FinishTime="2025-06-27T13:04:00" EventStatus="Scheduled" />
            <KenoEvent ID="2" EventType="Keno" EventNumber="2" EventTime="not-a-time" FinishTime="2025-06-27T13:04:00" EventStatus="Scheduled" />
        </UpcomingEvents>"#;
        let err = parser().parse(FeedKind::Upcoming, xml.as_bytes()).unwrap_err();
        assert!(err.is_timestamp());
        match err {
            ParseError::MalformedTimestamp { attribute, source } => {
                assert_eq!(attribute, "EventTime");
                assert_eq!(source.input, "not-a-time");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_non_numeric_id_is_decode_error() {
        let xml = r#"<UpcomingEvents LocalTime="2025-06-27T16:02:47" UtcTime="2025-06-27 13:02:47Z" RoundTripTime="2025-06-27T13:02:47Z">
            <KenoEvent ID="abc" EventType="Keno" EventNumber="1" EventTime="2025-06-27T13:03:00" FinishTime="2025-06-27T13:04:00" EventStatus="Scheduled" />
        </UpcomingEvents>"#;
        let err = parser().parse(FeedKind::Upcoming, xml.as_bytes()).unwrap_err();
        assert!(matches!(err, ParseError::Decode { .. }), "got {err:?}");
    }

    #[test]
    fn test_wrong_root_element() {
        let err = parser().parse(FeedKind::Results, UPCOMING.as_bytes()).unwrap_err();
        match err {
            ParseError::UnexpectedRoot { expected, found } => {
                assert_eq!(expected, "Results");
                assert_eq!(found, "UpcomingEvents");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_garbage_body() {
        let err = parser().parse(FeedKind::Upcoming, b"<html><body>502 Bad Gateway").unwrap_err();
        assert!(!err.is_timestamp());

        let err = parser().parse(FeedKind::Upcoming, b"").unwrap_err();
        assert!(matches!(err, ParseError::Decode { .. }));

        let err = parser().parse(FeedKind::Upcoming, &[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, ParseError::Decode { .. }));
    }
}
