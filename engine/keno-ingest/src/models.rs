use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::timestamp::Instant;

/// The three upstream feed shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedKind {
    Upcoming,
    BallStats,
    Results,
}

impl FeedKind {
    pub const ALL: [FeedKind; 3] = [FeedKind::Upcoming, FeedKind::BallStats, FeedKind::Results];

    /// Root element name of the XML document for this feed
    pub fn root_element(&self) -> &'static str {
        match self {
            Self::Upcoming => "UpcomingEvents",
            Self::BallStats => "KenoBallStats",
            Self::Results => "Results",
        }
    }

    /// Store table the feed's records are written to
    pub fn table(&self) -> &'static str {
        match self {
            Self::Upcoming => "scheduled_events",
            Self::BallStats => "ball_statistics_games",
            Self::Results => "results",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::BallStats => "ball-stats",
            Self::Results => "results",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" | "upcoming-events" => Ok(Self::Upcoming),
            "ball-stats" | "ball-statistics" => Ok(Self::BallStats),
            "results" => Ok(Self::Results),
            other => Err(format!(
                "unknown feed {other:?} (expected upcoming, ball-stats or results)"
            )),
        }
    }
}

/// Response-level timestamps present on every feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedEnvelope {
    pub local_time: Instant,
    pub utc_time: Instant,
    pub round_trip_time: Instant,
}

/// One upcoming or settled Keno event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledEvent {
    /// Feed-assigned natural key
    pub id: i64,
    pub event_type: String,
    pub event_number: String,
    pub event_time: Instant,
    pub finish_time: Instant,
    pub status: String,
    /// Empty until the event settles
    pub draw_mode: String,
    /// Empty until the event settles
    pub result: String,
}

/// A recently drawn game from the ball statistics feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Game {
    pub id: i64,
    pub event_number: String,
    pub event_time: Instant,
    pub draw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BallFrequency {
    pub number: i32,
    pub hit_count: i32,
}

/// `UpcomingEvents` feed document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcomingEvents {
    pub envelope: FeedEnvelope,
    pub events: Vec<ScheduledEvent>,
}

/// `KenoBallStats` feed document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BallStatisticsSnapshot {
    pub envelope: FeedEnvelope,
    pub last_games: Vec<Game>,
    pub hot_balls: Vec<BallFrequency>,
    pub cold_balls: Vec<BallFrequency>,
    pub hits: Vec<BallFrequency>,
}

/// `Results` feed document for one calendar date
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultSet {
    pub envelope: FeedEnvelope,
    pub events: Vec<ScheduledEvent>,
}

/// A fully decoded feed document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "feed", rename_all = "kebab-case")]
pub enum ParsedFeed {
    Upcoming(UpcomingEvents),
    BallStats(BallStatisticsSnapshot),
    Results(ResultSet),
}

impl ParsedFeed {
    pub fn kind(&self) -> FeedKind {
        match self {
            Self::Upcoming(_) => FeedKind::Upcoming,
            Self::BallStats(_) => FeedKind::BallStats,
            Self::Results(_) => FeedKind::Results,
        }
    }

    pub fn envelope(&self) -> &FeedEnvelope {
        match self {
            Self::Upcoming(feed) => &feed.envelope,
            Self::BallStats(feed) => &feed.envelope,
            Self::Results(feed) => &feed.envelope,
        }
    }

    /// Number of records the writer will attempt for this document
    pub fn record_count(&self) -> usize {
        match self {
            Self::Upcoming(feed) => feed.events.len(),
            Self::BallStats(feed) => feed.last_games.len(),
            Self::Results(feed) => feed.events.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_kind_round_trips_through_str() {
        for kind in FeedKind::ALL {
            assert_eq!(kind.as_str().parse::<FeedKind>().unwrap(), kind);
        }
        assert!("odds".parse::<FeedKind>().is_err());
    }

    #[test]
    fn test_feed_kind_tables_are_disjoint() {
        assert_eq!(FeedKind::Upcoming.table(), "scheduled_events");
        assert_eq!(FeedKind::BallStats.table(), "ball_statistics_games");
        assert_eq!(FeedKind::Results.table(), "results");
    }
}
