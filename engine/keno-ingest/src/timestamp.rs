//! Tolerant timestamp decoding for feed attributes
//!
//! The upstream service is inconsistent about how it writes timestamps, even
//! between attributes of the same element. [`TimestampCodec`] tries an ordered
//! list of [`TimestampLayout`]s and returns the first one that matches.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MalformedTimestamp;

/// A point in time resolved to UTC
///
/// Only [`TimestampCodec`] produces these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Instant(DateTime<Utc>);

impl Instant {
    pub(crate) fn from_utc(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// The instant as a chrono UTC timestamp
    pub fn as_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// Zone used to resolve timestamps written without any zone designator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NaiveZone {
    /// Treat zone-less timestamps as UTC
    #[default]
    Utc,
    /// Treat zone-less timestamps as wall-clock time in the given zone
    Reference(Tz),
}

impl FromStr for NaiveZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("utc") {
            return Ok(Self::Utc);
        }
        s.parse::<Tz>()
            .map(Self::Reference)
            .map_err(|e| format!("unknown timezone {s:?}: {e}"))
    }
}

impl fmt::Display for NaiveZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utc => f.write_str("UTC"),
            Self::Reference(tz) => write!(f, "{}", tz.name()),
        }
    }
}

impl Serialize for NaiveZone {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NaiveZone {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One accepted timestamp encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampLayout {
    /// `2025-06-27T13:03:00`, optionally with fractional seconds
    LocalNoZone,
    /// `2025-06-27 13:02:47Z`, optionally with fractional seconds
    UtcSpaceZ,
    /// `2025-06-27T13:03:00+01:00` or `2025-06-27T13:03:00Z`
    Offset,
    /// `2025-06-27T13:03:00.1234567Z`
    FractionalUtc,
    /// `2025-06-27T13:03:00.1234567+01:00`
    FractionalOffset,
}

impl TimestampLayout {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LocalNoZone => "local-no-zone",
            Self::UtcSpaceZ => "utc-space-z",
            Self::Offset => "offset",
            Self::FractionalUtc => "fractional-utc",
            Self::FractionalOffset => "fractional-offset",
        }
    }

    /// Parse `input` with this layout only
    pub fn parse(&self, input: &str, naive_zone: NaiveZone) -> Result<DateTime<Utc>, String> {
        match self {
            Self::LocalNoZone => {
                let naive = naive(input, "%Y-%m-%dT%H:%M:%S%.f")?;
                resolve_naive(naive, naive_zone)
            }
            Self::UtcSpaceZ => naive(input, "%Y-%m-%d %H:%M:%S%.fZ").map(|n| n.and_utc()),
            Self::Offset => {
                if input.ends_with('Z') {
                    naive(input, "%Y-%m-%dT%H:%M:%SZ").map(|n| n.and_utc())
                } else {
                    offset(input, "%Y-%m-%dT%H:%M:%S%:z")
                }
            }
            Self::FractionalUtc => naive(input, "%Y-%m-%dT%H:%M:%S%.fZ").map(|n| n.and_utc()),
            Self::FractionalOffset => offset(input, "%Y-%m-%dT%H:%M:%S%.f%:z"),
        }
    }
}

impl fmt::Display for TimestampLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn naive(input: &str, format: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(input, format).map_err(|e| e.to_string())
}

fn offset(input: &str, format: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_str(input, format)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}

fn resolve_naive(naive: NaiveDateTime, zone: NaiveZone) -> Result<DateTime<Utc>, String> {
    let tz = match zone {
        NaiveZone::Utc => return Ok(naive.and_utc()),
        NaiveZone::Reference(tz) => tz,
    };

    // DST fold resolves to the earlier instant; a DST gap has no instant at all
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            // later layouts overwrite this reason, so surface it here
            debug!(local_time = %naive, zone = tz.name(), "Zone-less timestamp falls in a DST gap");
            Err(format!("local time {naive} does not exist in {}", tz.name()))
        }
    }
}

/// Ordered, configurable multi-layout timestamp parser
#[derive(Debug, Clone)]
pub struct TimestampCodec {
    layouts: Vec<TimestampLayout>,
    naive_zone: NaiveZone,
}

impl TimestampCodec {
    /// Layouts in the order they are attempted by default
    pub const DEFAULT_LAYOUTS: [TimestampLayout; 5] = [
        TimestampLayout::LocalNoZone,
        TimestampLayout::UtcSpaceZ,
        TimestampLayout::Offset,
        TimestampLayout::FractionalUtc,
        TimestampLayout::FractionalOffset,
    ];

    /// Create a codec with the default layout order
    pub fn new(naive_zone: NaiveZone) -> Self {
        Self::with_layouts(Self::DEFAULT_LAYOUTS.to_vec(), naive_zone)
    }

    /// Create a codec with an explicit layout order
    pub fn with_layouts(layouts: Vec<TimestampLayout>, naive_zone: NaiveZone) -> Self {
        Self { layouts, naive_zone }
    }

    pub fn layouts(&self) -> &[TimestampLayout] {
        &self.layouts
    }

    pub fn naive_zone(&self) -> NaiveZone {
        self.naive_zone
    }

    /// Parse a timestamp, returning the instant
    pub fn parse(&self, input: &str) -> Result<Instant, MalformedTimestamp> {
        self.parse_detailed(input).map(|(instant, _)| instant)
    }

    /// Parse a timestamp, also reporting which layout matched
    ///
    /// On failure the error carries the diagnostic of the last layout tried.
    pub fn parse_detailed(
        &self,
        input: &str,
    ) -> Result<(Instant, TimestampLayout), MalformedTimestamp> {
        let mut last_error = MalformedTimestamp {
            input: input.to_string(),
            layout: "none",
            reason: "no layouts configured".to_string(),
        };

        for layout in &self.layouts {
            match layout.parse(input, self.naive_zone) {
                Ok(at) => return Ok((Instant::from_utc(at), *layout)),
                Err(reason) => {
                    last_error.layout = layout.name();
                    last_error.reason = reason;
                }
            }
        }

        Err(last_error)
    }
}

impl Default for TimestampCodec {
    fn default() -> Self {
        Self::new(NaiveZone::default())
    }
}
