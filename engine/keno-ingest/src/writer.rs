//! Batch persistence with per-record failure isolation

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::error::WriteError;
use crate::models::{FeedEnvelope, FeedKind, ParsedFeed, ScheduledEvent};
use crate::store::FeedStore;

/// A record the store refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub id: i64,
    pub cause: String,
}

/// Tally of one batch write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<RecordFailure>,
}

impl WriteReport {
    fn record(&mut self, kind: FeedKind, id: i64, outcome: Result<(), WriteError>) {
        self.attempted += 1;
        match outcome {
            Ok(()) => self.succeeded += 1,
            Err(e) => {
                warn!(feed = %kind, id, error = %e, "Upsert failed");
                self.failures.push(RecordFailure { id, cause: e.to_string() });
            }
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Writes decoded feed documents through a [`FeedStore`]
#[derive(Clone)]
pub struct UpsertWriter {
    store: Arc<dyn FeedStore>,
}

impl UpsertWriter {
    pub fn new(store: Arc<dyn FeedStore>) -> Self {
        Self { store }
    }

    /// Upsert every record of `feed`, one independent write per record
    ///
    /// A failed row is added to the report and the remaining rows are still
    /// attempted.
    pub async fn write(&self, feed: &ParsedFeed) -> WriteReport {
        let mut report = WriteReport::default();
        let kind = feed.kind();

        match feed {
            ParsedFeed::Upcoming(upcoming) => {
                self.write_events(kind, &upcoming.events, &upcoming.envelope, &mut report).await;
            }
            ParsedFeed::Results(results) => {
                self.write_events(kind, &results.events, &results.envelope, &mut report).await;
            }
            ParsedFeed::BallStats(stats) => {
                for game in &stats.last_games {
                    let outcome = self.store.upsert_game(game, &stats.envelope).await;
                    report.record(kind, game.id, outcome);
                }
            }
        }

        report
    }

    async fn write_events(
        &self,
        kind: FeedKind,
        events: &[ScheduledEvent],
        envelope: &FeedEnvelope,
        report: &mut WriteReport,
    ) {
        for event in events {
            let outcome = match kind {
                FeedKind::Results => self.store.upsert_result(event, envelope).await,
                _ => self.store.upsert_scheduled_event(event, envelope).await,
            };
            report.record(kind, event.id, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{fixtures, FeedParser};
    use crate::store::MemoryFeedStore;

    fn parse(kind: FeedKind, xml: &str) -> ParsedFeed {
        FeedParser::default().parse(kind, xml.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn test_write_routes_to_feed_table() {
        let store = Arc::new(MemoryFeedStore::new());
        let writer = UpsertWriter::new(store.clone());

        let report = writer.write(&parse(FeedKind::Upcoming, fixtures::UPCOMING)).await;
        assert_eq!(report, WriteReport { attempted: 2, succeeded: 2, failures: vec![] });

        let report = writer.write(&parse(FeedKind::BallStats, fixtures::BALL_STATS)).await;
        assert_eq!(report.succeeded, 2);

        let report = writer.write(&parse(FeedKind::Results, fixtures::RESULTS)).await;
        assert_eq!(report.succeeded, 2);

        assert_eq!(store.row_counts(), (2, 2, 2));
        assert!(store.scheduled_event(1001).is_some());
        assert!(store.game(900).is_some());
        assert!(store.result(2001).is_some());
        assert!(store.result(1001).is_none());
    }

    #[tokio::test]
    async fn test_failed_row_does_not_abort_batch() {
        let store = Arc::new(MemoryFeedStore::new());
        let writer = UpsertWriter::new(store.clone());

        let mut feed = parse(FeedKind::Results, fixtures::RESULTS);
        if let ParsedFeed::Results(results) = &mut feed {
            let template = results.events[0].clone();
            results.events = (1..=5)
                .map(|i| ScheduledEvent {
                    id: 5000 + i,
                    event_number: if i == 2 { String::new() } else { i.to_string() },
                    ..template.clone()
                })
                .collect();
        }

        let report = writer.write(&feed).await;
        assert_eq!(report.attempted, 5);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, 5002);
        assert!(!report.is_clean());
        assert!(store.result(5002).is_none());
        assert!(store.result(5005).is_some());
    }
}
