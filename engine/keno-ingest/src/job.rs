//! One feed's fetch → parse → write cycle

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::config::FeedsConfig;
use crate::error::CycleError;
use crate::fetcher::FeedFetcher;
use crate::models::{FeedKind, ParsedFeed};
use crate::outcome::{CycleOutcome, CycleStage, OutcomeSink};
use crate::parser::FeedParser;
use crate::scheduler::ScheduledJob;
use crate::writer::UpsertWriter;

/// Orchestrates cycles for a single feed
pub struct FeedJob {
    name: String,
    kind: FeedKind,
    feeds: FeedsConfig,
    fetcher: Arc<dyn FeedFetcher>,
    parser: FeedParser,
    writer: UpsertWriter,
    sink: Arc<dyn OutcomeSink>,
    stage: Mutex<CycleStage>,
}

impl FeedJob {
    pub fn new(
        name: impl Into<String>,
        kind: FeedKind,
        feeds: FeedsConfig,
        fetcher: Arc<dyn FeedFetcher>,
        parser: FeedParser,
        writer: UpsertWriter,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            feeds,
            fetcher,
            parser,
            writer,
            sink,
            stage: Mutex::new(CycleStage::Idle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    /// Stage of the cycle currently in flight, `Idle` between cycles
    pub fn stage(&self) -> CycleStage {
        *self.stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self, stage: CycleStage) {
        let mut current = self.stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let from = *current;
        debug!(job = %self.name, from = %from, to = %stage, "Cycle stage");
        *current = stage;
    }

    /// Run one cycle against the feed for `date` and report the outcome
    ///
    /// `date` only selects the results feed's day; the other feeds ignore it.
    /// Fetch and parse failures abort before any write is attempted.
    pub async fn run_cycle(&self, date: NaiveDate) -> CycleOutcome {
        let started_at = Utc::now();
        let url = self.feeds.url_for(self.kind, date);
        info!(job = %self.name, feed = %self.kind, url = %url, "Starting cycle");

        let outcome = match self.fetch_and_parse(&url).await {
            Ok(feed) => {
                self.enter(CycleStage::Writing);
                let report = self.writer.write(&feed).await;
                self.enter(CycleStage::Done);
                CycleOutcome::written(&self.name, self.kind, url, report, started_at)
            }
            Err((stage, e)) => {
                self.enter(CycleStage::Failed);
                CycleOutcome::failed(&self.name, self.kind, stage, url, e.to_string(), started_at)
            }
        };

        self.enter(CycleStage::Idle);
        self.sink.record(&outcome);
        outcome
    }

    async fn fetch_and_parse(
        &self,
        url: &str,
    ) -> Result<ParsedFeed, (CycleStage, CycleError)> {
        self.enter(CycleStage::Fetching);
        let body = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| (CycleStage::Fetching, CycleError::from(e)))?;

        self.enter(CycleStage::Parsing);
        self.parser
            .parse(self.kind, &body)
            .map_err(|e| (CycleStage::Parsing, CycleError::from(e)))
    }
}

#[async_trait]
impl ScheduledJob for FeedJob {
    async fn run(&self, fired_at: DateTime<Tz>) {
        // "today" is the fire time's date in the scheduler's reference zone
        self.run_cycle(fired_at.date_naive()).await;
    }
}
