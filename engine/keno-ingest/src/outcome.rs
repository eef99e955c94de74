//! Per-cycle outcome records and the sink they are emitted to

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

use crate::models::FeedKind;
use crate::writer::{RecordFailure, WriteReport};

/// Stages of one fetch → parse → write cycle
///
/// Any stage may move to `Failed`; both `Done` and `Failed` return to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Idle,
    Fetching,
    Parsing,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Parsing => "parsing",
            Self::Writing => "writing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Every record was written
    Succeeded,
    /// The write stage ran but some records were rejected
    PartiallyWritten,
    /// A hard failure aborted the cycle at `stage`
    Failed,
}

/// Structured result of one cycle, emitted for every firing that ran
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    pub job_name: String,
    pub feed: FeedKind,
    /// Last stage entered; for a failed cycle, the stage that failed
    pub stage: CycleStage,
    pub status: CycleStatus,
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<RecordFailure>,
    /// Hard failure text when the cycle aborted
    pub error: Option<String>,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CycleOutcome {
    pub(crate) fn failed(
        job_name: &str,
        feed: FeedKind,
        stage: CycleStage,
        url: String,
        error: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_name: job_name.to_string(),
            feed,
            stage,
            status: CycleStatus::Failed,
            attempted: 0,
            succeeded: 0,
            failures: Vec::new(),
            error: Some(error),
            url,
            started_at,
            duration_ms: elapsed_ms(started_at),
        }
    }

    pub(crate) fn written(
        job_name: &str,
        feed: FeedKind,
        url: String,
        report: WriteReport,
        started_at: DateTime<Utc>,
    ) -> Self {
        let status = if report.is_clean() {
            CycleStatus::Succeeded
        } else {
            CycleStatus::PartiallyWritten
        };
        Self {
            job_name: job_name.to_string(),
            feed,
            stage: CycleStage::Done,
            status,
            attempted: report.attempted,
            succeeded: report.succeeded,
            failures: report.failures,
            error: None,
            url,
            started_at,
            duration_ms: elapsed_ms(started_at),
        }
    }

    /// Stage at which the cycle aborted, if it did
    pub fn failed_stage(&self) -> Option<CycleStage> {
        (self.status == CycleStatus::Failed).then_some(self.stage)
    }
}

fn elapsed_ms(started_at: DateTime<Utc>) -> u64 {
    (Utc::now() - started_at).num_milliseconds().max(0) as u64
}

/// Receiver of cycle outcomes
pub trait OutcomeSink: Send + Sync {
    fn record(&self, outcome: &CycleOutcome);
}

/// Emits outcomes as structured `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOutcomeSink;

impl OutcomeSink for TracingOutcomeSink {
    fn record(&self, outcome: &CycleOutcome) {
        match outcome.status {
            CycleStatus::Succeeded => info!(
                job = %outcome.job_name,
                feed = %outcome.feed,
                stage = %outcome.stage,
                attempted = outcome.attempted,
                succeeded = outcome.succeeded,
                duration_ms = outcome.duration_ms,
                "Cycle completed"
            ),
            CycleStatus::PartiallyWritten => warn!(
                job = %outcome.job_name,
                feed = %outcome.feed,
                stage = %outcome.stage,
                attempted = outcome.attempted,
                succeeded = outcome.succeeded,
                failed_ids = ?outcome.failures.iter().map(|f| f.id).collect::<Vec<_>>(),
                duration_ms = outcome.duration_ms,
                "Cycle completed with rejected records"
            ),
            CycleStatus::Failed => error!(
                job = %outcome.job_name,
                feed = %outcome.feed,
                stage = %outcome.stage,
                url = %outcome.url,
                error = outcome.error.as_deref().unwrap_or_default(),
                duration_ms = outcome.duration_ms,
                "Cycle failed"
            ),
        }
    }
}
