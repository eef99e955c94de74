//! Keno Feed Ingestor
//!
//! Polls the upstream Keno XML data service for upcoming events, ball
//! statistics and settled results, and upserts each feed's records into
//! Postgres. Each feed runs on its own cron trigger.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod job;
pub mod logging;
pub mod models;
pub mod outcome;
pub mod parser;
pub mod scheduler;
pub mod service;
pub mod signals;
pub mod store;
pub mod timestamp;
pub mod writer;


pub use config::IngestConfig;
pub use error::{CycleError, FetchError, MalformedTimestamp, ParseError, SchedulerError, WriteError};
pub use fetcher::{FeedFetcher, HttpFeedFetcher};
pub use job::FeedJob;
pub use logging::initialize_logging;
pub use models::*;
pub use outcome::{CycleOutcome, CycleStage, CycleStatus, OutcomeSink, TracingOutcomeSink};
pub use parser::FeedParser;
pub use scheduler::{FireOutcome, ScheduledJob, Scheduler};
pub use service::{build_feed_job, build_scheduler, IngestService};
pub use signals::setup_signal_handlers;
pub use store::{FeedStore, MemoryFeedStore, PgFeedStore};
pub use timestamp::{Instant, NaiveZone, TimestampCodec, TimestampLayout};
pub use writer::{RecordFailure, UpsertWriter, WriteReport};
