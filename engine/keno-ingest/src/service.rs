//! Component wiring for the ingestion service

use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::info;

use crate::config::IngestConfig;
use crate::fetcher::{FeedFetcher, HttpFeedFetcher};
use crate::job::FeedJob;
use crate::models::FeedKind;
use crate::outcome::{OutcomeSink, TracingOutcomeSink};
use crate::parser::FeedParser;
use crate::scheduler::Scheduler;
use crate::store::{FeedStore, PgFeedStore};
use crate::timestamp::TimestampCodec;
use crate::writer::UpsertWriter;

/// Build the job for one feed from shared capabilities
pub fn build_feed_job(
    config: &IngestConfig,
    kind: FeedKind,
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<dyn FeedStore>,
    sink: Arc<dyn OutcomeSink>,
) -> FeedJob {
    let codec = TimestampCodec::new(config.schedule.naive_timestamp_zone);
    FeedJob::new(
        kind.as_str(),
        kind,
        config.feeds.clone(),
        fetcher,
        FeedParser::new(codec),
        UpsertWriter::new(store),
        sink,
    )
}

/// Register one job per enabled feed on a new scheduler
pub fn build_scheduler(
    config: &IngestConfig,
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<dyn FeedStore>,
    sink: Arc<dyn OutcomeSink>,
) -> Result<Scheduler> {
    let mut scheduler = Scheduler::new(config.schedule.reference_tz()?);

    for kind in FeedKind::ALL {
        let schedule = config.schedule.job(kind);
        if !schedule.enabled {
            info!(feed = %kind, "Feed disabled, not scheduling");
            continue;
        }

        let job = build_feed_job(config, kind, fetcher.clone(), store.clone(), sink.clone());
        scheduler
            .register(kind.as_str(), schedule.cron.as_str(), Arc::new(job))
            .with_context(|| format!("Failed to register {} job", kind))?;
    }

    Ok(scheduler)
}

/// Running service: the store handle and the armed scheduler
pub struct IngestService {
    store: Arc<PgFeedStore>,
    scheduler: Scheduler,
}

impl IngestService {
    /// Connect, health-check and prepare the store, then build the scheduler
    ///
    /// Every error here is a startup error.
    pub async fn new(config: &IngestConfig) -> Result<Self> {
        let store = Arc::new(PgFeedStore::connect(&config.database).await?);
        store.ping().await.context("Database health check failed")?;
        store.ensure_schema().await?;
        info!("Database connection verified");

        let fetcher = Arc::new(HttpFeedFetcher::new(config.feeds.http_timeout())?);
        let scheduler = build_scheduler(config, fetcher, store.clone(), Arc::new(TracingOutcomeSink))?;

        Ok(Self { store, scheduler })
    }

    pub fn timezone(&self) -> Tz {
        self.scheduler.timezone()
    }

    /// Arm every trigger
    pub async fn start(&mut self) -> Result<()> {
        self.scheduler.start().await.context("Failed to start scheduler")?;
        Ok(())
    }

    /// Stop triggers and release the connection pool
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Starting graceful shutdown...");
        self.scheduler.shutdown().await.context("Failed to stop scheduler")?;
        self.store.close().await;
        info!("Graceful shutdown complete");
        Ok(())
    }
}
