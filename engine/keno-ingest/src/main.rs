use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use keno_ingest::{
    build_feed_job, initialize_logging, setup_signal_handlers, FeedKind, FeedStore,
    HttpFeedFetcher, IngestConfig, IngestService, MemoryFeedStore, PgFeedStore,
    TracingOutcomeSink,
};

#[derive(Parser)]
#[command(name = "keno-ingest", version, about = "Keno XML feed ingestor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run every enabled feed on its trigger until interrupted
    Run,

    /// Run a single cycle of one feed now and print the outcome as JSON
    Once {
        /// Feed to ingest: upcoming, ball-stats or results
        #[arg(long)]
        feed: FeedKind,

        /// Results date (YYYY-MM-DD); defaults to today in the reference timezone
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Write into an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    initialize_logging(&config.logging)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Once { feed, date, dry_run } => once(config, feed, date, dry_run).await,
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(config: IngestConfig) -> Result<()> {
    info!("Starting Keno Ingest v{}", env!("CARGO_PKG_VERSION"));

    let mut service = IngestService::new(&config).await?;
    let shutdown_signal = setup_signal_handlers()?;

    service.start().await?;
    info!(timezone = %service.timezone().name(), "Keno Ingest is running. Press Ctrl+C to shutdown gracefully.");

    let _ = shutdown_signal.await;
    info!("Shutdown signal received");

    service.shutdown().await
}

async fn once(config: IngestConfig, feed: FeedKind, date: Option<NaiveDate>, dry_run: bool) -> Result<()> {
    let tz = config.schedule.reference_tz()?;
    let date = date.unwrap_or_else(|| Utc::now().with_timezone(&tz).date_naive());

    let fetcher = Arc::new(HttpFeedFetcher::new(config.feeds.http_timeout())?);
    let pg = if dry_run {
        None
    } else {
        let store = PgFeedStore::connect(&config.database).await?;
        store.ping().await.context("Database health check failed")?;
        store.ensure_schema().await?;
        Some(Arc::new(store))
    };
    let store: Arc<dyn FeedStore> = match &pg {
        Some(store) => store.clone() as Arc<dyn FeedStore>,
        None => Arc::new(MemoryFeedStore::new()),
    };

    let job = build_feed_job(&config, feed, fetcher, store, Arc::new(TracingOutcomeSink));
    let outcome = job.run_cycle(date).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let Some(store) = pg {
        store.close().await;
    }

    if outcome.failed_stage().is_some() {
        anyhow::bail!("{} cycle failed", feed);
    }
    Ok(())
}
