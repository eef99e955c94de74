//! Store capability and its Postgres and in-memory implementations

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::WriteError;
use crate::models::{FeedEnvelope, Game, ScheduledEvent};

/// Idempotent per-row persistence for the three feed tables
///
/// Every upsert is keyed by the record's feed-assigned id. Writing the same
/// id again replaces every mutable column and never adds a second row.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Connectivity check used at startup
    async fn ping(&self) -> Result<(), WriteError>;

    /// Upsert into `scheduled_events`
    async fn upsert_scheduled_event(
        &self,
        event: &ScheduledEvent,
        envelope: &FeedEnvelope,
    ) -> Result<(), WriteError>;

    /// Upsert into `ball_statistics_games`
    async fn upsert_game(&self, game: &Game, envelope: &FeedEnvelope) -> Result<(), WriteError>;

    /// Upsert into `results`
    async fn upsert_result(
        &self,
        event: &ScheduledEvent,
        envelope: &FeedEnvelope,
    ) -> Result<(), WriteError>;
}

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS scheduled_events (
        id BIGINT PRIMARY KEY,
        event_type TEXT NOT NULL,
        event_number TEXT NOT NULL CHECK (event_number <> ''),
        event_time TIMESTAMPTZ NOT NULL,
        finish_time TIMESTAMPTZ NOT NULL,
        event_status TEXT NOT NULL,
        draw_mode TEXT NOT NULL DEFAULT '',
        result TEXT NOT NULL DEFAULT '',
        local_time TIMESTAMPTZ NOT NULL,
        utc_time TIMESTAMPTZ NOT NULL,
        round_trip_time TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ball_statistics_games (
        id BIGINT PRIMARY KEY,
        event_number TEXT NOT NULL CHECK (event_number <> ''),
        event_time TIMESTAMPTZ NOT NULL,
        draw TEXT NOT NULL,
        local_time TIMESTAMPTZ NOT NULL,
        utc_time TIMESTAMPTZ NOT NULL,
        round_trip_time TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS results (
        id BIGINT PRIMARY KEY,
        event_type TEXT NOT NULL,
        event_number TEXT NOT NULL CHECK (event_number <> ''),
        event_time TIMESTAMPTZ NOT NULL,
        finish_time TIMESTAMPTZ NOT NULL,
        event_status TEXT NOT NULL,
        draw_mode TEXT NOT NULL DEFAULT '',
        result TEXT NOT NULL DEFAULT '',
        local_time TIMESTAMPTZ NOT NULL,
        utc_time TIMESTAMPTZ NOT NULL,
        round_trip_time TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    // tables created before draw fields were kept on scheduled events
    "ALTER TABLE scheduled_events ADD COLUMN IF NOT EXISTS draw_mode TEXT NOT NULL DEFAULT ''",
    "ALTER TABLE scheduled_events ADD COLUMN IF NOT EXISTS result TEXT NOT NULL DEFAULT ''",
];

/// Postgres-backed store
pub struct PgFeedStore {
    pool: PgPool,
}

impl PgFeedStore {
    /// Connect a pool using the database configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the feed tables if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create feed tables")?;
        }
        info!("Feed tables ready");
        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl FeedStore for PgFeedStore {
    async fn ping(&self) -> Result<(), WriteError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_scheduled_event(
        &self,
        event: &ScheduledEvent,
        envelope: &FeedEnvelope,
    ) -> Result<(), WriteError> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_events (
                id, event_type, event_number, event_time, finish_time, event_status,
                draw_mode, result, local_time, utc_time, round_trip_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id)
            DO UPDATE SET
                event_type = EXCLUDED.event_type,
                event_number = EXCLUDED.event_number,
                event_time = EXCLUDED.event_time,
                finish_time = EXCLUDED.finish_time,
                event_status = EXCLUDED.event_status,
                draw_mode = EXCLUDED.draw_mode,
                result = EXCLUDED.result,
                local_time = EXCLUDED.local_time,
                utc_time = EXCLUDED.utc_time,
                round_trip_time = EXCLUDED.round_trip_time,
                updated_at = now()
            "#,
        )
        .bind(event.id)
        .bind(event.event_type.as_str())
        .bind(event.event_number.as_str())
        .bind(event.event_time.as_utc())
        .bind(event.finish_time.as_utc())
        .bind(event.status.as_str())
        .bind(event.draw_mode.as_str())
        .bind(event.result.as_str())
        .bind(envelope.local_time.as_utc())
        .bind(envelope.utc_time.as_utc())
        .bind(envelope.round_trip_time.as_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_game(&self, game: &Game, envelope: &FeedEnvelope) -> Result<(), WriteError> {
        sqlx::query(
            r#"
            INSERT INTO ball_statistics_games (
                id, event_number, event_time, draw, local_time, utc_time, round_trip_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id)
            DO UPDATE SET
                event_number = EXCLUDED.event_number,
                event_time = EXCLUDED.event_time,
                draw = EXCLUDED.draw,
                local_time = EXCLUDED.local_time,
                utc_time = EXCLUDED.utc_time,
                round_trip_time = EXCLUDED.round_trip_time,
                updated_at = now()
            "#,
        )
        .bind(game.id)
        .bind(game.event_number.as_str())
        .bind(game.event_time.as_utc())
        .bind(game.draw.as_str())
        .bind(envelope.local_time.as_utc())
        .bind(envelope.utc_time.as_utc())
        .bind(envelope.round_trip_time.as_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_result(
        &self,
        event: &ScheduledEvent,
        envelope: &FeedEnvelope,
    ) -> Result<(), WriteError> {
        sqlx::query(
            r#"
            INSERT INTO results (
                id, event_type, event_number, event_time, finish_time, event_status,
                draw_mode, result, local_time, utc_time, round_trip_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id)
            DO UPDATE SET
                event_type = EXCLUDED.event_type,
                event_number = EXCLUDED.event_number,
                event_time = EXCLUDED.event_time,
                finish_time = EXCLUDED.finish_time,
                event_status = EXCLUDED.event_status,
                draw_mode = EXCLUDED.draw_mode,
                result = EXCLUDED.result,
                local_time = EXCLUDED.local_time,
                utc_time = EXCLUDED.utc_time,
                round_trip_time = EXCLUDED.round_trip_time,
                updated_at = now()
            "#,
        )
        .bind(event.id)
        .bind(event.event_type.as_str())
        .bind(event.event_number.as_str())
        .bind(event.event_time.as_utc())
        .bind(event.finish_time.as_utc())
        .bind(event.status.as_str())
        .bind(event.draw_mode.as_str())
        .bind(event.result.as_str())
        .bind(envelope.local_time.as_utc())
        .bind(envelope.utc_time.as_utc())
        .bind(envelope.round_trip_time.as_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// A row as held by [`MemoryFeedStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow<T> {
    pub record: T,
    pub envelope: FeedEnvelope,
    /// How many times this id has been written
    pub writes: u32,
}

#[derive(Debug, Default)]
struct Tables {
    scheduled_events: HashMap<i64, StoredRow<ScheduledEvent>>,
    games: HashMap<i64, StoredRow<Game>>,
    results: HashMap<i64, StoredRow<ScheduledEvent>>,
}

/// In-process store with the same keys and constraints as the Postgres schema
///
/// Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryFeedStore {
    tables: Mutex<Tables>,
}

impl MemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn scheduled_event(&self, id: i64) -> Option<StoredRow<ScheduledEvent>> {
        self.tables().scheduled_events.get(&id).cloned()
    }

    pub fn game(&self, id: i64) -> Option<StoredRow<Game>> {
        self.tables().games.get(&id).cloned()
    }

    pub fn result(&self, id: i64) -> Option<StoredRow<ScheduledEvent>> {
        self.tables().results.get(&id).cloned()
    }

    /// Row counts for `scheduled_events`, `ball_statistics_games` and `results`
    pub fn row_counts(&self) -> (usize, usize, usize) {
        let tables = self.tables();
        (tables.scheduled_events.len(), tables.games.len(), tables.results.len())
    }
}

fn check_event_number(id: i64, event_number: &str) -> Result<(), WriteError> {
    if event_number.is_empty() {
        return Err(WriteError::constraint(format!("row {id}: event_number must not be empty")));
    }
    Ok(())
}

fn upsert_row<T>(table: &mut HashMap<i64, StoredRow<T>>, id: i64, record: T, envelope: FeedEnvelope) {
    match table.entry(id) {
        Entry::Occupied(mut slot) => {
            let row = slot.get_mut();
            row.record = record;
            row.envelope = envelope;
            row.writes += 1;
        }
        Entry::Vacant(slot) => {
            slot.insert(StoredRow { record, envelope, writes: 1 });
        }
    }
}

#[async_trait]
impl FeedStore for MemoryFeedStore {
    async fn ping(&self) -> Result<(), WriteError> {
        Ok(())
    }

    async fn upsert_scheduled_event(
        &self,
        event: &ScheduledEvent,
        envelope: &FeedEnvelope,
    ) -> Result<(), WriteError> {
        check_event_number(event.id, &event.event_number)?;
        let mut tables = self.tables();
        upsert_row(&mut tables.scheduled_events, event.id, event.clone(), *envelope);
        Ok(())
    }

    async fn upsert_game(&self, game: &Game, envelope: &FeedEnvelope) -> Result<(), WriteError> {
        check_event_number(game.id, &game.event_number)?;
        let mut tables = self.tables();
        upsert_row(&mut tables.games, game.id, game.clone(), *envelope);
        Ok(())
    }

    async fn upsert_result(
        &self,
        event: &ScheduledEvent,
        envelope: &FeedEnvelope,
    ) -> Result<(), WriteError> {
        check_event_number(event.id, &event.event_number)?;
        let mut tables = self.tables();
        upsert_row(&mut tables.results, event.id, event.clone(), *envelope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Instant;
    use chrono::{TimeZone, Utc};

    fn at(h: u32, m: u32) -> Instant {
        Instant::from_utc(Utc.with_ymd_and_hms(2025, 6, 26, h, m, 0).unwrap())
    }

    fn envelope() -> FeedEnvelope {
        FeedEnvelope { local_time: at(23, 59), utc_time: at(20, 59), round_trip_time: at(20, 59) }
    }

    fn event(id: i64, number: &str, status: &str, result: &str) -> ScheduledEvent {
        ScheduledEvent {
            id,
            event_type: "Keno".to_string(),
            event_number: number.to_string(),
            event_time: at(7, 0),
            finish_time: at(7, 1),
            status: status.to_string(),
            draw_mode: "Auto".to_string(),
            result: result.to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_keeps_draw_fields_on_scheduled_events() {
        let store = MemoryFeedStore::new();
        store.upsert_scheduled_event(&event(11, "7", "Finished", "3,9"), &envelope()).await.unwrap();

        let row = store.scheduled_event(11).unwrap();
        assert_eq!(row.record.draw_mode, "Auto");
        assert_eq!(row.record.result, "3,9");
    }

    #[tokio::test]
    async fn test_memory_store_rejects_empty_event_number() {
        let store = MemoryFeedStore::new();
        let err = store.upsert_result(&event(12, "", "Finished", ""), &envelope()).await;
        assert!(matches!(err, Err(WriteError::Constraint(_))));
        assert_eq!(store.row_counts(), (0, 0, 0));
    }

    // ── Postgres (requires DATABASE_URL, skipped by default) ─────────────

    const PG_IDS: [i64; 4] = [990_001, 990_002, 990_003, 990_004];

    async fn pg_store(ids: &[i64]) -> PgFeedStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL not set");
        let store = PgFeedStore::from_pool(PgPool::connect(&url).await.unwrap());
        store.ensure_schema().await.unwrap();
        for table in ["scheduled_events", "results"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE id = ANY($1)"))
                .bind(ids)
                .execute(&store.pool)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_upserts_converge_and_reject_bad_rows() {
        let store = pg_store(&PG_IDS).await;

        store.upsert_result(&event(PG_IDS[0], "42", "Scheduled", ""), &envelope()).await.unwrap();
        store
            .upsert_result(&event(PG_IDS[0], "42", "Finished", "1,2,3"), &envelope())
            .await
            .unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM results WHERE id = $1")
            .bind(PG_IDS[0])
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let (status, result): (String, String) =
            sqlx::query_as("SELECT event_status, result FROM results WHERE id = $1")
                .bind(PG_IDS[0])
                .fetch_one(&store.pool)
                .await
                .unwrap();
        assert_eq!(status, "Finished");
        assert_eq!(result, "1,2,3");

        store
            .upsert_scheduled_event(&event(PG_IDS[1], "43", "Finished", "4,5"), &envelope())
            .await
            .unwrap();
        let (draw_mode, result): (String, String) =
            sqlx::query_as("SELECT draw_mode, result FROM scheduled_events WHERE id = $1")
                .bind(PG_IDS[1])
                .fetch_one(&store.pool)
                .await
                .unwrap();
        assert_eq!((draw_mode.as_str(), result.as_str()), ("Auto", "4,5"));

        // CHECK violation fails only the offending row
        let err = store.upsert_result(&event(PG_IDS[2], "", "Finished", ""), &envelope()).await;
        assert!(matches!(err, Err(WriteError::Database(_))), "got {err:?}");

        store.upsert_result(&event(PG_IDS[3], "44", "Finished", ""), &envelope()).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM results WHERE id = ANY($1)")
            .bind(&PG_IDS[2..])
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        store.close().await;
    }
}
