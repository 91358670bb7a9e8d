//! EventStore: append-only event log backed by Postgres.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::log::EventLog;
use crate::types::{AppendEvent, StoredEvent};

/// How long a hole in the sequence may stay open before readers step over it.
const DEFAULT_GAP_SETTLE_SECS: i64 = 60;

#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
    gap_settle: Duration,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            gap_settle: Duration::seconds(DEFAULT_GAP_SETTLE_SECS),
        }
    }

    /// Age the event after a hole must reach before the hole is treated as
    /// a rolled-back append rather than one still in flight.
    pub fn with_gap_settle(mut self, settle: Duration) -> Self {
        self.gap_settle = settle;
        self
    }

    /// Whether `successor`, the first event after a hole, is old enough that
    /// nothing can still commit into the hole. Appends are single statements,
    /// so an earlier sequence number cannot outlive a later one by long.
    async fn gap_settled(&self, successor: &StoredEvent) -> Result<bool> {
        let settle_secs = self.gap_settle.num_milliseconds() as f64 / 1000.0;
        let (settled,) = sqlx::query_as::<_, (bool,)>(
            "SELECT $1 < now() - make_interval(secs => $2)",
        )
        .bind(successor.ts)
        .bind(settle_secs)
        .fetch_one(&self.pool)
        .await?;
        Ok(settled)
    }
}

#[async_trait]
impl EventLog for EventStore {
    async fn append(&self, event: AppendEvent) -> Result<StoredEvent> {
        let stored = sqlx::query_as::<_, StoredEvent>(
            r#"
            INSERT INTO events (event_type, actor, payload, schema_v)
            VALUES ($1, $2, $3, $4)
            RETURNING seq, ts, event_type, actor, payload, schema_v
            "#,
        )
        .bind(&event.event_type)
        .bind(&event.actor)
        .bind(&event.payload)
        .bind(event.schema_v)
        .fetch_one(&self.pool)
        .await?;

        debug!(seq = stored.seq, event_type = %stored.event_type, "Event appended");
        Ok(stored)
    }

    async fn read_from(&self, after_seq: i64, limit: usize) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT seq, ts, event_type, actor, payload, schema_v
            FROM events
            WHERE seq > $1
            ORDER BY seq ASC
            LIMIT $2
            "#,
        )
        .bind(after_seq)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // Stop at the first hole: an append holding that number may still
        // commit, and a cursor moved past it would never see the event.
        let mut result = Vec::with_capacity(rows.len());
        let mut expected_seq = after_seq + 1;

        for row in rows {
            if row.seq != expected_seq {
                if !self.gap_settled(&row).await? {
                    debug!(after_seq, missing = expected_seq, "Read stopped at open gap");
                    break;
                }
                warn!(
                    from = expected_seq,
                    to = row.seq - 1,
                    "Stepping over settled gap in event sequence"
                );
            }
            expected_seq = row.seq + 1;
            result.push(row);
        }

        Ok(result)
    }

    async fn load_cursor(&self, consumer: &str) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT last_seq FROM event_cursors WHERE consumer = $1",
        )
        .bind(consumer)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0).unwrap_or(0))
    }

    async fn save_cursor(&self, consumer: &str, seq: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_cursors (consumer, last_seq, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (consumer) DO UPDATE SET last_seq = EXCLUDED.last_seq, updated_at = now()
            "#,
        )
        .bind(consumer)
        .bind(seq)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEvent {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(StoredEvent {
            seq: row.try_get("seq")?,
            ts: row.try_get("ts")?,
            event_type: row.try_get("event_type")?,
            actor: row.try_get("actor")?,
            payload: row.try_get("payload")?,
            schema_v: row.try_get("schema_v")?,
        })
    }
}
