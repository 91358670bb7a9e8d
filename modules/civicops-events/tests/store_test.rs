//! Integration tests for EventStore.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use chrono::Duration;
use civicops_events::{AppendEvent, EventLog, EventStore};
use serde_json::json;
use sqlx::PgPool;

/// Get a test database pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            seq        BIGSERIAL    PRIMARY KEY,
            ts         TIMESTAMPTZ  NOT NULL DEFAULT now(),
            event_type TEXT         NOT NULL,
            actor      TEXT,
            payload    JSONB        NOT NULL,
            schema_v   SMALLINT     NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(&pool)
    .await
    .ok()?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_cursors (
            consumer   TEXT         PRIMARY KEY,
            last_seq   BIGINT       NOT NULL,
            updated_at TIMESTAMPTZ  NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&pool)
    .await
    .ok()?;

    Some(pool)
}

#[tokio::test]
async fn append_assigns_seq_and_round_trips_payload() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = EventStore::new(pool);

    let stored = store
        .append(AppendEvent::new("task:assigned", json!({"issue": "garbage"})).with_actor("test"))
        .await
        .unwrap();

    assert!(stored.seq > 0);
    assert_eq!(stored.event_type, "task:assigned");
    assert_eq!(stored.payload["issue"], "garbage");
    assert_eq!(stored.actor.as_deref(), Some("test"));
}

#[tokio::test]
async fn read_from_skips_consumed_events() {
    let Some(pool) = test_pool().await else {
        return;
    };
    // Other tests leave rolled-back holes behind; step over them at once.
    let store = EventStore::new(pool).with_gap_settle(Duration::zero());

    let a = format!("a-{}", std::process::id());
    let b = format!("b-{}", std::process::id());

    let first = store.append(AppendEvent::new(&a, json!({}))).await.unwrap();
    let second = store.append(AppendEvent::new(&b, json!({}))).await.unwrap();
    let third = store.append(AppendEvent::new(&a, json!({}))).await.unwrap();

    let rest = store.read_from(first.seq, 1000).await.unwrap();
    assert!(rest.iter().all(|e| e.seq > first.seq));
    assert!(rest.iter().any(|e| e.seq == second.seq));
    assert!(rest.iter().any(|e| e.seq == third.seq));

    let after_second = store.read_from(second.seq, 1000).await.unwrap();
    assert!(after_second.iter().all(|e| e.seq != first.seq && e.seq != second.seq));
    assert_eq!(
        after_second.iter().find(|e| e.seq == third.seq).map(|e| e.event_type.as_str()),
        Some(a.as_str())
    );
}

#[tokio::test]
async fn cursor_upserts() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = EventStore::new(pool);

    let consumer = format!("tracker-{}", std::process::id());

    store.save_cursor(&consumer, 3).await.unwrap();
    store.save_cursor(&consumer, 5).await.unwrap();
    assert_eq!(store.load_cursor(&consumer).await.unwrap(), 5);
    assert_eq!(store.load_cursor("never-saved-consumer").await.unwrap(), 0);
}

#[tokio::test]
async fn read_from_stops_at_open_gap() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = EventStore::new(pool.clone());
    let tag = format!("gap-{}", std::process::id());

    let before = store.append(AppendEvent::new(&tag, json!({}))).await.unwrap();

    // Burn a sequence number the way an aborted append does.
    let mut tx = pool.begin().await.unwrap();
    sqlx::query("INSERT INTO events (event_type, payload) VALUES ($1, '{}'::jsonb)")
        .bind(&tag)
        .execute(&mut *tx)
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    let after = store.append(AppendEvent::new(&tag, json!({}))).await.unwrap();
    assert!(after.seq > before.seq + 1);

    // A fresh hole may still be filled, so the later event is held back.
    let held = store.read_from(before.seq, 1000).await.unwrap();
    assert!(held.iter().all(|e| e.seq < after.seq));

    // Once the hole is old enough it is stepped over.
    let settled = EventStore::new(pool).with_gap_settle(Duration::zero());
    let read = settled.read_from(before.seq, 1000).await.unwrap();
    assert!(read.iter().any(|e| e.seq == after.seq));
}
