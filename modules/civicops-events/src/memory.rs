//! In-memory event log for tests and single-process runs. No database required.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::log::EventLog;
use crate::types::{AppendEvent, StoredEvent};

#[derive(Default)]
struct Inner {
    events: Vec<StoredEvent>,
    cursors: HashMap<String, i64>,
}

/// Sequence numbers start at 1 and increase by one per append.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<Inner>,
    fail_appends: AtomicBool,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail, to exercise best-effort paths.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// All appended events (for test assertions).
    pub async fn events(&self) -> Vec<StoredEvent> {
        self.inner.lock().await.events.clone()
    }
}

#[async_trait]
impl EventLog for MemoryEventStore {
    async fn append(&self, event: AppendEvent) -> Result<StoredEvent> {
        if self.fail_appends.load(Ordering::SeqCst) {
            bail!("MemoryEventStore: append rejected");
        }
        let mut inner = self.inner.lock().await;
        let stored = StoredEvent {
            seq: inner.events.len() as i64 + 1,
            ts: Utc::now(),
            event_type: event.event_type,
            actor: event.actor,
            payload: event.payload,
            schema_v: event.schema_v,
        };
        inner.events.push(stored.clone());
        Ok(stored)
    }

    async fn read_from(&self, after_seq: i64, limit: usize) -> Result<Vec<StoredEvent>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.seq > after_seq)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn load_cursor(&self, consumer: &str) -> Result<i64> {
        Ok(self
            .inner
            .lock()
            .await
            .cursors
            .get(consumer)
            .copied()
            .unwrap_or(0))
    }

    async fn save_cursor(&self, consumer: &str, seq: i64) -> Result<()> {
        self.inner
            .lock()
            .await
            .cursors
            .insert(consumer.to_string(), seq);
        Ok(())
    }
}
