use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{AppendEvent, StoredEvent};

/// Append-only log with named consumer cursors.
///
/// Implemented by `EventStore` (postgres) and `MemoryEventStore` (tests).
/// Also implemented for `Arc<L>` so a log can be shared for assertions.
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, event: AppendEvent) -> Result<StoredEvent>;

    /// Events with `seq > after_seq`, ascending, at most `limit`.
    ///
    /// Gap-free: the result never skips a sequence number that may still
    /// be filled by an append in flight.
    async fn read_from(&self, after_seq: i64, limit: usize) -> Result<Vec<StoredEvent>>;

    /// Last sequence number the named consumer has applied, 0 if none.
    async fn load_cursor(&self, consumer: &str) -> Result<i64>;

    async fn save_cursor(&self, consumer: &str, seq: i64) -> Result<()>;
}

#[async_trait]
impl<L: EventLog + ?Sized> EventLog for Arc<L> {
    async fn append(&self, event: AppendEvent) -> Result<StoredEvent> {
        (**self).append(event).await
    }

    async fn read_from(&self, after_seq: i64, limit: usize) -> Result<Vec<StoredEvent>> {
        (**self).read_from(after_seq, limit).await
    }

    async fn load_cursor(&self, consumer: &str) -> Result<i64> {
        (**self).load_cursor(consumer).await
    }

    async fn save_cursor(&self, consumer: &str, seq: i64) -> Result<()> {
        (**self).save_cursor(consumer, seq).await
    }
}
