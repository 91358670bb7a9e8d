//! Append-only event outbox.
//!
//! Stores opaque JSONB facts in sequence order. Consumers keep a named cursor
//! and read everything after it, so a side effect that failed to run inline
//! is picked up on the next drain.
//!
//! Consumers provide their own event types that serialize to `serde_json::Value`.

pub mod log;
pub mod memory;
pub mod store;
pub mod types;

pub use log::EventLog;
pub use memory::MemoryEventStore;
pub use store::EventStore;
pub use types::{AppendEvent, StoredEvent};
