//! Assignment events and the consumer that turns them into recurring
//! candidates.
//!
//! Assignment appends `task:assigned` to the event log. The candidate
//! tracker runs from the log, behind a persisted cursor, so a tracking
//! failure never touches the assignment and is retried on the next drain.
//! Replayed events are absorbed by the candidate's `last_seq`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use civicops_common::file_config::RecurringConfig;
use civicops_common::{GeoPoint, Task, WorkerId};
use civicops_events::{AppendEvent, EventLog};

use crate::recurring::tracker::track_assignment;
use crate::traits::TaskStore;

pub const TASK_ASSIGNED: &str = "task:assigned";

/// Cursor name for the candidate tracker.
pub const CANDIDATE_CONSUMER: &str = "recurring_candidates";

const DRAIN_BATCH: usize = 100;

/// Payload of a `task:assigned` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssigned {
    pub task_id: Uuid,
    pub issue: String,
    pub center: GeoPoint,
    pub worker_id: Option<WorkerId>,
    pub assigned_at: DateTime<Utc>,
}

impl TaskAssigned {
    pub fn from_task(task: &Task, assigned_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id,
            issue: task.issue_type.clone(),
            center: task.center,
            worker_id: task.assigned_worker_id.clone(),
            assigned_at,
        }
    }

    pub fn to_event(&self) -> Result<AppendEvent> {
        Ok(AppendEvent::new(TASK_ASSIGNED, serde_json::to_value(self)?).with_actor("dispatcher"))
    }
}

/// Applies candidate tracking to every `task:assigned` event past its cursor.
pub struct CandidateTrackingConsumer<'a, S: ?Sized, L: ?Sized> {
    store: &'a S,
    log: &'a L,
    config: &'a RecurringConfig,
}

impl<'a, S, L> CandidateTrackingConsumer<'a, S, L>
where
    S: TaskStore + ?Sized,
    L: EventLog + ?Sized,
{
    pub fn new(store: &'a S, log: &'a L, config: &'a RecurringConfig) -> Self {
        Self { store, log, config }
    }

    /// Apply all pending events. Returns the number of `task:assigned`
    /// events handled.
    ///
    /// The cursor advances after each event, so an error stops the drain at
    /// the failing event and the next drain starts there. Delivery is at
    /// least once; the tracker ignores events a candidate has already seen.
    pub async fn drain(&self) -> Result<usize> {
        let mut cursor = self.log.load_cursor(CANDIDATE_CONSUMER).await?;
        let mut applied = 0;

        loop {
            let batch = self.log.read_from(cursor, DRAIN_BATCH).await?;
            if batch.is_empty() {
                break;
            }

            for event in batch {
                if event.event_type == TASK_ASSIGNED {
                    match serde_json::from_value::<TaskAssigned>(event.payload.clone()) {
                        Ok(assigned) => {
                            track_assignment(
                                self.store,
                                self.config,
                                event.seq,
                                &assigned.issue,
                                assigned.center,
                                assigned.assigned_at,
                            )
                            .await?;
                            applied += 1;
                        }
                        Err(e) => {
                            warn!(seq = event.seq, error = %e, "Skipping malformed task:assigned event");
                        }
                    }
                }

                cursor = event.seq;
                self.log.save_cursor(CANDIDATE_CONSUMER, cursor).await?;
            }
        }

        if applied > 0 {
            debug!(applied, cursor, "Outbox drained");
        }
        Ok(applied)
    }
}
