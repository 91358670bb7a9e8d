use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use civicops_common::file_config::EngineConfig;
use civicops_common::{centroid, NewTask, RecurringExecution, RecurringTask, Task};

use crate::clustering::complaints_near;
use crate::traits::{RunLease, TaskStore};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;

/// Counters for one recurring engine run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RecurringRunStats {
    pub scanned: u64,
    pub due: u64,
    pub tasks_created: u64,
    pub skipped_empty: u64,
    pub failed: u64,
}

impl fmt::Display for RecurringRunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} due={} tasks_created={} skipped_empty={} failed={}",
            self.scanned, self.due, self.tasks_created, self.skipped_empty, self.failed,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RecurringRunStats),
    /// Another run held the guard or the lease. Nothing was done.
    AlreadyRunning,
}

/// Single-flight recurring scheduler. At most one run per instance is in
/// progress; a call that finds a run in flight returns immediately.
#[derive(Debug, Default)]
pub struct RecurringScheduler {
    state: AtomicU8,
}

/// Holds the scheduler in `Running`; dropping it returns to `Idle`.
pub struct RunGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.store(IDLE, Ordering::SeqCst);
    }
}

enum ItemOutcome {
    Created(Task),
    Empty,
    /// Executed elsewhere since it was listed.
    Stale,
}

impl RecurringScheduler {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    /// Idle → Running, or `None` if a run is already in flight.
    pub fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard { state: &self.state })
    }

    /// Execute every due active recurring task. Never returns an error:
    /// failures are logged and counted.
    pub async fn run<S: TaskStore + ?Sized>(
        &self,
        store: &S,
        lease: &dyn RunLease,
        config: &EngineConfig,
        now: DateTime<Utc>,
    ) -> RunOutcome {
        let Some(_guard) = self.try_begin() else {
            info!("Recurring engine already running, skipping");
            return RunOutcome::AlreadyRunning;
        };

        match lease.acquire().await {
            Ok(true) => {}
            Ok(false) => {
                info!("Recurring lease held by another instance, skipping");
                return RunOutcome::AlreadyRunning;
            }
            Err(e) => {
                warn!(error = %e, "Failed to acquire recurring lease, skipping");
                return RunOutcome::AlreadyRunning;
            }
        }

        let stats = self.run_inner(store, config, now).await;

        // Always release lease
        if let Err(e) = lease.release().await {
            warn!(error = %e, "Failed to release recurring lease");
        }

        info!("Recurring run complete. {stats}");
        RunOutcome::Completed(stats)
    }

    async fn run_inner<S: TaskStore + ?Sized>(
        &self,
        store: &S,
        config: &EngineConfig,
        now: DateTime<Utc>,
    ) -> RecurringRunStats {
        let mut stats = RecurringRunStats::default();

        let active = match store.active_recurring_tasks().await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "Failed to load active recurring tasks");
                return stats;
            }
        };

        // Sequential: each item re-reads the pending set after the previous
        // one may have claimed complaints from it.
        for recurring in &active {
            stats.scanned += 1;
            if !recurring.is_due(now) {
                debug!(
                    recurring_id = %recurring.id,
                    next_execution = %recurring.next_execution,
                    "Recurring task not yet due"
                );
                continue;
            }
            stats.due += 1;

            match execute_due(store, config, recurring, now).await {
                Ok(ItemOutcome::Created(task)) => {
                    stats.tasks_created += 1;
                    info!(
                        recurring_id = %recurring.id,
                        task_id = %task.id,
                        complaints = task.complaint_ids.len(),
                        "Recurring task generated work"
                    );
                }
                Ok(ItemOutcome::Empty) => {
                    stats.skipped_empty += 1;
                    debug!(recurring_id = %recurring.id, "No nearby pending complaints");
                }
                Ok(ItemOutcome::Stale) => {
                    debug!(recurring_id = %recurring.id, "Schedule already advanced elsewhere");
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(
                        recurring_id = %recurring.id,
                        error = %e,
                        "Recurring task failed, will retry next run"
                    );
                }
            }
        }

        stats
    }
}

/// Claim nearby pending complaints into a task (if any) and move the
/// schedule forward by the task's frequency from `now`. Both happen in one
/// store write guarded on the instant this run saw, so a failure leaves the
/// item untouched for the next run and a due instant executes once.
async fn execute_due<S: TaskStore + ?Sized>(
    store: &S,
    config: &EngineConfig,
    recurring: &RecurringTask,
    now: DateTime<Utc>,
) -> Result<ItemOutcome> {
    let pending = store.pending_complaints().await?;
    let issue_filter = config
        .recurring
        .match_issue_type
        .then_some(recurring.issue.as_str());
    let nearby = complaints_near(
        &pending,
        recurring.location,
        config.clustering.recurring_radius_m,
        issue_filter,
    );

    let new_task = (!nearby.is_empty()).then(|| NewTask {
        issue_type: recurring.issue.clone(),
        complaint_ids: nearby.iter().map(|c| c.id).collect(),
        center: centroid(nearby.iter().map(|c| &c.location)).unwrap_or(recurring.location),
        priority_score: config.recurring.generated_priority,
        assigned_worker_id: recurring.assigned_worker_id.clone(),
        created_at: now,
    });

    let next_execution = now + Duration::days(i64::from(recurring.frequency_days));
    let outcome = match store
        .execute_recurring(
            recurring.id,
            recurring.next_execution,
            new_task.as_ref(),
            next_execution,
            now,
        )
        .await?
    {
        RecurringExecution::Advanced(Some(task)) => ItemOutcome::Created(task),
        RecurringExecution::Advanced(None) => ItemOutcome::Empty,
        RecurringExecution::Stale => ItemOutcome::Stale,
    };
    Ok(outcome)
}
