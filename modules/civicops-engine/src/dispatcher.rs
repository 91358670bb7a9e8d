use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::warn;

use civicops_common::file_config::EngineConfig;
use civicops_common::{CandidateTask, Complaint};
use civicops_events::EventLog;

use crate::outbox::CandidateTrackingConsumer;
use crate::recurring::scheduler::{RecurringScheduler, RunOutcome};
use crate::task_builder;
use crate::traits::{NoLease, RunLease, TaskStore};

/// Entry point for every engine operation. Owns the store, the event log,
/// the tunables, and the recurring scheduler's single-flight guard.
///
/// Operations are split across modules as further `impl Dispatcher` blocks:
/// assignment, lifecycle, maintenance and stats.
pub struct Dispatcher<S: TaskStore, L: EventLog> {
    pub(crate) store: S,
    pub(crate) events: L,
    pub(crate) config: EngineConfig,
    scheduler: RecurringScheduler,
    lease: Arc<dyn RunLease>,
    drain_lock: Mutex<()>,
}

impl<S: TaskStore, L: EventLog> Dispatcher<S, L> {
    pub fn new(store: S, events: L, config: EngineConfig) -> Self {
        Self {
            store,
            events,
            config,
            scheduler: RecurringScheduler::new(),
            lease: Arc::new(NoLease),
            drain_lock: Mutex::new(()),
        }
    }

    /// Use a cross-process lease for recurring runs.
    pub fn with_lease(mut self, lease: Arc<dyn RunLease>) -> Self {
        self.lease = lease;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn events(&self) -> &L {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &RecurringScheduler {
        &self.scheduler
    }

    // -----------------------------------------------------------------------
    // Suggestions
    // -----------------------------------------------------------------------

    /// Ranked candidate tasks for the given complaints. Pure.
    pub fn build_suggested_tasks(
        &self,
        complaints: &[Complaint],
        now: DateTime<Utc>,
    ) -> Vec<CandidateTask> {
        task_builder::build_suggested_tasks(
            complaints,
            &self.config.clustering,
            &self.config.scoring,
            now,
        )
    }

    /// Ranked candidate tasks for everything currently pending.
    pub async fn suggested_tasks(&self, now: DateTime<Utc>) -> Result<Vec<CandidateTask>> {
        let pending = self.store.pending_complaints().await?;
        Ok(self.build_suggested_tasks(&pending, now))
    }

    // -----------------------------------------------------------------------
    // Recurring engine & outbox
    // -----------------------------------------------------------------------

    /// Run the recurring engine once. A call made while a run is in flight
    /// returns `AlreadyRunning` without doing anything.
    pub async fn run_recurring_engine(&self, now: DateTime<Utc>) -> RunOutcome {
        self.scheduler
            .run(&self.store, self.lease.as_ref(), &self.config, now)
            .await
    }

    /// Apply pending assignment events to the candidate tracker. Returns the
    /// number of assignments tracked.
    pub async fn drain_outbox(&self) -> Result<usize> {
        let _drain = self.drain_lock.lock().await;
        CandidateTrackingConsumer::new(&self.store, &self.events, &self.config.recurring)
            .drain()
            .await
    }

    /// Drain and log instead of failing. A failed drain is retried by the
    /// next one.
    pub(crate) async fn drain_outbox_logged(&self) {
        if let Err(e) = self.drain_outbox().await {
            warn!(error = %e, "Candidate tracking failed, will retry on next drain");
        }
    }
}
