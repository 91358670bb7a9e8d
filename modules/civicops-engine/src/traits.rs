// Trait seams for the dispatch engine.
//
// TaskStore is every read and write the engine performs against the six
// collections. RunLease is the optional cross-process exclusion for the
// recurring scheduler.
//
// Both are implemented for PgStore, and by MockTaskStore / NoLease in tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use civicops_common::{
    CandidateWrite, Complaint, ComplaintStatus, GeoPoint, NewRecurringSuggestion,
    NewRecurringTask, NewTask, RecurringCandidate, RecurringExecution, RecurringSuggestion,
    RecurringTask, RecurringTaskPatch, Task, TaskStatus, Worker, WorkerId,
};
use civicops_store::PgStore;

// ---------------------------------------------------------------------------
// TaskStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TaskStore: Send + Sync {
    // --- Complaints ---

    /// Pending complaints in a stable order.
    async fn pending_complaints(&self) -> Result<Vec<Complaint>>;

    async fn complaint(&self, id: Uuid) -> Result<Option<Complaint>>;

    /// Returns the number of complaints updated.
    async fn set_complaint_statuses(&self, ids: &[Uuid], status: ComplaintStatus) -> Result<u64>;

    async fn delete_complaint(&self, id: Uuid) -> Result<bool>;

    async fn delete_completed_complaints(&self) -> Result<u64>;

    async fn count_complaints_by_status(&self) -> Result<Vec<(ComplaintStatus, i64)>>;

    // --- Workers ---

    async fn worker(&self, id: &str) -> Result<Option<Worker>>;

    // --- Tasks ---

    /// Persist an ongoing task and move its complaints pending → ongoing
    /// atomically. Fails if any member complaint is no longer pending.
    async fn create_task_claiming_complaints(&self, new: &NewTask) -> Result<Task>;

    async fn task(&self, id: Uuid) -> Result<Option<Task>>;

    async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>>;

    /// Ongoing → `status`, complaints → `complaint_status`. False if the task
    /// was not ongoing.
    async fn close_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        complaint_status: ComplaintStatus,
    ) -> Result<bool>;

    async fn set_task_worker(&self, id: Uuid, worker_id: &WorkerId) -> Result<bool>;

    // --- Recurring tasks ---

    async fn active_recurring_tasks(&self) -> Result<Vec<RecurringTask>>;

    /// Every recurring task, paused ones included.
    async fn recurring_tasks(&self) -> Result<Vec<RecurringTask>>;

    async fn recurring_task(&self, id: Uuid) -> Result<Option<RecurringTask>>;

    /// Atomically advance the schedule from `expected_next` to
    /// `next_execution` and, if given, create `task` claiming its complaints.
    /// `Stale` when the schedule no longer reads `expected_next`.
    async fn execute_recurring(
        &self,
        id: Uuid,
        expected_next: DateTime<Utc>,
        task: Option<&NewTask>,
        next_execution: DateTime<Utc>,
        last_run: DateTime<Utc>,
    ) -> Result<RecurringExecution>;

    async fn update_recurring_task(&self, id: Uuid, patch: &RecurringTaskPatch) -> Result<bool>;

    async fn delete_recurring_task(&self, id: Uuid) -> Result<bool>;

    async fn count_active_recurring_tasks(&self) -> Result<i64>;

    // --- Candidates & suggestions ---

    async fn candidate(&self, issue: &str, center: GeoPoint) -> Result<Option<RecurringCandidate>>;

    /// Save `candidate` and insert `suggestion` together, guarded on the
    /// stored `last_seq` still equalling `expected_last_seq` (`None`: absent).
    async fn record_candidate(
        &self,
        candidate: &RecurringCandidate,
        expected_last_seq: Option<i64>,
        suggestion: Option<&NewRecurringSuggestion>,
    ) -> Result<CandidateWrite>;

    async fn suggestions(&self) -> Result<Vec<RecurringSuggestion>>;

    async fn suggestion(&self, id: Uuid) -> Result<Option<RecurringSuggestion>>;

    /// Insert the recurring task and delete the suggestion together.
    async fn promote_suggestion(
        &self,
        suggestion_id: Uuid,
        new: &NewRecurringTask,
    ) -> Result<RecurringTask>;
}

#[async_trait]
impl TaskStore for PgStore {
    async fn pending_complaints(&self) -> Result<Vec<Complaint>> {
        self.pending_complaints().await
    }

    async fn complaint(&self, id: Uuid) -> Result<Option<Complaint>> {
        self.complaint(id).await
    }

    async fn set_complaint_statuses(&self, ids: &[Uuid], status: ComplaintStatus) -> Result<u64> {
        self.set_complaint_statuses(ids, status).await
    }

    async fn delete_complaint(&self, id: Uuid) -> Result<bool> {
        self.delete_complaint(id).await
    }

    async fn delete_completed_complaints(&self) -> Result<u64> {
        self.delete_completed_complaints().await
    }

    async fn count_complaints_by_status(&self) -> Result<Vec<(ComplaintStatus, i64)>> {
        self.count_complaints_by_status().await
    }

    async fn worker(&self, id: &str) -> Result<Option<Worker>> {
        self.worker(id).await
    }

    async fn create_task_claiming_complaints(&self, new: &NewTask) -> Result<Task> {
        self.create_task_claiming_complaints(new).await
    }

    async fn task(&self, id: Uuid) -> Result<Option<Task>> {
        self.task(id).await
    }

    async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.tasks_with_status(status).await
    }

    async fn close_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        complaint_status: ComplaintStatus,
    ) -> Result<bool> {
        self.close_task(id, status, complaint_status).await
    }

    async fn set_task_worker(&self, id: Uuid, worker_id: &WorkerId) -> Result<bool> {
        self.set_task_worker(id, worker_id).await
    }

    async fn active_recurring_tasks(&self) -> Result<Vec<RecurringTask>> {
        self.active_recurring_tasks().await
    }

    async fn recurring_tasks(&self) -> Result<Vec<RecurringTask>> {
        self.recurring_tasks().await
    }

    async fn recurring_task(&self, id: Uuid) -> Result<Option<RecurringTask>> {
        self.recurring_task(id).await
    }

    async fn execute_recurring(
        &self,
        id: Uuid,
        expected_next: DateTime<Utc>,
        task: Option<&NewTask>,
        next_execution: DateTime<Utc>,
        last_run: DateTime<Utc>,
    ) -> Result<RecurringExecution> {
        self.execute_recurring(id, expected_next, task, next_execution, last_run)
            .await
    }

    async fn update_recurring_task(&self, id: Uuid, patch: &RecurringTaskPatch) -> Result<bool> {
        self.update_recurring_task(id, patch).await
    }

    async fn delete_recurring_task(&self, id: Uuid) -> Result<bool> {
        self.delete_recurring_task(id).await
    }

    async fn count_active_recurring_tasks(&self) -> Result<i64> {
        self.count_active_recurring_tasks().await
    }

    async fn candidate(&self, issue: &str, center: GeoPoint) -> Result<Option<RecurringCandidate>> {
        self.candidate(issue, center).await
    }

    async fn record_candidate(
        &self,
        candidate: &RecurringCandidate,
        expected_last_seq: Option<i64>,
        suggestion: Option<&NewRecurringSuggestion>,
    ) -> Result<CandidateWrite> {
        self.record_candidate(candidate, expected_last_seq, suggestion)
            .await
    }

    async fn suggestions(&self) -> Result<Vec<RecurringSuggestion>> {
        self.suggestions().await
    }

    async fn suggestion(&self, id: Uuid) -> Result<Option<RecurringSuggestion>> {
        self.suggestion(id).await
    }

    async fn promote_suggestion(
        &self,
        suggestion_id: Uuid,
        new: &NewRecurringTask,
    ) -> Result<RecurringTask> {
        self.promote_suggestion(suggestion_id, new).await
    }
}

// ---------------------------------------------------------------------------
// RunLease
// ---------------------------------------------------------------------------

/// Exclusion across processes for one scheduler run.
#[async_trait]
pub trait RunLease: Send + Sync {
    /// True if this process now holds the lease.
    async fn acquire(&self) -> Result<bool>;

    async fn release(&self) -> Result<()>;
}

/// Process-local only. The scheduler's in-memory guard is the sole exclusion.
pub struct NoLease;

#[async_trait]
impl RunLease for NoLease {
    async fn acquire(&self) -> Result<bool> {
        Ok(true)
    }

    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Lease row in `scheduler_leases`, shared by every instance pointed at the
/// same database.
pub struct PgRunLease {
    store: PgStore,
    name: String,
    holder: String,
    ttl_minutes: i64,
}

impl PgRunLease {
    pub const RECURRING: &'static str = "recurring_engine";

    pub fn new(store: PgStore, ttl_minutes: i64) -> Self {
        Self {
            store,
            name: Self::RECURRING.to_string(),
            holder: Uuid::new_v4().to_string(),
            ttl_minutes,
        }
    }
}

#[async_trait]
impl RunLease for PgRunLease {
    async fn acquire(&self) -> Result<bool> {
        self.store
            .try_acquire_lease(&self.name, &self.holder, self.ttl_minutes)
            .await
    }

    async fn release(&self) -> Result<()> {
        self.store.release_lease(&self.name, &self.holder).await
    }
}
