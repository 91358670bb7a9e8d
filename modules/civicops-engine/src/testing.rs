// Test doubles for the dispatch engine.
//
// MockTaskStore (TaskStore) is a stateful in-memory store with the same
// claiming rules as PgStore, plus switches for injecting failures and a gate
// for holding a scheduler run in flight.
//
// Plus helpers for building complaints and recurring tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use civicops_common::{
    CandidateWrite, CivicOpsError, Complaint, ComplaintStatus, GeoPoint, NewRecurringSuggestion,
    NewRecurringTask, NewTask, RecurringCandidate, RecurringExecution, RecurringSuggestion,
    RecurringTask, RecurringTaskPatch, Task, TaskStatus, Worker, WorkerId,
};

use crate::traits::TaskStore;

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// Connaught Place, New Delhi.
pub const CONNAUGHT_PLACE: (f64, f64) = (28.6315, 77.2167);
/// India Gate, New Delhi. About 2.3 km from Connaught Place.
pub const INDIA_GATE: (f64, f64) = (28.6129, 77.2295);

/// A point `meters_north` metres north of `origin`.
pub fn north_of(origin: (f64, f64), meters_north: f64) -> GeoPoint {
    GeoPoint::new(origin.0 + meters_north / 111_195.0, origin.1)
}

pub fn complaint(issue: &str, location: GeoPoint, created_at: DateTime<Utc>) -> Complaint {
    Complaint {
        id: Uuid::new_v4(),
        issue: issue.to_string(),
        address: "Test address".to_string(),
        landmark: String::new(),
        location,
        status: ComplaintStatus::Pending,
        created_at,
    }
}

pub fn recurring_task(
    issue: &str,
    location: GeoPoint,
    frequency_days: u32,
    next_execution: DateTime<Utc>,
) -> RecurringTask {
    RecurringTask {
        id: Uuid::new_v4(),
        title: issue.to_string(),
        issue: issue.to_string(),
        location,
        frequency_days,
        assigned_worker_id: None,
        next_execution,
        active: true,
        last_run: None,
        created_at: next_execution,
    }
}

// ---------------------------------------------------------------------------
// MockTaskStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    complaints: Vec<Complaint>,
    workers: HashMap<WorkerId, Worker>,
    tasks: Vec<Task>,
    recurring: Vec<RecurringTask>,
    candidates: Vec<RecurringCandidate>,
    suggestions: Vec<RecurringSuggestion>,
    failing_issues: Vec<String>,
}

/// Handles for a held `active_recurring_tasks` call.
#[derive(Clone)]
pub struct ListingGate {
    /// Notified when a caller reaches the gate.
    pub entered: Arc<Notify>,
    /// Notify once to let the held caller continue.
    pub release: Arc<Notify>,
}

#[derive(Default)]
pub struct MockTaskStore {
    state: Mutex<State>,
    fail_candidate_writes: AtomicBool,
    fail_recurring_listing: AtomicBool,
    fail_next_execution: AtomicBool,
    gate: Mutex<Option<ListingGate>>,
}

impl MockTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker(self, id: &str, name: &str) -> Self {
        self.state.lock().unwrap().workers.insert(
            id.to_string(),
            Worker {
                id: id.to_string(),
                name: name.to_string(),
                phone: String::new(),
            },
        );
        self
    }

    pub fn add_complaint(&self, complaint: Complaint) -> Uuid {
        let id = complaint.id;
        self.state.lock().unwrap().complaints.push(complaint);
        id
    }

    pub fn add_recurring(&self, recurring: RecurringTask) -> Uuid {
        let id = recurring.id;
        self.state.lock().unwrap().recurring.push(recurring);
        id
    }

    pub fn complaint_status(&self, id: Uuid) -> Option<ComplaintStatus> {
        self.state
            .lock()
            .unwrap()
            .complaints
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.status)
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        self.state.lock().unwrap().tasks.clone()
    }

    pub fn recurring(&self, id: Uuid) -> Option<RecurringTask> {
        self.state
            .lock()
            .unwrap()
            .recurring
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Make candidate writes (and the suggestions that ride with them) fail.
    pub fn fail_candidate_writes(&self, fail: bool) {
        self.fail_candidate_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_recurring_listing(&self, fail: bool) {
        self.fail_recurring_listing.store(fail, Ordering::SeqCst);
    }

    /// Make the next recurring execution fail. Nothing from it is written.
    pub fn fail_next_recurring_execution(&self) {
        self.fail_next_execution.store(true, Ordering::SeqCst);
    }

    /// Make task creation fail for this issue.
    pub fn fail_tasks_for_issue(&self, issue: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_issues
            .push(issue.to_string());
    }

    /// Hold the next `active_recurring_tasks` call until released.
    pub fn hold_recurring_listing(&self) -> ListingGate {
        let gate = ListingGate {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn check_candidate_writes(&self) -> Result<()> {
        if self.fail_candidate_writes.load(Ordering::SeqCst) {
            bail!("MockTaskStore: candidate write rejected");
        }
        Ok(())
    }
}

impl State {
    fn claim_and_insert(&mut self, new: &NewTask) -> Result<Task> {
        if self.failing_issues.contains(&new.issue_type) {
            bail!("MockTaskStore: task creation rejected for {}", new.issue_type);
        }

        let claimable = new.complaint_ids.iter().all(|id| {
            self.complaints
                .iter()
                .any(|c| c.id == *id && c.status == ComplaintStatus::Pending)
        });
        if !claimable {
            return Err(CivicOpsError::Validation(
                "some complaints are no longer pending".to_string(),
            )
            .into());
        }

        for c in self
            .complaints
            .iter_mut()
            .filter(|c| new.complaint_ids.contains(&c.id))
        {
            c.status = ComplaintStatus::Ongoing;
        }

        let task = Task {
            id: Uuid::new_v4(),
            issue_type: new.issue_type.clone(),
            complaint_ids: new.complaint_ids.clone(),
            center: new.center,
            priority_score: new.priority_score,
            assigned_worker_id: new.assigned_worker_id.clone(),
            status: TaskStatus::Ongoing,
            created_at: new.created_at,
        };
        self.tasks.push(task.clone());
        Ok(task)
    }
}

fn not_found(kind: &'static str, id: impl ToString) -> anyhow::Error {
    CivicOpsError::not_found(kind, id).into()
}

#[async_trait]
impl TaskStore for MockTaskStore {
    async fn pending_complaints(&self) -> Result<Vec<Complaint>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .complaints
            .iter()
            .filter(|c| c.status == ComplaintStatus::Pending)
            .cloned()
            .collect())
    }

    async fn complaint(&self, id: Uuid) -> Result<Option<Complaint>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .complaints
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn set_complaint_statuses(&self, ids: &[Uuid], status: ComplaintStatus) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut updated = 0;
        for c in state.complaints.iter_mut().filter(|c| ids.contains(&c.id)) {
            c.status = status;
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete_complaint(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let before = state.complaints.len();
        state.complaints.retain(|c| c.id != id);
        Ok(state.complaints.len() < before)
    }

    async fn delete_completed_complaints(&self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.complaints.len();
        state
            .complaints
            .retain(|c| c.status != ComplaintStatus::Completed);
        Ok((before - state.complaints.len()) as u64)
    }

    async fn count_complaints_by_status(&self) -> Result<Vec<(ComplaintStatus, i64)>> {
        let state = self.state.lock().unwrap();
        let mut counts: HashMap<ComplaintStatus, i64> = HashMap::new();
        for c in &state.complaints {
            *counts.entry(c.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn worker(&self, id: &str) -> Result<Option<Worker>> {
        Ok(self.state.lock().unwrap().workers.get(id).cloned())
    }

    async fn create_task_claiming_complaints(&self, new: &NewTask) -> Result<Task> {
        self.state.lock().unwrap().claim_and_insert(new)
    }

    async fn task(&self, id: Uuid) -> Result<Option<Task>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tasks
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tasks
            .iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn close_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        complaint_status: ComplaintStatus,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(task) = state
            .tasks
            .iter_mut()
            .find(|t| t.id == id && t.status == TaskStatus::Ongoing)
        else {
            return Ok(false);
        };
        task.status = status;
        let members = task.complaint_ids.clone();

        for c in state
            .complaints
            .iter_mut()
            .filter(|c| members.contains(&c.id))
        {
            c.status = complaint_status;
        }
        Ok(true)
    }

    async fn set_task_worker(&self, id: Uuid, worker_id: &WorkerId) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        match state.tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.assigned_worker_id = Some(worker_id.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn active_recurring_tasks(&self) -> Result<Vec<RecurringTask>> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        if self.fail_recurring_listing.load(Ordering::SeqCst) {
            bail!("MockTaskStore: recurring listing rejected");
        }

        Ok(self
            .state
            .lock()
            .unwrap()
            .recurring
            .iter()
            .filter(|r| r.active)
            .cloned()
            .collect())
    }

    async fn recurring_tasks(&self) -> Result<Vec<RecurringTask>> {
        Ok(self.state.lock().unwrap().recurring.clone())
    }

    async fn recurring_task(&self, id: Uuid) -> Result<Option<RecurringTask>> {
        Ok(self.recurring(id))
    }

    async fn execute_recurring(
        &self,
        id: Uuid,
        expected_next: DateTime<Utc>,
        task: Option<&NewTask>,
        next_execution: DateTime<Utc>,
        last_run: DateTime<Utc>,
    ) -> Result<RecurringExecution> {
        if self.fail_next_execution.swap(false, Ordering::SeqCst) {
            bail!("MockTaskStore: recurring execution rejected");
        }

        let mut state = self.state.lock().unwrap();
        let Some(index) = state
            .recurring
            .iter()
            .position(|r| r.id == id && r.active && r.next_execution == expected_next)
        else {
            return Ok(RecurringExecution::Stale);
        };

        // Claim before advancing so a failed claim leaves the schedule untouched.
        let task = task.map(|new| state.claim_and_insert(new)).transpose()?;

        let recurring = &mut state.recurring[index];
        recurring.next_execution = next_execution;
        recurring.last_run = Some(last_run);
        Ok(RecurringExecution::Advanced(task))
    }

    async fn update_recurring_task(&self, id: Uuid, patch: &RecurringTaskPatch) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(r) = state.recurring.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        if let Some(active) = patch.active {
            r.active = active;
        }
        if let Some(days) = patch.frequency_days {
            r.frequency_days = days;
        }
        if let Some(worker) = &patch.assigned_worker_id {
            r.assigned_worker_id = worker.clone();
        }
        Ok(true)
    }

    async fn delete_recurring_task(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let before = state.recurring.len();
        state.recurring.retain(|r| r.id != id);
        Ok(state.recurring.len() < before)
    }

    async fn count_active_recurring_tasks(&self) -> Result<i64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .recurring
            .iter()
            .filter(|r| r.active)
            .count() as i64)
    }

    async fn candidate(&self, issue: &str, center: GeoPoint) -> Result<Option<RecurringCandidate>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .candidates
            .iter()
            .find(|c| c.issue == issue && c.center == center)
            .cloned())
    }

    async fn record_candidate(
        &self,
        candidate: &RecurringCandidate,
        expected_last_seq: Option<i64>,
        suggestion: Option<&NewRecurringSuggestion>,
    ) -> Result<CandidateWrite> {
        self.check_candidate_writes()?;
        let mut state = self.state.lock().unwrap();

        let existing = state
            .candidates
            .iter()
            .position(|c| c.issue == candidate.issue && c.center == candidate.center);
        match (existing, expected_last_seq) {
            (None, None) => state.candidates.push(candidate.clone()),
            (Some(i), Some(expected)) if state.candidates[i].last_seq == expected => {
                state.candidates[i] = candidate.clone();
            }
            _ => return Ok(CandidateWrite::Stale),
        }

        let suggestion = suggestion.map(|new| RecurringSuggestion {
            id: Uuid::new_v4(),
            title: new.title.clone(),
            issue: new.issue.clone(),
            location: new.location,
            frequency_days: new.frequency_days,
            created_at: new.created_at,
        });
        if let Some(s) = &suggestion {
            state.suggestions.push(s.clone());
        }
        Ok(CandidateWrite::Saved(suggestion))
    }

    async fn suggestions(&self) -> Result<Vec<RecurringSuggestion>> {
        Ok(self.state.lock().unwrap().suggestions.clone())
    }

    async fn suggestion(&self, id: Uuid) -> Result<Option<RecurringSuggestion>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .suggestions
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn promote_suggestion(
        &self,
        suggestion_id: Uuid,
        new: &NewRecurringTask,
    ) -> Result<RecurringTask> {
        let mut state = self.state.lock().unwrap();
        let before = state.suggestions.len();
        state.suggestions.retain(|s| s.id != suggestion_id);
        if state.suggestions.len() == before {
            return Err(not_found("recurring suggestion", suggestion_id));
        }

        let task = RecurringTask {
            id: Uuid::new_v4(),
            title: new.title.clone(),
            issue: new.issue.clone(),
            location: new.location,
            frequency_days: new.frequency_days,
            assigned_worker_id: new.assigned_worker_id.clone(),
            next_execution: new.next_execution,
            active: true,
            last_run: None,
            created_at: new.created_at,
        };
        state.recurring.push(task.clone());
        Ok(task)
    }
}
