use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CivicOpsError;
use crate::geo::GeoPoint;

/// Worker ids are operator-assigned strings (e.g. `w3`), not UUIDs.
pub type WorkerId = String;

/// Normalised issue key: lower-cased and trimmed.
pub fn issue_key(issue: &str) -> String {
    issue.trim().to_lowercase()
}

// --- Statuses ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    Pending,
    Ongoing,
    Completed,
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ongoing => write!(f, "ongoing"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for ComplaintStatus {
    type Err = CivicOpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "ongoing" => Ok(Self::Ongoing),
            "completed" => Ok(Self::Completed),
            other => Err(CivicOpsError::Validation(format!(
                "unknown complaint status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Ongoing,
    Completed,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ongoing => write!(f, "ongoing"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = CivicOpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ongoing" => Ok(Self::Ongoing),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CivicOpsError::Validation(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

// --- Records ---

/// A geotagged citizen complaint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: Uuid,
    pub issue: String,
    pub address: String,
    pub landmark: String,
    pub location: GeoPoint,
    pub status: ComplaintStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when recording a new complaint.
#[derive(Debug, Clone, PartialEq)]
pub struct NewComplaint {
    pub issue: String,
    pub address: String,
    pub landmark: String,
    pub location: GeoPoint,
    pub created_at: DateTime<Utc>,
}

/// An unpersisted grouping of complaints proposed for assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTask {
    pub issue_type: String,
    pub complaint_ids: Vec<Uuid>,
    pub center: GeoPoint,
    pub priority_score: i64,
}

/// A persisted, worker-assignable task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub issue_type: String,
    pub complaint_ids: Vec<Uuid>,
    pub center: GeoPoint,
    /// Computed once at creation, never recomputed.
    pub priority_score: i64,
    pub assigned_worker_id: Option<WorkerId>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a task. The store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub issue_type: String,
    pub complaint_ids: Vec<Uuid>,
    pub center: GeoPoint,
    pub priority_score: i64,
    pub assigned_worker_id: Option<WorkerId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub phone: String,
}

/// A self-scheduling task definition promoted from a suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringTask {
    pub id: Uuid,
    pub title: String,
    pub issue: String,
    pub location: GeoPoint,
    pub frequency_days: u32,
    pub assigned_worker_id: Option<WorkerId>,
    pub next_execution: DateTime<Utc>,
    pub active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RecurringTask {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_execution
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRecurringTask {
    pub title: String,
    pub issue: String,
    pub location: GeoPoint,
    pub frequency_days: u32,
    pub assigned_worker_id: Option<WorkerId>,
    pub next_execution: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Partial update for operator-managed recurring task settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecurringTaskPatch {
    pub active: Option<bool>,
    pub frequency_days: Option<u32>,
    /// `Some(None)` clears the default worker.
    pub assigned_worker_id: Option<Option<WorkerId>>,
}

/// What a guarded recurring execution wrote.
#[derive(Debug, Clone, PartialEq)]
pub enum RecurringExecution {
    /// The schedule moved forward, together with the generated task if any.
    Advanced(Option<Task>),
    /// `next_execution` no longer matched the expected instant. Nothing written.
    Stale,
}

/// Occurrence history for an (issue, grid cell) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringCandidate {
    pub issue: String,
    /// Grid-snapped centroid; part of the identity.
    pub center: GeoPoint,
    pub occurrences: Vec<DateTime<Utc>>,
    /// Sequence number of the last event applied to this candidate.
    pub last_seq: i64,
}

/// What a guarded candidate write did.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateWrite {
    /// Candidate saved, together with the suggestion it produced if any.
    Saved(Option<RecurringSuggestion>),
    /// The stored candidate changed since it was read. Nothing written.
    Stale,
}

/// A confirmed periodic pattern awaiting operator promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringSuggestion {
    pub id: Uuid,
    pub title: String,
    pub issue: String,
    pub location: GeoPoint,
    pub frequency_days: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRecurringSuggestion {
    pub title: String,
    pub issue: String,
    pub location: GeoPoint,
    pub frequency_days: u32,
    pub created_at: DateTime<Utc>,
}
