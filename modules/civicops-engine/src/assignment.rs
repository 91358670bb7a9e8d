use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use civicops_common::{CandidateTask, CivicOpsError, NewTask, Task};
use civicops_events::EventLog;

use crate::dispatcher::Dispatcher;
use crate::outbox::TaskAssigned;
use crate::traits::TaskStore;

impl<S: TaskStore, L: EventLog> Dispatcher<S, L> {
    /// Persist a candidate as an ongoing task for `worker_id` and claim its
    /// complaints. Store failures propagate.
    ///
    /// Recurring-candidate tracking happens afterwards through the event
    /// log. A failure there is logged and never undoes the assignment.
    pub async fn assign_task(
        &self,
        candidate: &CandidateTask,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let worker_id = worker_id.trim();
        if worker_id.is_empty() {
            return Err(CivicOpsError::Validation("a worker must be selected".into()).into());
        }
        if candidate.complaint_ids.is_empty() {
            return Err(CivicOpsError::Validation("candidate task has no complaints".into()).into());
        }
        if self.store.worker(worker_id).await?.is_none() {
            return Err(CivicOpsError::not_found("worker", worker_id).into());
        }

        let task = self
            .store
            .create_task_claiming_complaints(&NewTask {
                issue_type: candidate.issue_type.clone(),
                complaint_ids: candidate.complaint_ids.clone(),
                center: candidate.center,
                priority_score: candidate.priority_score,
                assigned_worker_id: Some(worker_id.to_string()),
                created_at: now,
            })
            .await?;

        info!(
            task_id = %task.id,
            worker_id,
            issue = task.issue_type.as_str(),
            complaints = task.complaint_ids.len(),
            priority = task.priority_score,
            "Task assigned"
        );

        match TaskAssigned::from_task(&task, now).to_event() {
            Ok(event) => {
                if let Err(e) = self.events.append(event).await {
                    warn!(task_id = %task.id, error = %e, "Failed to record task:assigned event");
                }
            }
            Err(e) => warn!(task_id = %task.id, error = %e, "Failed to encode task:assigned event"),
        }
        self.drain_outbox_logged().await;

        Ok(task)
    }

    /// Rebuild the current suggestions and assign the one whose members are
    /// exactly `complaint_ids` (in any order).
    pub async fn assign_suggested(
        &self,
        complaint_ids: &[Uuid],
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let candidates = self.suggested_tasks(now).await?;
        let candidate = find_candidate(&candidates, complaint_ids).ok_or_else(|| {
            CivicOpsError::Validation(
                "no suggested task matches exactly those complaints".to_string(),
            )
        })?;
        self.assign_task(candidate, worker_id, now).await
    }
}

/// The candidate whose member set equals `complaint_ids`.
pub fn find_candidate<'a>(
    candidates: &'a [CandidateTask],
    complaint_ids: &[Uuid],
) -> Option<&'a CandidateTask> {
    let mut wanted = complaint_ids.to_vec();
    wanted.sort();
    wanted.dedup();

    candidates.iter().find(|c| {
        let mut ids = c.complaint_ids.clone();
        ids.sort();
        ids == wanted
    })
}
