use anyhow::Result;
use tracing::info;
use uuid::Uuid;

use civicops_common::{CivicOpsError, ComplaintStatus, Task, TaskStatus};
use civicops_events::EventLog;

use crate::dispatcher::Dispatcher;
use crate::traits::TaskStore;

impl<S: TaskStore, L: EventLog> Dispatcher<S, L> {
    /// Resolve a task: its complaints become completed.
    pub async fn complete_task(&self, task_id: Uuid) -> Result<()> {
        self.close(task_id, TaskStatus::Completed, ComplaintStatus::Completed)
            .await
    }

    /// Drop a task: its complaints go back to pending and reappear in
    /// suggestions.
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<()> {
        self.close(task_id, TaskStatus::Cancelled, ComplaintStatus::Pending)
            .await
    }

    pub async fn reassign_task(&self, task_id: Uuid, worker_id: &str) -> Result<Task> {
        let worker_id = worker_id.trim();
        if worker_id.is_empty() {
            return Err(CivicOpsError::Validation("a worker must be selected".into()).into());
        }
        let task = self.ongoing_task(task_id).await?;
        if self.store.worker(worker_id).await?.is_none() {
            return Err(CivicOpsError::not_found("worker", worker_id).into());
        }

        let worker_id = worker_id.to_string();
        self.store.set_task_worker(task.id, &worker_id).await?;
        info!(task_id = %task.id, worker_id = worker_id.as_str(), "Task reassigned");

        Ok(Task {
            assigned_worker_id: Some(worker_id),
            ..task
        })
    }

    async fn ongoing_task(&self, task_id: Uuid) -> Result<Task> {
        let task = self
            .store
            .task(task_id)
            .await?
            .ok_or_else(|| CivicOpsError::not_found("task", task_id))?;
        if task.status != TaskStatus::Ongoing {
            return Err(CivicOpsError::Validation(format!(
                "task {task_id} is {}, not ongoing",
                task.status
            ))
            .into());
        }
        Ok(task)
    }

    async fn close(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        complaint_status: ComplaintStatus,
    ) -> Result<()> {
        let task = self.ongoing_task(task_id).await?;

        if !self.store.close_task(task.id, status, complaint_status).await? {
            return Err(CivicOpsError::Validation(format!(
                "task {task_id} was closed concurrently"
            ))
            .into());
        }

        info!(
            task_id = %task.id,
            status = %status,
            complaints = task.complaint_ids.len(),
            "Task closed"
        );
        Ok(())
    }
}
