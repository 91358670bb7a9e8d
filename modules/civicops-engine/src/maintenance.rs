use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use civicops_common::{
    CivicOpsError, ComplaintStatus, NewRecurringTask, RecurringSuggestion, RecurringTask,
    RecurringTaskPatch,
};
use civicops_events::EventLog;

use crate::dispatcher::Dispatcher;
use crate::traits::TaskStore;

fn validate_frequency(frequency_days: u32) -> Result<()> {
    if frequency_days < 1 {
        return Err(CivicOpsError::Validation("frequency must be at least 1 day".into()).into());
    }
    Ok(())
}

fn normalize_worker(worker_id: Option<&str>) -> Option<String> {
    worker_id
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string)
}

impl<S: TaskStore, L: EventLog> Dispatcher<S, L> {
    // -----------------------------------------------------------------------
    // Suggestion promotion
    // -----------------------------------------------------------------------

    /// Turn a suggestion into an active recurring task first due
    /// `frequency_days` after `now`. The suggestion is consumed.
    pub async fn convert_suggestion_to_recurring_task(
        &self,
        suggestion: &RecurringSuggestion,
        frequency_days: u32,
        worker_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RecurringTask> {
        validate_frequency(frequency_days)?;
        let worker_id = normalize_worker(worker_id);
        if let Some(id) = &worker_id {
            if self.store.worker(id).await?.is_none() {
                return Err(CivicOpsError::not_found("worker", id).into());
            }
        }

        let title = if suggestion.title.trim().is_empty() {
            suggestion.issue.clone()
        } else {
            suggestion.title.clone()
        };

        let recurring = self
            .store
            .promote_suggestion(
                suggestion.id,
                &NewRecurringTask {
                    title,
                    issue: suggestion.issue.clone(),
                    location: suggestion.location,
                    frequency_days,
                    assigned_worker_id: worker_id,
                    next_execution: now + Duration::days(i64::from(frequency_days)),
                    created_at: now,
                },
            )
            .await?;

        info!(
            recurring_id = %recurring.id,
            suggestion_id = %suggestion.id,
            frequency_days,
            next_execution = %recurring.next_execution,
            "Suggestion promoted to recurring task"
        );
        Ok(recurring)
    }

    /// Promote by suggestion id.
    pub async fn promote_suggestion(
        &self,
        suggestion_id: Uuid,
        frequency_days: u32,
        worker_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RecurringTask> {
        let suggestion = self
            .store
            .suggestion(suggestion_id)
            .await?
            .ok_or_else(|| CivicOpsError::not_found("recurring suggestion", suggestion_id))?;
        self.convert_suggestion_to_recurring_task(&suggestion, frequency_days, worker_id, now)
            .await
    }

    /// Suggestions awaiting promotion, newest first.
    pub async fn recurring_suggestions(&self) -> Result<Vec<RecurringSuggestion>> {
        self.store.suggestions().await
    }

    // -----------------------------------------------------------------------
    // Recurring task management
    // -----------------------------------------------------------------------

    pub async fn recurring_tasks(&self) -> Result<Vec<RecurringTask>> {
        self.store.recurring_tasks().await
    }

    /// Pause or resume. Paused tasks are never executed.
    pub async fn set_recurring_active(&self, id: Uuid, active: bool) -> Result<()> {
        self.patch_recurring(
            id,
            RecurringTaskPatch {
                active: Some(active),
                ..Default::default()
            },
        )
        .await
    }

    /// Takes effect from the next run; the current `next_execution` stays.
    pub async fn set_recurring_frequency(&self, id: Uuid, frequency_days: u32) -> Result<()> {
        validate_frequency(frequency_days)?;
        self.patch_recurring(
            id,
            RecurringTaskPatch {
                frequency_days: Some(frequency_days),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_recurring_worker(&self, id: Uuid, worker_id: Option<&str>) -> Result<()> {
        let worker_id = normalize_worker(worker_id);
        if let Some(w) = &worker_id {
            if self.store.worker(w).await?.is_none() {
                return Err(CivicOpsError::not_found("worker", w).into());
            }
        }
        self.patch_recurring(
            id,
            RecurringTaskPatch {
                assigned_worker_id: Some(worker_id),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete_recurring_task(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_recurring_task(id).await? {
            return Err(CivicOpsError::not_found("recurring task", id).into());
        }
        info!(recurring_id = %id, "Recurring task deleted");
        Ok(())
    }

    async fn patch_recurring(&self, id: Uuid, patch: RecurringTaskPatch) -> Result<()> {
        if !self.store.update_recurring_task(id, &patch).await? {
            return Err(CivicOpsError::not_found("recurring task", id).into());
        }
        info!(recurring_id = %id, patch = ?patch, "Recurring task updated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Complaint maintenance
    // -----------------------------------------------------------------------

    pub async fn set_complaint_status(&self, id: Uuid, status: ComplaintStatus) -> Result<()> {
        if self.store.set_complaint_statuses(&[id], status).await? == 0 {
            return Err(CivicOpsError::not_found("complaint", id).into());
        }
        info!(complaint_id = %id, status = %status, "Complaint status set");
        Ok(())
    }

    pub async fn delete_complaint(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_complaint(id).await? {
            return Err(CivicOpsError::not_found("complaint", id).into());
        }
        info!(complaint_id = %id, "Complaint deleted");
        Ok(())
    }

    /// Delete every completed complaint. Returns how many were removed.
    pub async fn purge_completed_complaints(&self) -> Result<u64> {
        let removed = self.store.delete_completed_complaints().await?;
        info!(removed, "Completed complaints purged");
        Ok(removed)
    }
}
