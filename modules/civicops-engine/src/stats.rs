use std::fmt;

use anyhow::Result;
use serde::Serialize;

use civicops_common::{ComplaintStatus, TaskStatus};
use civicops_events::EventLog;

use crate::dispatcher::Dispatcher;
use crate::traits::TaskStore;

/// Headline counts for the operator dashboard.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total_complaints: i64,
    pub pending: i64,
    pub ongoing: i64,
    pub completed: i64,
    pub ongoing_tasks: i64,
    pub active_recurring: i64,
}

impl fmt::Display for DashboardStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "complaints={} pending={} ongoing={} completed={} ongoing_tasks={} active_recurring={}",
            self.total_complaints,
            self.pending,
            self.ongoing,
            self.completed,
            self.ongoing_tasks,
            self.active_recurring,
        )
    }
}

impl<S: TaskStore, L: EventLog> Dispatcher<S, L> {
    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let (by_status, ongoing_tasks, active_recurring) = futures::try_join!(
            self.store.count_complaints_by_status(),
            self.store.tasks_with_status(TaskStatus::Ongoing),
            self.store.count_active_recurring_tasks(),
        )?;

        let mut stats = DashboardStats {
            ongoing_tasks: ongoing_tasks.len() as i64,
            active_recurring,
            ..Default::default()
        };
        for (status, n) in by_status {
            match status {
                ComplaintStatus::Pending => stats.pending += n,
                ComplaintStatus::Ongoing => stats.ongoing += n,
                ComplaintStatus::Completed => stats.completed += n,
            }
            stats.total_complaints += n;
        }
        Ok(stats)
    }
}
