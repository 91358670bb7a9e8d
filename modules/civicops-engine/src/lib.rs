pub mod assignment;
pub mod clustering;
pub mod dispatcher;
pub mod lifecycle;
pub mod maintenance;
pub mod outbox;
pub mod recurring;
pub mod scoring;
pub mod stats;
pub mod task_builder;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use dispatcher::Dispatcher;
pub use outbox::{CandidateTrackingConsumer, TaskAssigned, TASK_ASSIGNED};
pub use recurring::scheduler::{RecurringRunStats, RecurringScheduler, RunOutcome};
pub use stats::DashboardStats;
pub use task_builder::build_suggested_tasks;
pub use traits::{NoLease, PgRunLease, RunLease, TaskStore};
