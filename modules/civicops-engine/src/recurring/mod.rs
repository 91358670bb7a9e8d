pub mod scheduler;
pub mod tracker;

pub use scheduler::{RecurringRunStats, RecurringScheduler, RunGuard, RunOutcome};
pub use tracker::{infer_frequency_days, record_occurrence, track_assignment};
