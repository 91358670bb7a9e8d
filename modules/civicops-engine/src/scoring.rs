use chrono::{DateTime, Utc};

use civicops_common::file_config::ScoringConfig;
use civicops_common::Complaint;

const WEIGHT_FACTOR: i64 = 10;
const SIZE_FACTOR: i64 = 3;

/// Age-based urgency bucket for a single complaint.
pub fn urgency(age_hours: f64) -> i64 {
    if age_hours > 48.0 {
        5
    } else if age_hours > 24.0 {
        3
    } else if age_hours > 6.0 {
        1
    } else {
        0
    }
}

/// Hours elapsed since `created_at`. Negative for future-dated complaints.
pub fn age_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - created_at).num_milliseconds() as f64 / 3_600_000.0
}

/// `weight * 10 + size * 3 + Σ urgency(age)` for a same-issue cluster.
pub fn score_cluster(
    config: &ScoringConfig,
    issue: &str,
    members: &[&Complaint],
    now: DateTime<Utc>,
) -> i64 {
    let urgency_sum: i64 = members
        .iter()
        .map(|c| urgency(age_hours(c.created_at, now)))
        .sum();

    config.weight_for(issue) * WEIGHT_FACTOR + members.len() as i64 * SIZE_FACTOR + urgency_sum
}
