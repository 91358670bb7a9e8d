use chrono::{DateTime, Utc};

use civicops_common::file_config::{ClusteringConfig, ScoringConfig};
use civicops_common::{CandidateTask, Complaint};

use crate::clustering::cluster_complaints;
use crate::scoring::score_cluster;

/// Ranked candidate tasks for a set of unresolved complaints.
///
/// One candidate per cluster (suggestion radius), highest score first. The
/// sort is stable, so equal scores keep issue first-appearance order and
/// then seed order. Nothing is persisted.
pub fn build_suggested_tasks(
    complaints: &[Complaint],
    clustering: &ClusteringConfig,
    scoring: &ScoringConfig,
    now: DateTime<Utc>,
) -> Vec<CandidateTask> {
    let mut candidates: Vec<CandidateTask> =
        cluster_complaints(complaints, clustering.suggestion_radius_m)
            .into_iter()
            .map(|cluster| CandidateTask {
                issue_type: cluster.issue.to_string(),
                complaint_ids: cluster.members.iter().map(|c| c.id).collect(),
                center: cluster.center(),
                priority_score: score_cluster(scoring, cluster.issue, &cluster.members, now),
            })
            .collect();

    candidates.sort_by(|a, b| b.priority_score.cmp(&a.priority_score));
    candidates
}
