//! Recurring-pattern detection.
//!
//! Each assignment records an occurrence against an (issue, grid cell) key.
//! When a key reaches the threshold the mean spacing of its occurrences
//! becomes a suggested frequency and the key starts counting again from zero.
//! Keys match on exact cell equality only: centroids either side of a cell
//! boundary never merge.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use civicops_common::file_config::RecurringConfig;
use civicops_common::{
    snap_to_grid, CandidateWrite, GeoPoint, NewRecurringSuggestion, RecurringCandidate,
    RecurringSuggestion,
};

use crate::traits::TaskStore;

const MS_PER_DAY: f64 = 86_400_000.0;

const WRITE_ATTEMPTS: usize = 3;

/// Round the mean interval between consecutive occurrences to whole days,
/// never less than one. Fewer than two occurrences have no interval.
pub fn infer_frequency_days(occurrences: &[DateTime<Utc>]) -> Option<u32> {
    if occurrences.len() < 2 {
        return None;
    }
    let total_ms: i64 = occurrences
        .windows(2)
        .map(|w| (w[1] - w[0]).num_milliseconds())
        .sum();
    let mean_ms = total_ms as f64 / (occurrences.len() - 1) as f64;
    let days = (mean_ms / MS_PER_DAY).round();
    Some(if days < 1.0 { 1 } else { days as u32 })
}

/// Append an occurrence. Returns the inferred frequency and clears the
/// history once `threshold` occurrences have accumulated.
pub fn record_occurrence(
    candidate: &mut RecurringCandidate,
    at: DateTime<Utc>,
    threshold: usize,
) -> Option<u32> {
    candidate.occurrences.push(at);
    if candidate.occurrences.len() < threshold {
        return None;
    }
    let frequency = infer_frequency_days(&candidate.occurrences);
    candidate.occurrences.clear();
    frequency
}

/// Record the assignment carried by event `seq` against its candidate key
/// and emit a suggestion if the pattern is confirmed.
///
/// The candidate remembers the last event it absorbed, so redelivery of an
/// event already applied is a no-op. The candidate and its suggestion are
/// written together under a compare on that sequence; losing the compare to
/// a concurrent drain means re-reading and trying again.
pub async fn track_assignment<S: TaskStore + ?Sized>(
    store: &S,
    config: &RecurringConfig,
    seq: i64,
    issue: &str,
    center: GeoPoint,
    at: DateTime<Utc>,
) -> Result<Option<RecurringSuggestion>> {
    let cell = snap_to_grid(center, config.grid_decimals);

    for _ in 0..WRITE_ATTEMPTS {
        let existing = store.candidate(issue, cell).await?;
        let expected_last_seq = existing.as_ref().map(|c| c.last_seq);
        if expected_last_seq.is_some_and(|last| seq <= last) {
            debug!(seq, issue, "Occurrence already recorded");
            return Ok(None);
        }

        let mut candidate = existing.unwrap_or_else(|| RecurringCandidate {
            issue: issue.to_string(),
            center: cell,
            occurrences: Vec::new(),
            last_seq: 0,
        });
        let frequency = record_occurrence(&mut candidate, at, config.candidate_threshold);
        candidate.last_seq = seq;

        let new_suggestion = frequency.map(|frequency_days| NewRecurringSuggestion {
            title: issue.to_string(),
            issue: issue.to_string(),
            location: cell,
            frequency_days,
            created_at: at,
        });

        match store
            .record_candidate(&candidate, expected_last_seq, new_suggestion.as_ref())
            .await?
        {
            CandidateWrite::Saved(Some(suggestion)) => {
                info!(
                    suggestion_id = %suggestion.id,
                    issue,
                    frequency_days = suggestion.frequency_days,
                    "Recurring pattern detected"
                );
                return Ok(Some(suggestion));
            }
            CandidateWrite::Saved(None) => {
                debug!(
                    issue,
                    lat = cell.lat,
                    lng = cell.lng,
                    occurrences = candidate.occurrences.len(),
                    "Recorded recurring occurrence"
                );
                return Ok(None);
            }
            CandidateWrite::Stale => {
                debug!(seq, issue, "Candidate changed concurrently, re-reading");
            }
        }
    }

    bail!(
        "candidate {issue} at ({}, {}) kept changing concurrently",
        cell.lat,
        cell.lng
    )
}
