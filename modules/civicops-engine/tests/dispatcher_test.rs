//! Dispatcher behaviour against the in-memory store and event log.

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};

use civicops_common::{CivicOpsError, ComplaintStatus, EngineConfig, GeoPoint, TaskStatus};
use civicops_engine::testing::{complaint, north_of, MockTaskStore, CONNAUGHT_PLACE, INDIA_GATE};
use civicops_engine::{Dispatcher, TaskStore};
use civicops_events::MemoryEventStore;

type TestDispatcher = Dispatcher<MockTaskStore, MemoryEventStore>;

fn dispatcher() -> TestDispatcher {
    let store = MockTaskStore::new()
        .with_worker("w1", "Ravi")
        .with_worker("w2", "Meena");
    Dispatcher::new(store, MemoryEventStore::new(), EngineConfig::default())
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
}

fn cp() -> GeoPoint {
    GeoPoint::new(CONNAUGHT_PLACE.0, CONNAUGHT_PLACE.1)
}

fn error_kind(result: Result<impl std::fmt::Debug>) -> CivicOpsError {
    let err = result.unwrap_err();
    match err.downcast::<CivicOpsError>() {
        Ok(e) => e,
        Err(other) => panic!("expected CivicOpsError, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Suggestions & assignment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn suggested_tasks_cover_only_pending_complaints() {
    let d = dispatcher();
    let now = t0();
    let a = d.store().add_complaint(complaint("garbage", cp(), now - Duration::hours(30)));
    d.store().add_complaint(complaint("garbage", north_of(CONNAUGHT_PLACE, 20.0), now));
    let done = d.store().add_complaint(complaint("garbage", cp(), now));
    d.set_complaint_status(done, ComplaintStatus::Completed).await.unwrap();

    let candidates = d.suggested_tasks(now).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].complaint_ids.len(), 2);
    assert_eq!(candidates[0].complaint_ids[0], a);
    // 3 * 10 + 2 * 3 + 3
    assert_eq!(candidates[0].priority_score, 39);
}

#[tokio::test]
async fn assign_persists_task_and_claims_complaints() {
    let d = dispatcher();
    let now = t0();
    let a = d.store().add_complaint(complaint("pothole", cp(), now));
    let b = d.store().add_complaint(complaint("pothole", north_of(CONNAUGHT_PLACE, 30.0), now));

    let candidates = d.suggested_tasks(now).await.unwrap();
    let task = d.assign_task(&candidates[0], "w1", now).await.unwrap();

    assert_eq!(task.status, TaskStatus::Ongoing);
    assert_eq!(task.assigned_worker_id.as_deref(), Some("w1"));
    assert_eq!(task.priority_score, candidates[0].priority_score);
    assert_eq!(d.store().complaint_status(a), Some(ComplaintStatus::Ongoing));
    assert_eq!(d.store().complaint_status(b), Some(ComplaintStatus::Ongoing));
    assert!(d.suggested_tasks(now).await.unwrap().is_empty());

    let events = d.events().events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "task:assigned");
}

#[tokio::test]
async fn assign_rejects_missing_worker_and_empty_candidate() {
    let d = dispatcher();
    let now = t0();
    d.store().add_complaint(complaint("garbage", cp(), now));
    let candidate = d.suggested_tasks(now).await.unwrap().remove(0);

    assert!(matches!(
        error_kind(d.assign_task(&candidate, "  ", now).await),
        CivicOpsError::Validation(_)
    ));
    assert!(matches!(
        error_kind(d.assign_task(&candidate, "w9", now).await),
        CivicOpsError::NotFound { kind: "worker", .. }
    ));

    let empty = civicops_common::CandidateTask {
        complaint_ids: Vec::new(),
        ..candidate.clone()
    };
    assert!(matches!(
        error_kind(d.assign_task(&empty, "w1", now).await),
        CivicOpsError::Validation(_)
    ));

    assert!(d.store().all_tasks().is_empty());
}

#[tokio::test]
async fn complaint_cannot_join_two_tasks() {
    let d = dispatcher();
    let now = t0();
    d.store().add_complaint(complaint("garbage", cp(), now));
    let candidate = d.suggested_tasks(now).await.unwrap().remove(0);

    d.assign_task(&candidate, "w1", now).await.unwrap();
    assert!(d.assign_task(&candidate, "w2", now).await.is_err());
    assert_eq!(d.store().all_tasks().len(), 1);
}

#[tokio::test]
async fn event_log_failure_does_not_block_assignment() {
    let d = dispatcher();
    let now = t0();
    let id = d.store().add_complaint(complaint("garbage", cp(), now));
    d.events().fail_appends(true);

    let candidate = d.suggested_tasks(now).await.unwrap().remove(0);
    let task = d.assign_task(&candidate, "w1", now).await.unwrap();

    assert_eq!(task.complaint_ids, vec![id]);
    assert!(d.events().events().await.is_empty());
}

#[tokio::test]
async fn tracking_failure_does_not_block_assignment_and_recovers() {
    let d = dispatcher();
    let now = t0();
    d.store().add_complaint(complaint("garbage", cp(), now));
    d.store().fail_candidate_writes(true);

    let candidate = d.suggested_tasks(now).await.unwrap().remove(0);
    d.assign_task(&candidate, "w1", now).await.unwrap();

    let cell = GeoPoint::new(28.6315, 77.2167);
    assert!(d.store().candidate("garbage", cell).await.unwrap().is_none());

    d.store().fail_candidate_writes(false);
    assert_eq!(d.drain_outbox().await.unwrap(), 1);
    let tracked = d.store().candidate("garbage", cell).await.unwrap().unwrap();
    assert_eq!(tracked.occurrences, vec![now]);
}

#[tokio::test]
async fn assign_suggested_matches_exact_member_set() {
    let d = dispatcher();
    let now = t0();
    let a = d.store().add_complaint(complaint("garbage", cp(), now));
    let b = d.store().add_complaint(complaint("garbage", north_of(CONNAUGHT_PLACE, 10.0), now));

    assert!(d.assign_suggested(&[a], "w1", now).await.is_err());
    let task = d.assign_suggested(&[b, a], "w1", now).await.unwrap();
    assert_eq!(task.complaint_ids, vec![a, b]);
}

// ---------------------------------------------------------------------------
// Recurring detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_assignments_at_one_spot_suggest_a_six_day_cadence() {
    let d = dispatcher();
    let start = t0();
    let spot = GeoPoint::new(28.63151, 77.21672);

    for offset_ms in [0_i64, 432_000_000, 1_036_800_000] {
        let at = start + Duration::milliseconds(offset_ms);
        d.store().add_complaint(complaint("garbage", spot, at));
        let candidate = d.suggested_tasks(at).await.unwrap().remove(0);
        d.assign_task(&candidate, "w1", at).await.unwrap();
    }

    let suggestions = d.store().suggestions().await.unwrap();
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].frequency_days, 6);
    assert_eq!(suggestions[0].issue, "garbage");
    assert_eq!(suggestions[0].location, GeoPoint::new(28.6315, 77.2167));

    let candidate = d
        .store()
        .candidate("garbage", GeoPoint::new(28.6315, 77.2167))
        .await
        .unwrap()
        .unwrap();
    assert!(candidate.occurrences.is_empty());
}

#[tokio::test]
async fn different_grid_cells_are_tracked_separately() {
    let d = dispatcher();
    let start = t0();

    for (i, dlat) in [0.0, 0.0003, 0.0006].into_iter().enumerate() {
        let at = start + Duration::days(i as i64 * 3);
        let spot = GeoPoint::new(28.6315 + dlat, 77.2167);
        d.store().add_complaint(complaint("garbage", spot, at));
        let candidate = d.suggested_tasks(at).await.unwrap().remove(0);
        d.assign_task(&candidate, "w1", at).await.unwrap();
    }

    assert!(d.store().suggestions().await.unwrap().is_empty());
}

#[tokio::test]
async fn promotion_schedules_first_run_and_consumes_suggestion() {
    let d = dispatcher();
    let start = t0();
    for days in [0, 7, 14] {
        let at = start + Duration::days(days);
        d.store().add_complaint(complaint("drainage", cp(), at));
        let candidate = d.suggested_tasks(at).await.unwrap().remove(0);
        d.assign_task(&candidate, "w1", at).await.unwrap();
    }
    let suggestion = d.store().suggestions().await.unwrap().remove(0);
    assert_eq!(suggestion.frequency_days, 7);

    let now = start + Duration::days(15);
    assert!(matches!(
        error_kind(d.convert_suggestion_to_recurring_task(&suggestion, 0, None, now).await),
        CivicOpsError::Validation(_)
    ));

    assert!(d
        .promote_suggestion(suggestion.id, 5, Some("nobody"), now)
        .await
        .is_err());

    let recurring = d
        .promote_suggestion(suggestion.id, 5, Some("w2"), now)
        .await
        .unwrap();
    assert_eq!(recurring.title, "drainage");
    assert_eq!(recurring.frequency_days, 5);
    assert_eq!(recurring.next_execution, now + Duration::days(5));
    assert_eq!(recurring.assigned_worker_id.as_deref(), Some("w2"));
    assert!(recurring.active);
    assert!(recurring.last_run.is_none());
    assert!(d.recurring_suggestions().await.unwrap().is_empty());
    assert_eq!(d.recurring_tasks().await.unwrap().len(), 1);

    assert!(d
        .convert_suggestion_to_recurring_task(&suggestion, 5, None, now)
        .await
        .is_err());
}

// ---------------------------------------------------------------------------
// Lifecycle & maintenance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn complete_and_cancel_move_complaints() {
    let d = dispatcher();
    let now = t0();
    let a = d.store().add_complaint(complaint("garbage", cp(), now));
    let b = d.store().add_complaint(complaint("pothole", GeoPoint::new(INDIA_GATE.0, INDIA_GATE.1), now));

    let candidates = d.suggested_tasks(now).await.unwrap();
    let first = d.assign_task(&candidates[0], "w1", now).await.unwrap();
    let second = d.assign_task(&candidates[1], "w2", now).await.unwrap();

    d.complete_task(first.id).await.unwrap();
    d.cancel_task(second.id).await.unwrap();

    let completed = if first.complaint_ids[0] == a { a } else { b };
    let returned = if completed == a { b } else { a };
    assert_eq!(d.store().complaint_status(completed), Some(ComplaintStatus::Completed));
    assert_eq!(d.store().complaint_status(returned), Some(ComplaintStatus::Pending));

    let again = d.suggested_tasks(now).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].complaint_ids, vec![returned]);

    assert!(matches!(
        error_kind(d.complete_task(first.id).await),
        CivicOpsError::Validation(_)
    ));
    assert!(matches!(
        error_kind(d.cancel_task(uuid::Uuid::new_v4()).await),
        CivicOpsError::NotFound { kind: "task", .. }
    ));
}

#[tokio::test]
async fn reassign_changes_worker_of_ongoing_task() {
    let d = dispatcher();
    let now = t0();
    d.store().add_complaint(complaint("garbage", cp(), now));
    let candidate = d.suggested_tasks(now).await.unwrap().remove(0);
    let task = d.assign_task(&candidate, "w1", now).await.unwrap();

    let updated = d.reassign_task(task.id, "w2").await.unwrap();
    assert_eq!(updated.assigned_worker_id.as_deref(), Some("w2"));
    assert_eq!(
        d.store().task(task.id).await.unwrap().unwrap().assigned_worker_id.as_deref(),
        Some("w2")
    );
    assert!(d.reassign_task(task.id, "w9").await.is_err());
}

#[tokio::test]
async fn dashboard_counts_and_purge() {
    let d = dispatcher();
    let now = t0();
    d.store().add_complaint(complaint("garbage", cp(), now));
    d.store().add_complaint(complaint("pothole", cp(), now));
    let third = d.store().add_complaint(complaint("streetlight", cp(), now));
    d.set_complaint_status(third, ComplaintStatus::Completed).await.unwrap();

    let candidate = d.suggested_tasks(now).await.unwrap().remove(0);
    d.assign_task(&candidate, "w1", now).await.unwrap();

    let stats = d.dashboard_stats().await.unwrap();
    assert_eq!(stats.total_complaints, 3);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.ongoing, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.ongoing_tasks, 1);
    assert_eq!(stats.active_recurring, 0);

    assert_eq!(d.purge_completed_complaints().await.unwrap(), 1);
    assert_eq!(d.dashboard_stats().await.unwrap().total_complaints, 2);

    let pending = d.suggested_tasks(now).await.unwrap().remove(0).complaint_ids[0];
    d.delete_complaint(pending).await.unwrap();
    assert!(d.delete_complaint(pending).await.is_err());
    assert_eq!(d.dashboard_stats().await.unwrap().pending, 0);

    assert!(matches!(
        error_kind(d.set_complaint_status(uuid::Uuid::new_v4(), ComplaintStatus::Pending).await),
        CivicOpsError::NotFound { .. }
    ));
}
