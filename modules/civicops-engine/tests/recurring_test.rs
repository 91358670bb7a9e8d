//! Recurring engine runs against the in-memory store.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use civicops_common::{ComplaintStatus, EngineConfig, GeoPoint, NewTask, RecurringExecution};
use civicops_engine::testing::{
    complaint, north_of, recurring_task, MockTaskStore, CONNAUGHT_PLACE, INDIA_GATE,
};
use civicops_engine::{Dispatcher, RecurringRunStats, RunLease, RunOutcome, TaskStore};
use civicops_events::MemoryEventStore;

type TestDispatcher = Dispatcher<MockTaskStore, MemoryEventStore>;

fn dispatcher() -> TestDispatcher {
    let store = MockTaskStore::new().with_worker("w1", "Ravi");
    Dispatcher::new(store, MemoryEventStore::new(), EngineConfig::default())
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 10, 6, 0, 0).unwrap()
}

fn cp() -> GeoPoint {
    GeoPoint::new(CONNAUGHT_PLACE.0, CONNAUGHT_PLACE.1)
}

fn completed(outcome: RunOutcome) -> RecurringRunStats {
    match outcome {
        RunOutcome::Completed(stats) => stats,
        RunOutcome::AlreadyRunning => panic!("expected a completed run"),
    }
}

#[tokio::test]
async fn due_task_with_no_nearby_complaints_waits_a_full_cycle() {
    let d = dispatcher();
    let now = now();
    let id = d
        .store()
        .add_recurring(recurring_task("garbage", cp(), 3, now - Duration::hours(2)));

    let stats = completed(d.run_recurring_engine(now).await);

    assert_eq!(stats.due, 1);
    assert_eq!(stats.skipped_empty, 1);
    assert_eq!(stats.tasks_created, 0);
    assert!(d.store().all_tasks().is_empty());

    let recurring = d.store().recurring(id).unwrap();
    assert_eq!(recurring.next_execution, now + Duration::days(3));
    assert_eq!(recurring.last_run, Some(now));
}

#[tokio::test]
async fn due_task_claims_nearby_pending_complaints_of_its_issue() {
    let d = dispatcher();
    let now = now();
    let mut recurring = recurring_task("garbage", cp(), 7, now);
    recurring.assigned_worker_id = Some("w1".into());
    let id = d.store().add_recurring(recurring);

    let near = d.store().add_complaint(complaint("garbage", north_of(CONNAUGHT_PLACE, 40.0), now));
    let edge = d.store().add_complaint(complaint("Garbage", north_of(CONNAUGHT_PLACE, 59.0), now));
    let far = d.store().add_complaint(complaint("garbage", north_of(CONNAUGHT_PLACE, 80.0), now));
    let other = d.store().add_complaint(complaint("pothole", cp(), now));

    let stats = completed(d.run_recurring_engine(now).await);
    assert_eq!(stats.tasks_created, 1);

    let tasks = d.store().all_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].complaint_ids, vec![near, edge]);
    assert_eq!(tasks[0].priority_score, 100);
    assert_eq!(tasks[0].issue_type, "garbage");
    assert_eq!(tasks[0].assigned_worker_id.as_deref(), Some("w1"));

    assert_eq!(d.store().complaint_status(near), Some(ComplaintStatus::Ongoing));
    assert_eq!(d.store().complaint_status(far), Some(ComplaintStatus::Pending));
    assert_eq!(d.store().complaint_status(other), Some(ComplaintStatus::Pending));
    assert_eq!(
        d.store().recurring(id).unwrap().next_execution,
        now + Duration::days(7)
    );
}

#[tokio::test]
async fn issue_agnostic_pickup_when_configured() {
    let mut config = EngineConfig::default();
    config.recurring.match_issue_type = false;
    let d = Dispatcher::new(MockTaskStore::new(), MemoryEventStore::new(), config);
    let now = now();
    d.store().add_recurring(recurring_task("garbage", cp(), 1, now));
    d.store().add_complaint(complaint("pothole", cp(), now));

    let stats = completed(d.run_recurring_engine(now).await);
    assert_eq!(stats.tasks_created, 1);
}

#[tokio::test]
async fn not_due_and_paused_tasks_are_left_alone() {
    let d = dispatcher();
    let now = now();
    let later = d
        .store()
        .add_recurring(recurring_task("garbage", cp(), 2, now + Duration::hours(1)));
    let paused = d.store().add_recurring(recurring_task("garbage", cp(), 2, now));
    d.set_recurring_active(paused, false).await.unwrap();
    d.store().add_complaint(complaint("garbage", cp(), now));

    let stats = completed(d.run_recurring_engine(now).await);
    assert_eq!(stats.scanned, 1);
    assert_eq!(stats.due, 0);
    assert!(d.store().all_tasks().is_empty());
    assert_eq!(
        d.store().recurring(later).unwrap().next_execution,
        now + Duration::hours(1)
    );

    d.set_recurring_active(paused, true).await.unwrap();
    let stats = completed(d.run_recurring_engine(now).await);
    assert_eq!(stats.tasks_created, 1);
}

#[tokio::test]
async fn second_run_never_repeats_the_same_due_instant() {
    let d = dispatcher();
    let now = now();
    d.store().add_recurring(recurring_task("garbage", cp(), 1, now));
    d.store().add_complaint(complaint("garbage", cp(), now));

    completed(d.run_recurring_engine(now).await);
    d.store().add_complaint(complaint("garbage", cp(), now));
    let stats = completed(d.run_recurring_engine(now).await);

    assert_eq!(stats.due, 0);
    assert_eq!(d.store().all_tasks().len(), 1);
}

#[tokio::test]
async fn concurrent_call_is_a_no_op() {
    let d = dispatcher();
    let now = now();
    d.store().add_recurring(recurring_task("garbage", cp(), 1, now));
    d.store().add_complaint(complaint("garbage", cp(), now));

    let gate = d.store().hold_recurring_listing();

    let (first, second) = tokio::join!(d.run_recurring_engine(now), async {
        gate.entered.notified().await;
        assert!(d.scheduler().is_running());
        let second = d.run_recurring_engine(now).await;
        gate.release.notify_one();
        second
    });

    assert_eq!(second, RunOutcome::AlreadyRunning);
    assert_eq!(completed(first).tasks_created, 1);
    assert_eq!(d.store().all_tasks().len(), 1);
    assert!(!d.scheduler().is_running());
}

#[tokio::test]
async fn one_failing_task_does_not_stop_the_others() {
    let d = dispatcher();
    let now = now();
    let india_gate = GeoPoint::new(INDIA_GATE.0, INDIA_GATE.1);

    let failing = d.store().add_recurring(recurring_task("sewage", cp(), 2, now));
    let healthy = d
        .store()
        .add_recurring(recurring_task("garbage", india_gate, 4, now));
    d.store().add_complaint(complaint("sewage", cp(), now));
    d.store().add_complaint(complaint("garbage", india_gate, now));
    d.store().fail_tasks_for_issue("sewage");

    let stats = completed(d.run_recurring_engine(now).await);
    assert_eq!(stats.due, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.tasks_created, 1);

    // Failed item keeps its schedule and is retried next run.
    assert_eq!(d.store().recurring(failing).unwrap().next_execution, now);
    assert_eq!(
        d.store().recurring(healthy).unwrap().next_execution,
        now + Duration::days(4)
    );
}

#[tokio::test]
async fn failed_execution_leaves_no_partial_work() {
    let d = dispatcher();
    let now = now();
    let id = d.store().add_recurring(recurring_task("garbage", cp(), 3, now));
    let first = d.store().add_complaint(complaint("garbage", cp(), now));

    d.store().fail_next_recurring_execution();
    let stats = completed(d.run_recurring_engine(now).await);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.tasks_created, 0);

    // Nothing claimed, nothing advanced.
    assert!(d.store().all_tasks().is_empty());
    assert_eq!(d.store().complaint_status(first), Some(ComplaintStatus::Pending));
    let recurring = d.store().recurring(id).unwrap();
    assert_eq!(recurring.next_execution, now);
    assert_eq!(recurring.last_run, None);

    // Retry picks up everything pending, once.
    let second = d.store().add_complaint(complaint("garbage", cp(), now));
    let stats = completed(d.run_recurring_engine(now).await);
    assert_eq!(stats.tasks_created, 1);
    let tasks = d.store().all_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].complaint_ids, vec![first, second]);
    assert_eq!(
        d.store().recurring(id).unwrap().next_execution,
        now + Duration::days(3)
    );

    let stats = completed(d.run_recurring_engine(now).await);
    assert_eq!(stats.due, 0);
    assert_eq!(d.store().all_tasks().len(), 1);
}

#[tokio::test]
async fn execution_against_a_moved_schedule_writes_nothing() {
    let d = dispatcher();
    let now = now();
    let id = d.store().add_recurring(recurring_task("garbage", cp(), 2, now));
    let pending = d.store().add_complaint(complaint("garbage", cp(), now));

    let task = NewTask {
        issue_type: "garbage".into(),
        complaint_ids: vec![pending],
        center: cp(),
        priority_score: 100,
        assigned_worker_id: None,
        created_at: now,
    };
    let seen = now - Duration::days(2);
    let result = d
        .store()
        .execute_recurring(id, seen, Some(&task), now + Duration::days(2), now)
        .await
        .unwrap();

    assert_eq!(result, RecurringExecution::Stale);
    assert!(d.store().all_tasks().is_empty());
    assert_eq!(d.store().complaint_status(pending), Some(ComplaintStatus::Pending));
    assert_eq!(d.store().recurring(id).unwrap().next_execution, now);
}

#[tokio::test]
async fn listing_failure_is_swallowed_and_guard_released() {
    let d = dispatcher();
    let now = now();
    d.store().add_recurring(recurring_task("garbage", cp(), 1, now));
    d.store().fail_recurring_listing(true);

    let stats = completed(d.run_recurring_engine(now).await);
    assert_eq!(stats, RecurringRunStats::default());
    assert!(!d.scheduler().is_running());

    d.store().fail_recurring_listing(false);
    let stats = completed(d.run_recurring_engine(now).await);
    assert_eq!(stats.due, 1);
}

struct HeldElsewhere;

#[async_trait]
impl RunLease for HeldElsewhere {
    async fn acquire(&self) -> Result<bool> {
        Ok(false)
    }

    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn lease_held_by_another_instance_skips_run() {
    let d = dispatcher().with_lease(Arc::new(HeldElsewhere));
    let now = now();
    let id = d.store().add_recurring(recurring_task("garbage", cp(), 1, now));

    assert_eq!(d.run_recurring_engine(now).await, RunOutcome::AlreadyRunning);
    assert_eq!(d.store().recurring(id).unwrap().next_execution, now);
    assert!(!d.scheduler().is_running());
}

#[tokio::test]
async fn frequency_change_keeps_scheduled_instant() {
    let d = dispatcher();
    let now = now();
    let next = now + Duration::days(2);
    let id = d.store().add_recurring(recurring_task("garbage", cp(), 2, next));

    d.set_recurring_frequency(id, 9).await.unwrap();
    d.set_recurring_worker(id, Some("w1")).await.unwrap();

    let recurring = d.store().recurring_task(id).await.unwrap().unwrap();
    assert_eq!(recurring.frequency_days, 9);
    assert_eq!(recurring.next_execution, next);
    assert_eq!(recurring.assigned_worker_id.as_deref(), Some("w1"));

    assert!(d.set_recurring_frequency(id, 0).await.is_err());
    assert!(d.set_recurring_worker(id, Some("nobody")).await.is_err());

    d.delete_recurring_task(id).await.unwrap();
    assert!(d.delete_recurring_task(id).await.is_err());
    assert_eq!(d.dashboard_stats().await.unwrap().active_recurring, 0);
}
