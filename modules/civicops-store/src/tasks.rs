use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::warn;
use uuid::Uuid;

use civicops_common::{CivicOpsError, ComplaintStatus, GeoPoint, NewTask, Task, TaskStatus, WorkerId};

use crate::PgStore;

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    issue_type: String,
    complaints: Vec<Uuid>,
    center_lat: f64,
    center_lng: f64,
    priority_score: i64,
    assigned_worker_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = CivicOpsError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: row.id,
            issue_type: row.issue_type,
            complaint_ids: row.complaints,
            center: GeoPoint::new(row.center_lat, row.center_lng),
            priority_score: row.priority_score,
            assigned_worker_id: row.assigned_worker_id,
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

const TASK_COLUMNS: &str = "id, issue_type, complaints, center_lat, center_lng, priority_score, \
                            assigned_worker_id, status, created_at";

/// Move the task's complaints from pending to ongoing and insert the task on
/// `conn`. Errors without claiming anything if a complaint is no longer
/// pending; the caller's transaction must then be dropped.
pub(crate) async fn claim_and_insert_task(conn: &mut PgConnection, new: &NewTask) -> Result<Task> {
    let claimed = sqlx::query(
        "UPDATE complaints SET status = 'ongoing' WHERE id = ANY($1) AND status = 'pending'",
    )
    .bind(&new.complaint_ids)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if claimed != new.complaint_ids.len() as u64 {
        warn!(
            expected = new.complaint_ids.len(),
            claimed, "Task creation aborted: complaints no longer pending"
        );
        return Err(CivicOpsError::Validation(format!(
            "{} of {} complaints are no longer pending",
            new.complaint_ids.len() as u64 - claimed,
            new.complaint_ids.len()
        ))
        .into());
    }

    let row = sqlx::query_as::<_, TaskRow>(&format!(
        r#"
        INSERT INTO tasks (issue_type, complaints, center_lat, center_lng, priority_score,
                           assigned_worker_id, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, 'ongoing', $7)
        RETURNING {TASK_COLUMNS}
        "#
    ))
    .bind(&new.issue_type)
    .bind(&new.complaint_ids)
    .bind(new.center.lat)
    .bind(new.center.lng)
    .bind(new.priority_score)
    .bind(&new.assigned_worker_id)
    .bind(new.created_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.try_into()?)
}

impl PgStore {
    /// Insert an ongoing task and move its complaints from pending to ongoing
    /// in one transaction. Fails without writing anything if any member
    /// complaint is no longer pending, so a complaint never joins two active tasks.
    pub async fn create_task_claiming_complaints(&self, new: &NewTask) -> Result<Task> {
        let mut tx = self.pool.begin().await?;
        let task = claim_and_insert_task(&mut *tx, new).await?;
        tx.commit().await?;
        Ok(task)
    }

    pub async fn task(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Task::try_from(r).map_err(Into::into)).transpose()
    }

    pub async fn tasks_with_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = $1 ORDER BY priority_score DESC, created_at"
        ))
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| Task::try_from(r).map_err(Into::into))
            .collect()
    }

    pub async fn set_task_worker(&self, id: Uuid, worker_id: &WorkerId) -> Result<bool> {
        let result = sqlx::query("UPDATE tasks SET assigned_worker_id = $2 WHERE id = $1")
            .bind(id)
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move an ongoing task to a terminal status and set its complaints to
    /// `complaint_status` in one transaction. Returns false if the task was
    /// not ongoing (or does not exist), in which case nothing is written.
    pub async fn close_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        complaint_status: ComplaintStatus,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let closed = sqlx::query_as::<_, (Vec<Uuid>,)>(
            "UPDATE tasks SET status = $2 WHERE id = $1 AND status = 'ongoing' RETURNING complaints",
        )
        .bind(id)
        .bind(status.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((complaints,)) = closed else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query("UPDATE complaints SET status = $2 WHERE id = ANY($1)")
            .bind(&complaints)
            .bind(complaint_status.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}
