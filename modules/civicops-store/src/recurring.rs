use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use civicops_common::{
    CandidateWrite, CivicOpsError, GeoPoint, NewRecurringSuggestion, NewRecurringTask, NewTask,
    RecurringCandidate, RecurringExecution, RecurringSuggestion, RecurringTask, RecurringTaskPatch,
};

use crate::tasks::claim_and_insert_task;
use crate::PgStore;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct RecurringTaskRow {
    id: Uuid,
    title: String,
    issue: String,
    location_lat: f64,
    location_lng: f64,
    frequency_days: i32,
    assigned_worker_id: Option<String>,
    next_execution: DateTime<Utc>,
    active: bool,
    last_run: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<RecurringTaskRow> for RecurringTask {
    fn from(row: RecurringTaskRow) -> Self {
        RecurringTask {
            id: row.id,
            title: row.title,
            issue: row.issue,
            location: GeoPoint::new(row.location_lat, row.location_lng),
            frequency_days: row.frequency_days.max(1) as u32,
            assigned_worker_id: row.assigned_worker_id,
            next_execution: row.next_execution,
            active: row.active,
            last_run: row.last_run,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SuggestionRow {
    id: Uuid,
    title: String,
    issue: String,
    location_lat: f64,
    location_lng: f64,
    frequency_days: i32,
    created_at: DateTime<Utc>,
}

impl From<SuggestionRow> for RecurringSuggestion {
    fn from(row: SuggestionRow) -> Self {
        RecurringSuggestion {
            id: row.id,
            title: row.title,
            issue: row.issue,
            location: GeoPoint::new(row.location_lat, row.location_lng),
            frequency_days: row.frequency_days.max(1) as u32,
            created_at: row.created_at,
        }
    }
}

const RECURRING_COLUMNS: &str = "id, title, issue, location_lat, location_lng, frequency_days, \
                                 assigned_worker_id, next_execution, active, last_run, created_at";

const SUGGESTION_COLUMNS: &str =
    "id, title, issue, location_lat, location_lng, frequency_days, created_at";

fn days_to_i32(days: u32) -> Result<i32> {
    i32::try_from(days)
        .map_err(|_| CivicOpsError::Validation(format!("frequency_days out of range: {days}")).into())
}

// ---------------------------------------------------------------------------
// Recurring tasks
// ---------------------------------------------------------------------------

impl PgStore {
    pub async fn insert_recurring_task(&self, new: &NewRecurringTask) -> Result<RecurringTask> {
        let row = sqlx::query_as::<_, RecurringTaskRow>(&format!(
            r#"
            INSERT INTO recurring_tasks (title, issue, location_lat, location_lng, frequency_days,
                                         assigned_worker_id, next_execution, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, true, $8)
            RETURNING {RECURRING_COLUMNS}
            "#
        ))
        .bind(&new.title)
        .bind(&new.issue)
        .bind(new.location.lat)
        .bind(new.location.lng)
        .bind(days_to_i32(new.frequency_days)?)
        .bind(&new.assigned_worker_id)
        .bind(new.next_execution)
        .bind(new.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    /// Active recurring tasks in creation order.
    pub async fn active_recurring_tasks(&self) -> Result<Vec<RecurringTask>> {
        let rows = sqlx::query_as::<_, RecurringTaskRow>(&format!(
            "SELECT {RECURRING_COLUMNS} FROM recurring_tasks WHERE active = true ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RecurringTask::from).collect())
    }

    pub async fn recurring_tasks(&self) -> Result<Vec<RecurringTask>> {
        let rows = sqlx::query_as::<_, RecurringTaskRow>(&format!(
            "SELECT {RECURRING_COLUMNS} FROM recurring_tasks ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RecurringTask::from).collect())
    }

    pub async fn recurring_task(&self, id: Uuid) -> Result<Option<RecurringTask>> {
        let row = sqlx::query_as::<_, RecurringTaskRow>(&format!(
            "SELECT {RECURRING_COLUMNS} FROM recurring_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RecurringTask::from))
    }

    /// Run one due instant: advance the schedule from `expected_next` and,
    /// when `task` is given, claim its complaints and insert it, all in one
    /// transaction. Returns `Stale` without writing if the schedule no longer
    /// reads `expected_next` (another run got there first or it was paused).
    pub async fn execute_recurring(
        &self,
        id: Uuid,
        expected_next: DateTime<Utc>,
        task: Option<&NewTask>,
        next_execution: DateTime<Utc>,
        last_run: DateTime<Utc>,
    ) -> Result<RecurringExecution> {
        let mut tx = self.pool.begin().await?;

        // Row lock first so a racing run blocks here and then sees the new instant.
        let advanced = sqlx::query(
            r#"
            UPDATE recurring_tasks
            SET next_execution = $3, last_run = $4
            WHERE id = $1 AND next_execution = $2 AND active = true
            "#,
        )
        .bind(id)
        .bind(expected_next)
        .bind(next_execution)
        .bind(last_run)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if advanced == 0 {
            tx.rollback().await?;
            return Ok(RecurringExecution::Stale);
        }

        let task = match task {
            Some(new) => Some(claim_and_insert_task(&mut *tx, new).await?),
            None => None,
        };

        tx.commit().await?;
        Ok(RecurringExecution::Advanced(task))
    }

    pub async fn update_recurring_task(&self, id: Uuid, patch: &RecurringTaskPatch) -> Result<bool> {
        let frequency = patch.frequency_days.map(days_to_i32).transpose()?;
        let (set_worker, worker) = match &patch.assigned_worker_id {
            Some(w) => (true, w.clone()),
            None => (false, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE recurring_tasks
            SET active = COALESCE($2, active),
                frequency_days = COALESCE($3, frequency_days),
                assigned_worker_id = CASE WHEN $4 THEN $5 ELSE assigned_worker_id END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patch.active)
        .bind(frequency)
        .bind(set_worker)
        .bind(worker)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_recurring_task(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recurring_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_active_recurring_tasks(&self) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM recurring_tasks WHERE active = true",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    // -----------------------------------------------------------------------
    // Candidates
    // -----------------------------------------------------------------------

    /// Look up a candidate by exact (issue, snapped center) key.
    pub async fn candidate(&self, issue: &str, center: GeoPoint) -> Result<Option<RecurringCandidate>> {
        let row = sqlx::query_as::<_, (String, f64, f64, Vec<DateTime<Utc>>, i64)>(
            r#"
            SELECT issue, center_lat, center_lng, occurrences, last_seq
            FROM recurring_candidates
            WHERE issue = $1 AND center_lat = $2 AND center_lng = $3
            "#,
        )
        .bind(issue)
        .bind(center.lat)
        .bind(center.lng)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(issue, lat, lng, occurrences, last_seq)| RecurringCandidate {
            issue,
            center: GeoPoint::new(lat, lng),
            occurrences,
            last_seq,
        }))
    }

    /// Save a candidate and the suggestion it produced in one transaction.
    ///
    /// `expected_last_seq` is the `last_seq` the caller read, or `None` if the
    /// candidate did not exist. If the stored row no longer matches, nothing
    /// is written and `Stale` is returned.
    pub async fn record_candidate(
        &self,
        candidate: &RecurringCandidate,
        expected_last_seq: Option<i64>,
        suggestion: Option<&NewRecurringSuggestion>,
    ) -> Result<CandidateWrite> {
        let mut tx = self.pool.begin().await?;

        let written = match expected_last_seq {
            None => sqlx::query(
                r#"
                INSERT INTO recurring_candidates (issue, center_lat, center_lng, occurrences, last_seq, updated_at)
                VALUES ($1, $2, $3, $4, $5, now())
                ON CONFLICT (issue, center_lat, center_lng) DO NOTHING
                "#,
            )
            .bind(&candidate.issue)
            .bind(candidate.center.lat)
            .bind(candidate.center.lng)
            .bind(&candidate.occurrences)
            .bind(candidate.last_seq)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            Some(expected) => sqlx::query(
                r#"
                UPDATE recurring_candidates
                SET occurrences = $4, last_seq = $5, updated_at = now()
                WHERE issue = $1 AND center_lat = $2 AND center_lng = $3 AND last_seq = $6
                "#,
            )
            .bind(&candidate.issue)
            .bind(candidate.center.lat)
            .bind(candidate.center.lng)
            .bind(&candidate.occurrences)
            .bind(candidate.last_seq)
            .bind(expected)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
        };

        if written == 0 {
            tx.rollback().await?;
            return Ok(CandidateWrite::Stale);
        }

        let suggestion = match suggestion {
            Some(new) => {
                let row = sqlx::query_as::<_, SuggestionRow>(&format!(
                    r#"
                    INSERT INTO recurring_suggestions (title, issue, location_lat, location_lng, frequency_days, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING {SUGGESTION_COLUMNS}
                    "#
                ))
                .bind(&new.title)
                .bind(&new.issue)
                .bind(new.location.lat)
                .bind(new.location.lng)
                .bind(days_to_i32(new.frequency_days)?)
                .bind(new.created_at)
                .fetch_one(&mut *tx)
                .await?;
                Some(RecurringSuggestion::from(row))
            }
            None => None,
        };

        tx.commit().await?;
        Ok(CandidateWrite::Saved(suggestion))
    }

    // -----------------------------------------------------------------------
    // Suggestions
    // -----------------------------------------------------------------------

    pub async fn suggestions(&self) -> Result<Vec<RecurringSuggestion>> {
        let rows = sqlx::query_as::<_, SuggestionRow>(&format!(
            "SELECT {SUGGESTION_COLUMNS} FROM recurring_suggestions ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RecurringSuggestion::from).collect())
    }

    pub async fn suggestion(&self, id: Uuid) -> Result<Option<RecurringSuggestion>> {
        let row = sqlx::query_as::<_, SuggestionRow>(&format!(
            "SELECT {SUGGESTION_COLUMNS} FROM recurring_suggestions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RecurringSuggestion::from))
    }

    /// Create the recurring task and remove the suggestion it came from in
    /// one transaction, so a suggestion can only be promoted once.
    pub async fn promote_suggestion(
        &self,
        suggestion_id: Uuid,
        new: &NewRecurringTask,
    ) -> Result<RecurringTask> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM recurring_suggestions WHERE id = $1")
            .bind(suggestion_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            tx.rollback().await?;
            return Err(CivicOpsError::not_found("recurring suggestion", suggestion_id).into());
        }

        let row = sqlx::query_as::<_, RecurringTaskRow>(&format!(
            r#"
            INSERT INTO recurring_tasks (title, issue, location_lat, location_lng, frequency_days,
                                         assigned_worker_id, next_execution, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, true, $8)
            RETURNING {RECURRING_COLUMNS}
            "#
        ))
        .bind(&new.title)
        .bind(&new.issue)
        .bind(new.location.lat)
        .bind(new.location.lng)
        .bind(days_to_i32(new.frequency_days)?)
        .bind(&new.assigned_worker_id)
        .bind(new.next_execution)
        .bind(new.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }
}
