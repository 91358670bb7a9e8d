use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use civicops_common::{CivicOpsError, Complaint, ComplaintStatus, GeoPoint, NewComplaint};

use crate::PgStore;

#[derive(sqlx::FromRow)]
struct ComplaintRow {
    id: Uuid,
    issue: String,
    address: String,
    landmark: String,
    latitude: f64,
    longitude: f64,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ComplaintRow> for Complaint {
    type Error = CivicOpsError;

    fn try_from(row: ComplaintRow) -> Result<Self, Self::Error> {
        Ok(Complaint {
            id: row.id,
            issue: row.issue,
            address: row.address,
            landmark: row.landmark,
            location: GeoPoint::new(row.latitude, row.longitude),
            status: row.status.parse()?,
            created_at: row.created_at,
        })
    }
}

fn into_complaints(rows: Vec<ComplaintRow>) -> Result<Vec<Complaint>> {
    rows.into_iter()
        .map(|r| Complaint::try_from(r).map_err(Into::into))
        .collect()
}

const COMPLAINT_COLUMNS: &str =
    "id, issue, address, landmark, latitude, longitude, status, created_at";

impl PgStore {
    pub async fn insert_complaint(&self, new: &NewComplaint) -> Result<Complaint> {
        let row = sqlx::query_as::<_, ComplaintRow>(&format!(
            r#"
            INSERT INTO complaints (issue, address, landmark, latitude, longitude, status, created_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6)
            RETURNING {COMPLAINT_COLUMNS}
            "#
        ))
        .bind(&new.issue)
        .bind(&new.address)
        .bind(&new.landmark)
        .bind(new.location.lat)
        .bind(new.location.lng)
        .bind(new.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_into()?)
    }

    /// Pending complaints in insertion order. Clustering is order-dependent,
    /// so the order must be stable between calls.
    pub async fn pending_complaints(&self) -> Result<Vec<Complaint>> {
        self.complaints_with_status(ComplaintStatus::Pending).await
    }

    pub async fn complaints_with_status(&self, status: ComplaintStatus) -> Result<Vec<Complaint>> {
        let rows = sqlx::query_as::<_, ComplaintRow>(&format!(
            "SELECT {COMPLAINT_COLUMNS} FROM complaints WHERE status = $1 ORDER BY created_at, id"
        ))
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;

        into_complaints(rows)
    }

    pub async fn complaint(&self, id: Uuid) -> Result<Option<Complaint>> {
        let row = sqlx::query_as::<_, ComplaintRow>(&format!(
            "SELECT {COMPLAINT_COLUMNS} FROM complaints WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Complaint::try_from(r).map_err(Into::into))
            .transpose()
    }

    /// Returns the number of complaints updated.
    pub async fn set_complaint_statuses(&self, ids: &[Uuid], status: ComplaintStatus) -> Result<u64> {
        let result = sqlx::query("UPDATE complaints SET status = $2 WHERE id = ANY($1)")
            .bind(ids)
            .bind(status.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_complaint(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM complaints WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_completed_complaints(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM complaints WHERE status = 'completed'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_complaints_by_status(&self) -> Result<Vec<(ComplaintStatus, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM complaints GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(status, n)| Ok((status.parse::<ComplaintStatus>()?, n)))
            .collect()
    }
}
