use anyhow::Result;

use civicops_common::Worker;

use crate::PgStore;

#[derive(sqlx::FromRow)]
struct WorkerRow {
    id: String,
    name: String,
    phone: String,
}

impl From<WorkerRow> for Worker {
    fn from(row: WorkerRow) -> Self {
        Worker {
            id: row.id,
            name: row.name,
            phone: row.phone,
        }
    }
}

impl PgStore {
    pub async fn workers(&self) -> Result<Vec<Worker>> {
        let rows = sqlx::query_as::<_, WorkerRow>("SELECT id, name, phone FROM workers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Worker::from).collect())
    }

    pub async fn worker(&self, id: &str) -> Result<Option<Worker>> {
        let row = sqlx::query_as::<_, WorkerRow>("SELECT id, name, phone FROM workers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Worker::from))
    }

    pub async fn upsert_worker(&self, worker: &Worker) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (id, name, phone) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, phone = EXCLUDED.phone
            "#,
        )
        .bind(&worker.id)
        .bind(&worker.name)
        .bind(&worker.phone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
