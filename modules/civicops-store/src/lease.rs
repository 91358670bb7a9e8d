use anyhow::Result;
use tracing::info;

use crate::PgStore;

impl PgStore {
    /// Acquire a named lease. Returns false if another holder has it.
    /// Reclaims leases older than `ttl_minutes` left behind by killed processes.
    pub async fn try_acquire_lease(&self, name: &str, holder: &str, ttl_minutes: i64) -> Result<bool> {
        let stale = sqlx::query(
            "DELETE FROM scheduler_leases WHERE name = $1 AND acquired_at < now() - make_interval(mins => $2::int)",
        )
        .bind(name)
        .bind(ttl_minutes)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if stale > 0 {
            info!(lease = name, "Reclaimed stale lease");
        }

        // Atomic check-and-create
        let row = sqlx::query_as::<_, (String,)>(
            r#"
            INSERT INTO scheduler_leases (name, holder, acquired_at)
            VALUES ($1, $2, now())
            ON CONFLICT (name) DO NOTHING
            RETURNING holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    /// Release a lease held by `holder`. Releasing someone else's lease is a no-op.
    pub async fn release_lease(&self, name: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM scheduler_leases WHERE name = $1 AND holder = $2")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
