use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{JobStore, StoreError};
use crate::models::job::JobRecord;

/// Job records stored as JSONB rows in `job_records`.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode(value: serde_json::Value) -> Result<JobRecord, StoreError> {
    Ok(serde_json::from_value(value)?)
}

#[async_trait]
impl JobStore for PgJobStore {
    /// Get a job by ID
    async fn load(&self, job_id: Uuid) -> Result<JobRecord, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT record
            FROM job_records
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => decode(r.try_get("record")?),
            None => Err(StoreError::NotFound(job_id)),
        }
    }

    /// Insert or replace a job record in a single statement
    async fn save(&self, job_id: Uuid, record: &JobRecord) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;

        sqlx::query(
            r#"
            INSERT INTO job_records (id, status, record)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                record = EXCLUDED.record,
                updated_at = NOW()
            "#,
        )
        .bind(job_id)
        .bind(record.status.to_string())
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recently updated job
    async fn latest(&self) -> Result<Option<(Uuid, JobRecord)>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, record
            FROM job_records
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some((r.try_get("id")?, decode(r.try_get("record")?)?))),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
