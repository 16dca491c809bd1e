use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{ExportFormat, ExportJob, ExportState, NewExportJob, TransactionFilter};
use crate::store::{ExportJobRepository, StoreError};

#[derive(Debug, Clone)]
pub struct PgExportJobRepository {
    pool: PgPool,
}

impl PgExportJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, partner_id, format, filters, state, row_count, file_key, \
     error_message, created_at, started_at, completed_at";

#[derive(sqlx::FromRow)]
struct ExportJobRow {
    id: Uuid,
    partner_id: Uuid,
    format: String,
    filters: serde_json::Value,
    state: String,
    row_count: Option<i64>,
    file_key: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExportJobRow> for ExportJob {
    type Error = StoreError;

    fn try_from(row: ExportJobRow) -> Result<Self, Self::Error> {
        let format: ExportFormat = row
            .format
            .parse()
            .map_err(|e| StoreError::corrupt(format!("export job {}: {}", row.id, e)))?;
        let state: ExportState = row
            .state
            .parse()
            .map_err(|e| StoreError::corrupt(format!("export job {}: {}", row.id, e)))?;
        let filter: TransactionFilter = serde_json::from_value(row.filters)?;
        Ok(ExportJob {
            id: row.id,
            partner_id: row.partner_id,
            format,
            filter,
            state,
            row_count: row.row_count,
            file_key: row.file_key,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[async_trait]
impl ExportJobRepository for PgExportJobRepository {
    async fn create(&self, job: NewExportJob) -> Result<ExportJob, StoreError> {
        let filters = serde_json::to_value(&job.filter)?;
        let row: ExportJobRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO export_jobs (id, partner_id, format, filters, state)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(job.partner_id)
        .bind(job.format.as_str())
        .bind(filters)
        .fetch_one(&self.pool)
        .await?;

        ExportJob::try_from(row)
    }

    async fn count_created_since(
        &self,
        partner_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM export_jobs WHERE partner_id = $1 AND created_at >= $2",
        )
        .bind(partner_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn find_for_partner(
        &self,
        partner_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<ExportJob>, StoreError> {
        let row: Option<ExportJobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM export_jobs WHERE id = $1 AND partner_id = $2",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .bind(partner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExportJob::try_from).transpose()
    }

    async fn claim_next(&self) -> Result<Option<ExportJob>, StoreError> {
        let row: Option<ExportJobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE export_jobs
            SET state = 'processing', started_at = NOW()
            WHERE id = (
                SELECT id FROM export_jobs
                WHERE state = 'pending'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExportJob::try_from).transpose()
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        file_key: &str,
        row_count: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET state = 'completed', file_key = $2, row_count = $3, completed_at = NOW()
            WHERE id = $1 AND state = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(file_key)
        .bind(row_count)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, job_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET state = 'failed', error_message = $2, completed_at = NOW()
            WHERE id = $1 AND state = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE export_jobs
            SET state = 'failed', error_message = $2, completed_at = NOW()
            WHERE state = 'processing' AND (started_at IS NULL OR started_at < $1)
            "#,
        )
        .bind(started_before)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
