use async_trait::async_trait;
use campaign_core::{
    models::{JobFilter, JobRecord, JobStatus, Pagination},
    traits::JobRepository,
    CampaignError, CampaignResult,
};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::parse_column;

const JOB_COLUMNS: &str = "id, name, category, owner, status, progress, current_step, \
    processed_count, total_count, payload, result_data, error_message, error_retryable, \
    attempt, max_attempts, paused_reason, external_execution_id, created_at, started_at, \
    completed_at, estimated_completion, updated_at";

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> CampaignResult<JobRecord> {
        let id: String = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let payload: String = row.try_get("payload")?;
        let result_data: Option<String> = row.try_get("result_data")?;

        Ok(JobRecord {
            id: Uuid::parse_str(&id)
                .map_err(|e| CampaignError::DatabaseOperation(format!("无效的任务ID {id}: {e}")))?,
            name: row.try_get("name")?,
            category: row.try_get("category")?,
            owner: row.try_get("owner")?,
            status: parse_column(&status)?,
            progress: row.try_get("progress")?,
            current_step: row.try_get("current_step")?,
            processed_count: row.try_get::<i64, _>("processed_count")? as u64,
            total_count: row.try_get::<i64, _>("total_count")? as u64,
            payload: serde_json::from_str(&payload)?,
            result_data: result_data.map(|s| serde_json::from_str(&s)).transpose()?,
            error_message: row.try_get("error_message")?,
            error_retryable: row.try_get("error_retryable")?,
            attempt: row.try_get::<i64, _>("attempt")? as u32,
            max_attempts: row.try_get::<i64, _>("max_attempts")? as u32,
            paused_reason: row.try_get("paused_reason")?,
            external_execution_id: row.try_get("external_execution_id")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            estimated_completion: row.try_get("estimated_completion")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn push_filters<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &JobFilter) {
        if let Some(owner) = &filter.owner {
            builder.push(" AND owner = ").push_bind(owner.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(category) = &filter.category {
            builder.push(" AND category = ").push_bind(category.clone());
        }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    #[instrument(skip(self, job), fields(job_id = %job.id, owner = %job.owner))]
    async fn create(&self, job: &JobRecord) -> CampaignResult<()> {
        let result_data = job.result_data.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, name, category, owner, status, progress, current_step,
                processed_count, total_count, payload, result_data, error_message, error_retryable,
                attempt, max_attempts, paused_reason, external_execution_id, created_at, started_at,
                completed_at, estimated_completion, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21, $22)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.name)
        .bind(&job.category)
        .bind(&job.owner)
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(&job.current_step)
        .bind(job.processed_count as i64)
        .bind(job.total_count as i64)
        .bind(serde_json::to_string(&job.payload)?)
        .bind(result_data)
        .bind(&job.error_message)
        .bind(job.error_retryable)
        .bind(job.attempt as i64)
        .bind(job.max_attempts as i64)
        .bind(&job.paused_reason)
        .bind(&job.external_execution_id)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.estimated_completion)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("创建任务记录成功: {}", job.id);
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn get(&self, id: Uuid) -> CampaignResult<Option<JobRecord>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, status = %job.status))]
    async fn update(&self, job: &JobRecord) -> CampaignResult<()> {
        let result_data = job.result_data.as_ref().map(serde_json::to_string).transpose()?;
        // RETRY 只能覆盖 FAILURE，其余写入只能覆盖非终态记录，条件写在同一条语句里
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                name = $2, status = $3, progress = $4, current_step = $5,
                processed_count = $6, total_count = $7, payload = $8, result_data = $9,
                error_message = $10, error_retryable = $11, attempt = $12, max_attempts = $13,
                paused_reason = $14, started_at = $15, completed_at = $16,
                estimated_completion = $17, updated_at = $18
            WHERE id = $1
              AND (($3 = 'RETRY' AND status = 'FAILURE')
                   OR ($3 <> 'RETRY' AND status NOT IN ('SUCCESS', 'FAILURE', 'REVOKED')))
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.name)
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(&job.current_step)
        .bind(job.processed_count as i64)
        .bind(job.total_count as i64)
        .bind(serde_json::to_string(&job.payload)?)
        .bind(result_data)
        .bind(&job.error_message)
        .bind(job.error_retryable)
        .bind(job.attempt as i64)
        .bind(job.max_attempts as i64)
        .bind(&job.paused_reason)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.estimated_completion)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get(job.id).await? {
                Some(stored) => Err(CampaignError::InvalidState {
                    id: job.id,
                    status: stored.status,
                }),
                None => Err(CampaignError::JobNotFound { id: job.id }),
            };
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        filter: &JobFilter,
        pagination: Pagination,
    ) -> CampaignResult<(Vec<JobRecord>, u64)> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS count FROM jobs WHERE 1 = 1");
        Self::push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;

        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {JOB_COLUMNS} FROM jobs WHERE 1 = 1"));
        Self::push_filters(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(pagination.page_size as i64)
            .push(" OFFSET ")
            .push_bind(pagination.offset() as i64);

        let rows = query.build().fetch_all(&self.pool).await?;
        let jobs = rows.iter().map(Self::row_to_job).collect::<CampaignResult<Vec<_>>>()?;
        Ok((jobs, total as u64))
    }

    #[instrument(skip(self))]
    async fn list_active(&self, owner: Option<&str>) -> CampaignResult<Vec<JobRecord>> {
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {JOB_COLUMNS} FROM jobs WHERE status NOT IN ("));
        let mut terminal = query.separated(", ");
        for status in JobStatus::TERMINAL {
            terminal.push_bind(status.as_str());
        }
        query.push(")");
        if let Some(owner) = owner {
            query.push(" AND owner = ").push_bind(owner.to_string());
        }
        query.push(" ORDER BY created_at DESC, id DESC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self))]
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> CampaignResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('SUCCESS', 'FAILURE', 'REVOKED')
              AND completed_at IS NOT NULL
              AND completed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
