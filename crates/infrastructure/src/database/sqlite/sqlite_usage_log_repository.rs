use async_trait::async_trait;
use campaign_core::{
    models::UsageLog, traits::UsageLogRepository, CampaignError, CampaignResult,
};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_column;

pub struct SqliteUsageLogRepository {
    pool: SqlitePool,
}

impl SqliteUsageLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_log(row: &sqlx::sqlite::SqliteRow) -> CampaignResult<UsageLog> {
        let job_id: String = row.try_get("job_id")?;
        let role: String = row.try_get("role")?;
        Ok(UsageLog {
            id: row.try_get("id")?,
            job_id: Uuid::parse_str(&job_id)
                .map_err(|e| CampaignError::DatabaseOperation(format!("无效的任务ID {job_id}: {e}")))?,
            resource_id: row.try_get("resource_id")?,
            role: parse_column(&role)?,
            success: row.try_get("success")?,
            response_time: row.try_get("response_time")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl UsageLogRepository for SqliteUsageLogRepository {
    async fn append(&self, log: &UsageLog) -> CampaignResult<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_logs (job_id, resource_id, role, success, response_time, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.job_id.to_string())
        .bind(log.resource_id)
        .bind(log.role.as_str())
        .bind(log.success)
        .bind(log.response_time)
        .bind(&log.error)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_for_resource(
        &self,
        resource_id: i64,
        limit: usize,
    ) -> CampaignResult<Vec<UsageLog>> {
        let rows = sqlx::query(
            "SELECT * FROM usage_logs WHERE resource_id = $1 ORDER BY id DESC LIMIT $2",
        )
        .bind(resource_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_log).collect()
    }

    async fn list_for_job(&self, job_id: Uuid) -> CampaignResult<Vec<UsageLog>> {
        let rows = sqlx::query("SELECT * FROM usage_logs WHERE job_id = $1 ORDER BY id")
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_log).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::test_pool;
    use campaign_core::models::ResourceRole;

    #[tokio::test]
    async fn test_recent_for_resource_newest_first() {
        let repo = SqliteUsageLogRepository::new(test_pool().await);
        let job_id = Uuid::new_v4();
        repo.append(&UsageLog::success(job_id, 1, ResourceRole::Proxy, 10.0)).await.unwrap();
        repo.append(&UsageLog::failure(job_id, 1, ResourceRole::Proxy, "timeout")).await.unwrap();
        repo.append(&UsageLog::success(job_id, 2, ResourceRole::Relay, 30.0)).await.unwrap();

        let recent = repo.recent_for_resource(1, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(!recent[0].success);
        assert_eq!(recent[0].error.as_deref(), Some("timeout"));

        assert_eq!(repo.recent_for_resource(1, 1).await.unwrap().len(), 1);
        assert_eq!(repo.list_for_job(job_id).await.unwrap().len(), 3);
    }
}
