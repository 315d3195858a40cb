use async_trait::async_trait;
use campaign_core::{
    models::{ResourceRecord, ResourceRole},
    traits::ResourceRepository,
    CampaignError, CampaignResult,
};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use super::parse_column;

const RESOURCE_COLUMNS: &str = "id, role, name, address, port, protocol, username, password, \
    is_active, is_healthy, consecutive_failure_count, total_requests, successful_requests, \
    failed_requests, last_used_at, last_health_check_at, average_response_time, created_at";

/// 资源仓储的 SQLite 实现
///
/// 计数器全部通过单条 `UPDATE ... RETURNING` 修改，并发调用不会丢失更新。
pub struct SqliteResourceRepository {
    pool: SqlitePool,
}

impl SqliteResourceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_resource(row: &sqlx::sqlite::SqliteRow) -> CampaignResult<ResourceRecord> {
        let role: String = row.try_get("role")?;
        let protocol: String = row.try_get("protocol")?;
        Ok(ResourceRecord {
            id: row.try_get("id")?,
            role: parse_column(&role)?,
            name: row.try_get("name")?,
            address: row.try_get("address")?,
            port: row.try_get::<i64, _>("port")? as u16,
            protocol: parse_column(&protocol)?,
            username: row.try_get("username")?,
            password: row.try_get("password")?,
            is_active: row.try_get("is_active")?,
            is_healthy: row.try_get("is_healthy")?,
            consecutive_failure_count: row.try_get::<i64, _>("consecutive_failure_count")? as u32,
            total_requests: row.try_get::<i64, _>("total_requests")? as u64,
            successful_requests: row.try_get::<i64, _>("successful_requests")? as u64,
            failed_requests: row.try_get::<i64, _>("failed_requests")? as u64,
            last_used_at: row.try_get("last_used_at")?,
            last_health_check_at: row.try_get("last_health_check_at")?,
            average_response_time: row.try_get("average_response_time")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn fetch_returning<'a>(
        &self,
        id: i64,
        query: sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>>,
    ) -> CampaignResult<ResourceRecord> {
        let row = query
            .fetch_optional(&self.pool)
            .await?
            .ok_or(CampaignError::ResourceNotFound { id })?;
        Self::row_to_resource(&row)
    }
}

#[async_trait]
impl ResourceRepository for SqliteResourceRepository {
    #[instrument(skip(self, resource), fields(role = %resource.role, endpoint = %resource.endpoint()))]
    async fn create(&self, resource: &ResourceRecord) -> CampaignResult<ResourceRecord> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO resources (role, name, address, port, protocol, username, password,
                is_active, is_healthy, consecutive_failure_count, total_requests,
                successful_requests, failed_requests, last_used_at, last_health_check_at,
                average_response_time, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING {RESOURCE_COLUMNS}
            "#
        ))
        .bind(resource.role.as_str())
        .bind(&resource.name)
        .bind(&resource.address)
        .bind(resource.port as i64)
        .bind(resource.protocol.as_str())
        .bind(&resource.username)
        .bind(&resource.password)
        .bind(resource.is_active)
        .bind(resource.is_healthy)
        .bind(resource.consecutive_failure_count as i64)
        .bind(resource.total_requests as i64)
        .bind(resource.successful_requests as i64)
        .bind(resource.failed_requests as i64)
        .bind(resource.last_used_at)
        .bind(resource.last_health_check_at)
        .bind(resource.average_response_time)
        .bind(resource.created_at)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_resource(&row)?;
        debug!("创建资源成功: {} ({})", created.id, created.endpoint());
        Ok(created)
    }

    async fn get(&self, id: i64) -> CampaignResult<Option<ResourceRecord>> {
        let row = sqlx::query(&format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_resource).transpose()
    }

    async fn list(&self, role: Option<ResourceRole>) -> CampaignResult<Vec<ResourceRecord>> {
        let rows = match role {
            Some(role) => {
                sqlx::query(&format!(
                    "SELECT {RESOURCE_COLUMNS} FROM resources WHERE role = $1 ORDER BY id"
                ))
                .bind(role.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {RESOURCE_COLUMNS} FROM resources ORDER BY id"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::row_to_resource).collect()
    }

    async fn list_eligible(&self, role: ResourceRole) -> CampaignResult<Vec<ResourceRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources \
             WHERE role = $1 AND is_active = 1 AND is_healthy = 1 ORDER BY id"
        ))
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_resource).collect()
    }

    async fn find_by_endpoint(
        &self,
        resource: &ResourceRecord,
    ) -> CampaignResult<Option<ResourceRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE role = $1 AND address = $2 AND port = $3"
        ))
        .bind(resource.role.as_str())
        .bind(&resource.address)
        .bind(resource.port as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_resource).transpose()
    }

    #[instrument(skip(self), fields(resource_id = id))]
    async fn record_success(
        &self,
        id: i64,
        response_time_ms: f64,
        at: DateTime<Utc>,
    ) -> CampaignResult<ResourceRecord> {
        let sql = format!(
            r#"
            UPDATE resources SET
                average_response_time = CASE
                    WHEN average_response_time IS NULL THEN $2
                    ELSE (average_response_time * successful_requests + $2) / (successful_requests + 1)
                END,
                total_requests = total_requests + 1,
                successful_requests = successful_requests + 1,
                consecutive_failure_count = 0,
                is_healthy = 1,
                last_used_at = $3
            WHERE id = $1
            RETURNING {RESOURCE_COLUMNS}
            "#
        );
        let query = sqlx::query(&sql).bind(id).bind(response_time_ms).bind(at);
        self.fetch_returning(id, query).await
    }

    #[instrument(skip(self), fields(resource_id = id))]
    async fn record_failure(
        &self,
        id: i64,
        max_failures: u32,
        at: DateTime<Utc>,
    ) -> CampaignResult<ResourceRecord> {
        let sql = format!(
            r#"
            UPDATE resources SET
                total_requests = total_requests + 1,
                failed_requests = failed_requests + 1,
                consecutive_failure_count = consecutive_failure_count + 1,
                is_healthy = CASE WHEN consecutive_failure_count + 1 >= $2 THEN 0 ELSE is_healthy END,
                last_used_at = $3
            WHERE id = $1
            RETURNING {RESOURCE_COLUMNS}
            "#
        );
        let query = sqlx::query(&sql).bind(id).bind(max_failures as i64).bind(at);
        self.fetch_returning(id, query).await
    }

    #[instrument(skip(self), fields(resource_id = id))]
    async fn record_health_check(
        &self,
        id: i64,
        passed: bool,
        max_failures: u32,
        at: DateTime<Utc>,
    ) -> CampaignResult<ResourceRecord> {
        let sql = format!(
            r#"
            UPDATE resources SET
                consecutive_failure_count = CASE WHEN $2 THEN 0 ELSE consecutive_failure_count + 1 END,
                is_healthy = CASE
                    WHEN $2 THEN 1
                    WHEN consecutive_failure_count + 1 >= $3 THEN 0
                    ELSE is_healthy
                END,
                last_health_check_at = $4
            WHERE id = $1
            RETURNING {RESOURCE_COLUMNS}
            "#
        );
        let query = sqlx::query(&sql)
            .bind(id)
            .bind(passed)
            .bind(max_failures as i64)
            .bind(at);
        self.fetch_returning(id, query).await
    }

    async fn set_active(&self, id: i64, active: bool) -> CampaignResult<ResourceRecord> {
        let sql = format!(
            "UPDATE resources SET is_active = $2 WHERE id = $1 RETURNING {RESOURCE_COLUMNS}"
        );
        let query = sqlx::query(&sql).bind(id).bind(active);
        self.fetch_returning(id, query).await
    }
}
