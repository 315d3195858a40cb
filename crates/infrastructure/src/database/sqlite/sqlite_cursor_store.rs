use async_trait::async_trait;
use campaign_core::{traits::CursorStore, CampaignResult};
use sqlx::{Row, SqlitePool};

/// 持久化的轮询游标
///
/// 自增和读取在同一条 upsert 语句中完成，重启后从上次的位置继续。
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn next_position(&self, pool_key: &str) -> CampaignResult<u64> {
        let row = sqlx::query(
            r#"
            INSERT INTO rotation_cursors (pool_key, position) VALUES ($1, 1)
            ON CONFLICT(pool_key) DO UPDATE SET position = position + 1
            RETURNING position
            "#,
        )
        .bind(pool_key)
        .fetch_one(&self.pool)
        .await?;

        let position: i64 = row.try_get("position")?;
        Ok((position - 1) as u64)
    }
}
