pub mod sqlite_cursor_store;
pub mod sqlite_job_repository;
pub mod sqlite_resource_repository;
pub mod sqlite_settings_repository;
pub mod sqlite_usage_log_repository;

pub use sqlite_cursor_store::SqliteCursorStore;
pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_resource_repository::SqliteResourceRepository;
pub use sqlite_settings_repository::SqliteSettingsRepository;
pub use sqlite_usage_log_repository::SqliteUsageLogRepository;

use std::str::FromStr;

use campaign_core::{CampaignError, CampaignResult};

/// 解析以文本形式存储的枚举列
pub(crate) fn parse_column<T>(value: &str) -> CampaignResult<T>
where
    T: FromStr<Err = CampaignError>,
{
    value
        .parse()
        .map_err(|e: CampaignError| CampaignError::DatabaseOperation(e.to_string()))
}

#[cfg(test)]
pub(crate) async fn test_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    crate::database::manager::migrate(&pool).await.unwrap();
    pool
}
