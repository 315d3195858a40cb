use std::sync::Arc;

use anyhow::Result;
use campaign_core::{
    config::models::{DatabaseBackend, DatabaseConfig},
    traits::{
        CursorStore, JobRepository, ResourceRepository, SettingsRepository, UsageLogRepository,
    },
};
use tracing::info;

use crate::database::{
    DatabaseManager, SqliteCursorStore, SqliteJobRepository, SqliteResourceRepository,
    SqliteSettingsRepository, SqliteUsageLogRepository,
};
use crate::memory::{
    InMemoryCursorStore, InMemoryJobRepository, InMemoryResourceRepository,
    InMemorySettingsRepository, InMemoryUsageLogRepository,
};

/// 一组共享同一存储后端的仓储
#[derive(Clone)]
pub struct Repositories {
    pub jobs: Arc<dyn JobRepository>,
    pub resources: Arc<dyn ResourceRepository>,
    pub usage_logs: Arc<dyn UsageLogRepository>,
    pub settings: Arc<dyn SettingsRepository>,
    pub cursors: Arc<dyn CursorStore>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            jobs: Arc::new(InMemoryJobRepository::new()),
            resources: Arc::new(InMemoryResourceRepository::new()),
            usage_logs: Arc::new(InMemoryUsageLogRepository::new()),
            settings: Arc::new(InMemorySettingsRepository::new()),
            cursors: Arc::new(InMemoryCursorStore::new()),
        }
    }
}

pub struct RepositoryFactory;

impl RepositoryFactory {
    /// 按 `database.url` 选择后端；SQLite 后端会在返回前建好表结构
    pub async fn create(config: &DatabaseConfig) -> Result<Repositories> {
        match config.backend() {
            DatabaseBackend::Memory => {
                info!("使用内存存储后端");
                Ok(Repositories::in_memory())
            }
            DatabaseBackend::Sqlite => {
                let manager = DatabaseManager::new(config).await?;
                manager.migrate().await?;
                let pool = manager.pool().clone();
                Ok(Repositories {
                    jobs: Arc::new(SqliteJobRepository::new(pool.clone())),
                    resources: Arc::new(SqliteResourceRepository::new(pool.clone())),
                    usage_logs: Arc::new(SqliteUsageLogRepository::new(pool.clone())),
                    settings: Arc::new(SqliteSettingsRepository::new(pool.clone())),
                    cursors: Arc::new(SqliteCursorStore::new(pool)),
                })
            }
        }
    }
}
