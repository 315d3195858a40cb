use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use campaign_core::config::models::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        category TEXT NOT NULL,
        owner TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'PENDING',
        progress REAL NOT NULL DEFAULT 0,
        current_step TEXT,
        processed_count INTEGER NOT NULL DEFAULT 0,
        total_count INTEGER NOT NULL DEFAULT 0,
        payload TEXT NOT NULL DEFAULT '{}',
        result_data TEXT,
        error_message TEXT,
        error_retryable INTEGER NOT NULL DEFAULT 0,
        attempt INTEGER NOT NULL DEFAULT 1,
        max_attempts INTEGER NOT NULL DEFAULT 1,
        paused_reason TEXT,
        external_execution_id TEXT,
        created_at DATETIME NOT NULL,
        started_at DATETIME,
        completed_at DATETIME,
        estimated_completion DATETIME,
        updated_at DATETIME NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_owner_created ON jobs (owner, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status)",
    r#"
    CREATE TABLE IF NOT EXISTS resources (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        role TEXT NOT NULL,
        name TEXT NOT NULL,
        address TEXT NOT NULL,
        port INTEGER NOT NULL,
        protocol TEXT NOT NULL,
        username TEXT,
        password TEXT,
        is_active INTEGER NOT NULL DEFAULT 1,
        is_healthy INTEGER NOT NULL DEFAULT 1,
        consecutive_failure_count INTEGER NOT NULL DEFAULT 0,
        total_requests INTEGER NOT NULL DEFAULT 0,
        successful_requests INTEGER NOT NULL DEFAULT 0,
        failed_requests INTEGER NOT NULL DEFAULT 0,
        last_used_at DATETIME,
        last_health_check_at DATETIME,
        average_response_time REAL,
        created_at DATETIME NOT NULL,
        UNIQUE (role, address, port)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS usage_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        resource_id INTEGER NOT NULL,
        role TEXT NOT NULL,
        success INTEGER NOT NULL,
        response_time REAL,
        error TEXT,
        created_at DATETIME NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_usage_logs_resource ON usage_logs (resource_id, id DESC)",
    "CREATE INDEX IF NOT EXISTS idx_usage_logs_job ON usage_logs (job_id)",
    r#"
    CREATE TABLE IF NOT EXISTS rotation_settings (
        owner TEXT PRIMARY KEY,
        proxy_enabled INTEGER NOT NULL,
        proxy_strategy TEXT NOT NULL,
        proxy_health_check_interval INTEGER NOT NULL,
        proxy_max_failures INTEGER NOT NULL,
        relay_enabled INTEGER NOT NULL,
        relay_strategy TEXT NOT NULL,
        relay_health_check_interval INTEGER NOT NULL,
        relay_max_failures INTEGER NOT NULL,
        delay_enabled INTEGER NOT NULL,
        delay_min REAL NOT NULL,
        delay_max REAL NOT NULL,
        random_seed INTEGER,
        destination_rate_limit INTEGER,
        updated_at DATETIME NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rotation_cursors (
        pool_key TEXT PRIMARY KEY,
        position INTEGER NOT NULL DEFAULT 0
    )
    "#,
];

/// SQLite 连接池与表结构管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let in_memory = config.url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的SQLite连接串: {}", config.url))?
            .create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // 内存库每个连接都是独立的数据库，只能使用单连接
        let max_connections = if in_memory { 1 } else { config.max_connections };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(options)
            .await
            .context("连接SQLite数据库失败")?;

        info!("已连接SQLite数据库: {}", config.url);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建缺失的表和索引
    pub async fn migrate(&self) -> Result<()> {
        migrate(&self.pool).await
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    debug!("Running SQLite database migrations");
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("执行数据库迁移失败")?;
    }
    Ok(())
}
