use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info};

use campaign_core::{config::models::MaintenanceConfig, CampaignResult};

use crate::manager::JobManager;

/// 过期任务清理
///
/// 定期删除进入终态超过保留天数的任务记录，防止存储无限增长。
pub struct RetentionCleaner {
    manager: Arc<JobManager>,
    retention_days: u32,
    cleanup_interval: Duration,
}

impl RetentionCleaner {
    pub fn new(manager: Arc<JobManager>, config: &MaintenanceConfig) -> Self {
        Self {
            manager,
            retention_days: config.retention_days,
            cleanup_interval: Duration::from_secs(config.cleanup_interval_seconds),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "过期任务清理已启动，保留 {} 天，间隔 {:?}",
            self.retention_days, self.cleanup_interval
        );
        let mut ticker = interval(self.cleanup_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cleanup_once().await {
                        error!("清理过期任务失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("过期任务清理收到关闭信号");
                    break;
                }
            }
        }
    }

    pub async fn cleanup_once(&self) -> CampaignResult<u64> {
        let started = std::time::Instant::now();
        let removed = self.manager.cleanup(self.retention_days).await?;
        debug!("清理完成，删除 {} 条，耗时 {:?}", removed, started.elapsed());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{runner_config, runner_with, RecordingPublisher};
    use campaign_core::models::{categories, JobDefinition, JobRecord, JobStatus};
    use campaign_infrastructure::Repositories;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_loop_cleans_until_shutdown() {
        let repos = Repositories::in_memory();
        let runner = runner_with(&repos, Arc::new(RecordingPublisher::default()), runner_config(), vec![]).await;
        let config = MaintenanceConfig {
            retention_days: 7,
            cleanup_interval_seconds: 60,
            ..MaintenanceConfig::default()
        };
        let cleaner = Arc::new(RetentionCleaner::new(Arc::new(JobManager::new(runner)), &config));

        let mut record = JobRecord::new(
            JobDefinition::new(categories::PHONE_GENERATION, "alice", json!({"quantity": 1})),
            3,
        );
        repos.jobs.create(&record).await.unwrap();
        record.transition(JobStatus::Revoked).unwrap();
        record.completed_at = Some(Utc::now() - chrono::Duration::days(8));
        repos.jobs.update(&record).await.unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(cleaner.clone().run(shutdown_rx));

        // 第一次 tick 立即触发
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(repos.jobs.get(record.id).await.unwrap().is_none());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(cleaner.cleanup_once().await.unwrap(), 0);
    }
}
