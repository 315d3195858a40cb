use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

use campaign_core::{
    config::models::MaintenanceConfig,
    models::{JobEvent, JobStatus},
    CampaignResult,
};

use crate::runner::JobRunner;

/// 停滞检测
///
/// 执行中的任务超过停滞窗口没有任何状态变化时发出 `job_stalled` 警告，
/// 只提醒运维关注，不会自动取消。同一次停滞只告警一次。
pub struct StallDetector {
    runner: Arc<JobRunner>,
    window: Duration,
    scan_interval: Duration,
    /// job_id -> 告警时记录的 updated_at
    flagged: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl StallDetector {
    pub fn new(runner: Arc<JobRunner>, config: &MaintenanceConfig) -> Self {
        Self {
            runner,
            window: Duration::from_secs(config.stall_window_seconds),
            scan_interval: Duration::from_secs(config.stall_scan_interval_seconds),
            flagged: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("停滞检测已启动，窗口 {:?}", self.window);
        let mut ticker = interval(self.scan_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan().await {
                        error!("停滞检测失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        info!("停滞检测已停止");
    }

    /// 扫描一次，返回本次新发现的停滞任务
    pub async fn scan(&self) -> CampaignResult<Vec<Uuid>> {
        let now = Utc::now();
        let window = chrono::Duration::seconds(self.window.as_secs() as i64);
        let active = self.runner.jobs().list_active(None).await?;

        let mut newly_stalled = Vec::new();
        {
            let mut flagged = self.flagged.lock().unwrap_or_else(|e| e.into_inner());
            flagged.retain(|id, _| active.iter().any(|job| job.id == *id));

            for job in &active {
                if !matches!(job.status, JobStatus::Started | JobStatus::Progress) {
                    continue;
                }
                let idle = now - job.updated_at;
                if idle <= window || flagged.get(&job.id) == Some(&job.updated_at) {
                    continue;
                }
                flagged.insert(job.id, job.updated_at);
                newly_stalled.push((job.id, job.owner.clone(), idle.num_seconds().max(0) as u64));
            }
        }

        for (job_id, owner, idle_seconds) in &newly_stalled {
            warn!("任务 {} 已 {} 秒没有进展", job_id, idle_seconds);
            counter!("campaign_jobs_stalled_total").increment(1);
            self.runner.publish_for(
                owner,
                *job_id,
                JobEvent::JobStalled {
                    job_id: *job_id,
                    idle_seconds: *idle_seconds,
                },
            );
        }
        Ok(newly_stalled.into_iter().map(|(id, _, _)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{runner_config, runner_with, RecordingPublisher};
    use campaign_core::models::{categories, JobDefinition, JobRecord};
    use campaign_infrastructure::Repositories;
    use serde_json::json;

    async fn job_idle_for(repos: &Repositories, status: JobStatus, idle_minutes: i64) -> JobRecord {
        let mut record = JobRecord::new(
            JobDefinition::new(categories::SMS_CAMPAIGN, "alice", json!({})),
            3,
        );
        repos.jobs.create(&record).await.unwrap();
        record.transition(JobStatus::Started).unwrap();
        if status == JobStatus::Paused {
            record.transition(JobStatus::Paused).unwrap();
        }
        record.updated_at = Utc::now() - chrono::Duration::minutes(idle_minutes);
        repos.jobs.update(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn test_stalled_jobs_are_flagged_once() {
        let repos = Repositories::in_memory();
        let publisher = Arc::new(RecordingPublisher::default());
        let runner = runner_with(&repos, publisher.clone(), runner_config(), vec![]).await;
        let config = MaintenanceConfig {
            stall_window_seconds: 600,
            ..MaintenanceConfig::default()
        };
        let detector = StallDetector::new(runner, &config);

        let stalled = job_idle_for(&repos, JobStatus::Started, 20).await;
        job_idle_for(&repos, JobStatus::Started, 1).await;
        // 暂停中的任务在等待资源恢复，不算停滞
        job_idle_for(&repos, JobStatus::Paused, 60).await;

        assert_eq!(detector.scan().await.unwrap(), vec![stalled.id]);
        assert!(detector.scan().await.unwrap().is_empty());
        assert_eq!(publisher.kinds(), vec!["job_stalled"]);

        // 任务有了新进展后再次停滞会重新告警
        let mut record = repos.jobs.get(stalled.id).await.unwrap().unwrap();
        record.updated_at = Utc::now() - chrono::Duration::minutes(15);
        repos.jobs.update(&record).await.unwrap();
        assert_eq!(detector.scan().await.unwrap(), vec![stalled.id]);
    }
}
