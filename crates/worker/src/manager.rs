use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use campaign_core::{
    models::{JobDefinition, JobEvent, JobFilter, JobRecord, JobStatus, JobStatusView, Pagination},
    traits::JobRepository,
    CampaignError, CampaignResult,
};

use crate::runner::JobRunner;

/// 任务查询、取消、重试与清理
pub struct JobManager {
    runner: Arc<JobRunner>,
}

impl JobManager {
    pub fn new(runner: Arc<JobRunner>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    fn jobs(&self) -> &Arc<dyn JobRepository> {
        self.runner.jobs()
    }

    pub async fn submit(&self, definition: JobDefinition) -> CampaignResult<Uuid> {
        self.runner.submit(definition).await
    }

    /// 不存在或不属于调用者时一律返回 `JobNotFound`
    async fn owned(&self, job_id: Uuid, owner: &str) -> CampaignResult<JobRecord> {
        match self.jobs().get(job_id).await? {
            Some(record) if record.owner == owner => Ok(record),
            _ => Err(CampaignError::JobNotFound { id: job_id }),
        }
    }

    pub async fn get_status(&self, job_id: Uuid, owner: &str) -> CampaignResult<JobStatusView> {
        Ok(self.owned(job_id, owner).await?.status_view())
    }

    /// 请求取消
    ///
    /// 本进程中的任务设置协作式取消标记，由执行上下文在下一个检查点写入 REVOKED；
    /// 不在本进程中的任务（例如重启前遗留的）直接置为 REVOKED。
    #[instrument(skip(self), fields(job_id = %job_id, owner = %owner))]
    pub async fn cancel(&self, job_id: Uuid, owner: &str) -> CampaignResult<JobStatusView> {
        let mut record = self.owned(job_id, owner).await?;
        if record.is_terminal() {
            return Err(CampaignError::InvalidState {
                id: job_id,
                status: record.status,
            });
        }

        if self.runner.cancel(job_id) {
            info!("已请求取消任务 {}", job_id);
            return Ok(record.status_view());
        }

        record.transition(JobStatus::Revoked)?;
        self.jobs().update(&record).await?;
        info!("任务 {} 不在执行中，已直接取消", job_id);
        self.runner.publish_for(
            &record.owner,
            job_id,
            JobEvent::JobCompleted {
                job: record.status_view(),
                result: record.result_data.clone(),
            },
        );
        Ok(record.status_view())
    }

    /// 只有 FAILURE、错误可重试且仍有剩余尝试次数的任务可以重试
    pub async fn retry(&self, job_id: Uuid, owner: &str) -> CampaignResult<JobStatusView> {
        self.owned(job_id, owner).await?;
        Ok(self.runner.retry(job_id).await?.status_view())
    }

    pub async fn list(
        &self,
        owner: &str,
        mut filter: JobFilter,
        pagination: Pagination,
    ) -> CampaignResult<(Vec<JobStatusView>, u64)> {
        filter.owner = Some(owner.to_string());
        let (records, total) = self.jobs().list(&filter, pagination).await?;
        Ok((records.iter().map(JobRecord::status_view).collect(), total))
    }

    /// 所有非终态任务，最新的在前
    pub async fn list_active(&self, owner: &str) -> CampaignResult<Vec<JobStatusView>> {
        Ok(self
            .jobs()
            .list_active(Some(owner))
            .await?
            .iter()
            .map(JobRecord::status_view)
            .collect())
    }

    /// 删除进入终态超过 `retention_days` 天的任务；重复调用是安全的
    pub async fn cleanup(&self, retention_days: u32) -> CampaignResult<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(retention_days));
        let removed = self.jobs().delete_terminal_before(cutoff).await?;
        if removed > 0 {
            self.runner.prune_parked().await?;
            info!("清理了 {} 个过期任务 (早于 {})", removed, cutoff);
        }
        Ok(removed)
    }
}
