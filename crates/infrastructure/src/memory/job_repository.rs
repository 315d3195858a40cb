use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use campaign_core::{
    models::{JobFilter, JobRecord, JobStatus, Pagination},
    traits::JobRepository,
    CampaignError, CampaignResult,
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, JobRecord>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 已落盘的记录是否允许被 `next` 覆盖
///
/// RETRY 只能写在 FAILURE 之上，并发的两次重试只有一次成功。
pub(crate) fn accepts_update(stored: JobStatus, next: JobStatus) -> bool {
    if next == JobStatus::Retry {
        return stored == JobStatus::Failure;
    }
    !stored.is_terminal()
}

fn newest_first(jobs: &mut [JobRecord]) {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &JobRecord) -> CampaignResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(CampaignError::DatabaseOperation(format!(
                "任务已存在: {}",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        debug!("创建任务记录: {}", job.id);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CampaignResult<Option<JobRecord>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update(&self, job: &JobRecord) -> CampaignResult<()> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&job.id)
            .ok_or(CampaignError::JobNotFound { id: job.id })?;
        if !accepts_update(stored.status, job.status) {
            return Err(CampaignError::InvalidState {
                id: job.id,
                status: stored.status,
            });
        }
        *stored = job.clone();
        Ok(())
    }

    async fn list(
        &self,
        filter: &JobFilter,
        pagination: Pagination,
    ) -> CampaignResult<(Vec<JobRecord>, u64)> {
        let jobs = self.jobs.read().await;
        let mut matched: Vec<JobRecord> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();
        newest_first(&mut matched);
        let total = matched.len() as u64;
        let page = matched
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.page_size as usize)
            .collect();
        Ok((page, total))
    }

    async fn list_active(&self, owner: Option<&str>) -> CampaignResult<Vec<JobRecord>> {
        let jobs = self.jobs.read().await;
        let mut active: Vec<JobRecord> = jobs
            .values()
            .filter(|j| !j.is_terminal())
            .filter(|j| owner.map_or(true, |o| j.owner == o))
            .cloned()
            .collect();
        newest_first(&mut active);
        Ok(active)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> CampaignResult<u64> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.is_terminal() && job.completed_at.map_or(false, |at| at < cutoff))
        });
        Ok((before - jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::models::{categories, JobDefinition};
    use serde_json::json;

    fn job(owner: &str) -> JobRecord {
        JobRecord::new(
            JobDefinition::new(categories::PHONE_GENERATION, owner, json!({"quantity": 10})),
            3,
        )
    }

    #[tokio::test]
    async fn test_terminal_record_is_immutable() {
        let repo = InMemoryJobRepository::new();
        let mut record = job("alice");
        repo.create(&record).await.unwrap();

        record.transition(JobStatus::Revoked).unwrap();
        repo.update(&record).await.unwrap();

        // 迟到的执行上下文写入被拒绝
        let mut late = record.clone();
        late.status = JobStatus::Progress;
        late.progress = 50.0;
        let err = repo.update(&late).await.unwrap_err();
        assert!(matches!(err, CampaignError::InvalidState { status: JobStatus::Revoked, .. }));

        let stored = repo.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Revoked);
        assert_eq!(stored.progress, 0.0);
    }

    #[tokio::test]
    async fn test_failure_accepts_retry_only() {
        let repo = InMemoryJobRepository::new();
        let mut record = job("alice");
        repo.create(&record).await.unwrap();
        record.transition(JobStatus::Started).unwrap();
        record.transition(JobStatus::Failure).unwrap();
        repo.update(&record).await.unwrap();

        let mut retry = record.clone();
        retry.transition(JobStatus::Retry).unwrap();
        repo.update(&retry).await.unwrap();
        assert_eq!(repo.get(record.id).await.unwrap().unwrap().attempt, 2);
    }

    #[tokio::test]
    async fn test_list_active_newest_first_and_scoped() {
        let repo = InMemoryJobRepository::new();
        let first = job("alice");
        let mut second = job("alice");
        second.created_at = first.created_at + chrono::Duration::seconds(1);
        let other = job("bob");
        let mut done = job("alice");
        done.transition(JobStatus::Revoked).unwrap();
        for j in [&first, &second, &other, &done] {
            repo.create(j).await.unwrap();
        }

        let active = repo.list_active(Some("alice")).await.unwrap();
        let ids: Vec<Uuid> = active.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert_eq!(repo.list_active(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_paginates_filtered_jobs() {
        let repo = InMemoryJobRepository::new();
        for _ in 0..5 {
            repo.create(&job("alice")).await.unwrap();
        }
        repo.create(&job("bob")).await.unwrap();

        let filter = JobFilter::for_owner("alice");
        let (page, total) = repo.list(&filter, Pagination::new(2, 2)).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        let (last, _) = repo.list(&filter, Pagination::new(3, 2)).await.unwrap();
        assert_eq!(last.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_terminal_before_is_idempotent() {
        let repo = InMemoryJobRepository::new();
        let mut old = job("alice");
        old.transition(JobStatus::Revoked).unwrap();
        old.completed_at = Some(Utc::now() - chrono::Duration::days(40));
        let running = job("alice");
        repo.create(&old).await.unwrap();
        repo.create(&running).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);
        assert_eq!(repo.delete_terminal_before(cutoff).await.unwrap(), 1);
        assert_eq!(repo.delete_terminal_before(cutoff).await.unwrap(), 0);
        assert!(repo.get(running.id).await.unwrap().is_some());
    }
}
