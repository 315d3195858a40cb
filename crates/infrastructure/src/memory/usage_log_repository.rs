use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use campaign_core::{models::UsageLog, traits::UsageLogRepository, CampaignResult};
use tokio::sync::RwLock;
use uuid::Uuid;

pub struct InMemoryUsageLogRepository {
    logs: RwLock<Vec<UsageLog>>,
    next_id: AtomicI64,
}

impl Default for InMemoryUsageLogRepository {
    fn default() -> Self {
        Self {
            logs: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl InMemoryUsageLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageLogRepository for InMemoryUsageLogRepository {
    async fn append(&self, log: &UsageLog) -> CampaignResult<()> {
        let mut entry = log.clone();
        entry.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.logs.write().await.push(entry);
        Ok(())
    }

    async fn recent_for_resource(
        &self,
        resource_id: i64,
        limit: usize,
    ) -> CampaignResult<Vec<UsageLog>> {
        let logs = self.logs.read().await;
        Ok(logs
            .iter()
            .rev()
            .filter(|l| l.resource_id == resource_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_for_job(&self, job_id: Uuid) -> CampaignResult<Vec<UsageLog>> {
        let logs = self.logs.read().await;
        Ok(logs.iter().filter(|l| l.job_id == job_id).cloned().collect())
    }
}
