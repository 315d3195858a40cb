use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use campaign_core::{
    models::{ResourceRecord, ResourceRole},
    traits::ResourceRepository,
    CampaignError, CampaignResult,
};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// 内存资源仓储
///
/// 计数器的修改都在写锁内原地完成，调用方拿到的是修改后的副本。
pub struct InMemoryResourceRepository {
    resources: RwLock<BTreeMap<i64, ResourceRecord>>,
    next_id: AtomicI64,
}

impl Default for InMemoryResourceRepository {
    fn default() -> Self {
        Self {
            resources: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl InMemoryResourceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, id: i64, f: F) -> CampaignResult<ResourceRecord>
    where
        F: FnOnce(&mut ResourceRecord),
    {
        let mut resources = self.resources.write().await;
        let resource = resources
            .get_mut(&id)
            .ok_or(CampaignError::ResourceNotFound { id })?;
        f(resource);
        Ok(resource.clone())
    }
}

#[async_trait]
impl ResourceRepository for InMemoryResourceRepository {
    async fn create(&self, resource: &ResourceRecord) -> CampaignResult<ResourceRecord> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = resource.clone();
        stored.id = id;
        self.resources.write().await.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: i64) -> CampaignResult<Option<ResourceRecord>> {
        Ok(self.resources.read().await.get(&id).cloned())
    }

    async fn list(&self, role: Option<ResourceRole>) -> CampaignResult<Vec<ResourceRecord>> {
        let resources = self.resources.read().await;
        Ok(resources
            .values()
            .filter(|r| role.map_or(true, |role| r.role == role))
            .cloned()
            .collect())
    }

    async fn list_eligible(&self, role: ResourceRole) -> CampaignResult<Vec<ResourceRecord>> {
        let resources = self.resources.read().await;
        Ok(resources
            .values()
            .filter(|r| r.role == role && r.is_eligible())
            .cloned()
            .collect())
    }

    async fn find_by_endpoint(
        &self,
        resource: &ResourceRecord,
    ) -> CampaignResult<Option<ResourceRecord>> {
        let resources = self.resources.read().await;
        Ok(resources.values().find(|r| r.same_endpoint(resource)).cloned())
    }

    async fn record_success(
        &self,
        id: i64,
        response_time_ms: f64,
        at: DateTime<Utc>,
    ) -> CampaignResult<ResourceRecord> {
        self.modify(id, |r| {
            r.average_response_time = Some(match r.average_response_time {
                Some(avg) => {
                    (avg * r.successful_requests as f64 + response_time_ms)
                        / (r.successful_requests + 1) as f64
                }
                None => response_time_ms,
            });
            r.total_requests += 1;
            r.successful_requests += 1;
            r.consecutive_failure_count = 0;
            r.is_healthy = true;
            r.last_used_at = Some(at);
        })
        .await
    }

    async fn record_failure(
        &self,
        id: i64,
        max_failures: u32,
        at: DateTime<Utc>,
    ) -> CampaignResult<ResourceRecord> {
        self.modify(id, |r| {
            r.total_requests += 1;
            r.failed_requests += 1;
            r.consecutive_failure_count += 1;
            if r.consecutive_failure_count >= max_failures {
                r.is_healthy = false;
            }
            r.last_used_at = Some(at);
        })
        .await
    }

    async fn record_health_check(
        &self,
        id: i64,
        passed: bool,
        max_failures: u32,
        at: DateTime<Utc>,
    ) -> CampaignResult<ResourceRecord> {
        self.modify(id, |r| {
            if passed {
                r.consecutive_failure_count = 0;
                r.is_healthy = true;
            } else {
                r.consecutive_failure_count += 1;
                if r.consecutive_failure_count >= max_failures {
                    r.is_healthy = false;
                }
            }
            r.last_health_check_at = Some(at);
        })
        .await
    }

    async fn set_active(&self, id: i64, active: bool) -> CampaignResult<ResourceRecord> {
        self.modify(id, |r| r.is_active = active).await
    }
}
