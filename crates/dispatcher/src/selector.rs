use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use campaign_core::{
    models::{ResourceRecord, ResourceRole, RotationStrategy},
    traits::CursorStore,
    CampaignError, CampaignResult,
};

use crate::health::ResourceHealthTracker;

/// 资源轮换选择器
///
/// 只在 `is_active && is_healthy` 的子集中选择；所有策略的平局都取 id 最小者。
pub struct RotationSelector {
    tracker: Arc<ResourceHealthTracker>,
    cursors: Arc<dyn CursorStore>,
}

impl RotationSelector {
    pub fn new(tracker: Arc<ResourceHealthTracker>, cursors: Arc<dyn CursorStore>) -> Self {
        Self { tracker, cursors }
    }

    /// 从该角色的当前资源池中选择
    pub async fn select_for_role(
        &self,
        role: ResourceRole,
        strategy: RotationStrategy,
    ) -> CampaignResult<ResourceRecord> {
        let pool = self.tracker.resources().list_eligible(role).await?;
        self.select(&pool, role, strategy).await
    }

    pub async fn has_eligible(&self, role: ResourceRole) -> CampaignResult<bool> {
        Ok(!self.tracker.resources().list_eligible(role).await?.is_empty())
    }

    pub async fn select(
        &self,
        pool: &[ResourceRecord],
        role: ResourceRole,
        strategy: RotationStrategy,
    ) -> CampaignResult<ResourceRecord> {
        let mut candidates: Vec<&ResourceRecord> =
            pool.iter().filter(|r| r.role == role && r.is_eligible()).collect();
        if candidates.is_empty() {
            debug!("{} 资源池中没有可用资源", role);
            return Err(CampaignError::NoResourceAvailable { role });
        }
        candidates.sort_by_key(|r| r.id);

        let selected = match strategy {
            RotationStrategy::RoundRobin => {
                let position = self.cursors.next_position(&pool_key(role)).await?;
                let index = (position % candidates.len() as u64) as usize;
                candidates[index]
            }
            RotationStrategy::Random => {
                let index = rand::rng().random_range(0..candidates.len());
                candidates[index]
            }
            RotationStrategy::LeastUsed => {
                // min_by_key 在并列时返回第一个，即 id 最小者
                candidates
                    .iter()
                    .copied()
                    .min_by_key(|r| r.total_requests)
                    .ok_or(CampaignError::NoResourceAvailable { role })?
            }
            RotationStrategy::BestPerformance => {
                let mut best: Option<(&ResourceRecord, f64)> = None;
                for candidate in candidates.iter().copied() {
                    let score = self.tracker.score_for(candidate).await?;
                    match best {
                        Some((_, best_score)) if score <= best_score => {}
                        _ => best = Some((candidate, score)),
                    }
                }
                best.map(|(r, _)| r)
                    .ok_or(CampaignError::NoResourceAvailable { role })?
            }
        };

        debug!(
            "{} 策略选择 {} 资源 {} (候选 {} 个)",
            strategy,
            role,
            selected.id,
            candidates.len()
        );
        Ok(selected.clone())
    }
}

fn pool_key(role: ResourceRole) -> String {
    format!("{role}_pool")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mocks::{seed_pool, tracker_with, StaticProbe};
    use campaign_infrastructure::Repositories;
    use std::collections::HashMap;

    fn selector_for(repos: &Repositories) -> (Arc<RotationSelector>, Arc<ResourceHealthTracker>) {
        let tracker = tracker_with(repos, StaticProbe::passing());
        let selector = Arc::new(RotationSelector::new(tracker.clone(), repos.cursors.clone()));
        (selector, tracker)
    }

    #[tokio::test]
    async fn test_round_robin_visits_each_once_per_cycle() {
        let repos = Repositories::in_memory();
        let (selector, _) = selector_for(&repos);
        let pool = seed_pool(&repos, ResourceRole::Proxy, &["a", "b", "c"]).await;

        let mut picked = Vec::new();
        for _ in 0..3 {
            let r = selector
                .select_for_role(ResourceRole::Proxy, RotationStrategy::RoundRobin)
                .await
                .unwrap();
            picked.push(r.id);
        }
        picked.sort();
        assert_eq!(picked, pool.iter().map(|r| r.id).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_round_robin_even_under_concurrent_callers() {
        let repos = Repositories::in_memory();
        let (selector, _) = selector_for(&repos);
        let pool = seed_pool(&repos, ResourceRole::Relay, &["a", "b", "c", "d"]).await;

        let mut handles = Vec::new();
        for _ in 0..40 {
            let selector = selector.clone();
            handles.push(tokio::spawn(async move {
                selector
                    .select_for_role(ResourceRole::Relay, RotationStrategy::RoundRobin)
                    .await
                    .unwrap()
                    .id
            }));
        }

        let mut counts: HashMap<i64, usize> = HashMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_default() += 1;
        }
        for resource in &pool {
            assert_eq!(counts[&resource.id], 10, "资源 {} 分配不均", resource.id);
        }
    }

    #[tokio::test]
    async fn test_unhealthy_resource_is_skipped() {
        let repos = Repositories::in_memory();
        let (selector, tracker) = selector_for(&repos);
        let pool = seed_pool(&repos, ResourceRole::Proxy, &["a", "b", "c"]).await;
        let a = pool[0].id;

        for _ in 0..3 {
            tracker.record_failure(a, Some(3)).await.unwrap();
        }
        assert!(!repos.resources.get(a).await.unwrap().unwrap().is_healthy);

        for strategy in RotationStrategy::ALL {
            for _ in 0..10 {
                let r = selector
                    .select_for_role(ResourceRole::Proxy, strategy)
                    .await
                    .unwrap();
                assert_ne!(r.id, a, "{strategy} 选中了不健康的资源");
            }
        }
    }

    #[tokio::test]
    async fn test_empty_pool_is_no_resource_available() {
        let repos = Repositories::in_memory();
        let (selector, _) = selector_for(&repos);
        let err = selector
            .select_for_role(ResourceRole::Relay, RotationStrategy::Random)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CampaignError::NoResourceAvailable {
                role: ResourceRole::Relay
            }
        ));
    }

    #[tokio::test]
    async fn test_least_used_prefers_lowest_id_on_tie() {
        let repos = Repositories::in_memory();
        let (selector, tracker) = selector_for(&repos);
        let pool = seed_pool(&repos, ResourceRole::Proxy, &["a", "b", "c"]).await;

        let first = selector
            .select_for_role(ResourceRole::Proxy, RotationStrategy::LeastUsed)
            .await
            .unwrap();
        assert_eq!(first.id, pool[0].id);

        tracker.record_success(pool[0].id, 10.0).await.unwrap();
        let second = selector
            .select_for_role(ResourceRole::Proxy, RotationStrategy::LeastUsed)
            .await
            .unwrap();
        assert_eq!(second.id, pool[1].id);
    }

    #[tokio::test]
    async fn test_best_performance_prefers_reliable_resource() {
        let repos = Repositories::in_memory();
        let (selector, tracker) = selector_for(&repos);
        let pool = seed_pool(&repos, ResourceRole::Proxy, &["a", "b"]).await;

        let fresh = selector
            .select_for_role(ResourceRole::Proxy, RotationStrategy::BestPerformance)
            .await
            .unwrap();
        assert_eq!(fresh.id, pool[0].id);

        tracker.record_failure(pool[0].id, Some(10)).await.unwrap();
        tracker.record_success(pool[1].id, 50.0).await.unwrap();
        let best = selector
            .select_for_role(ResourceRole::Proxy, RotationStrategy::BestPerformance)
            .await
            .unwrap();
        assert_eq!(best.id, pool[1].id);
    }
}
