use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use metrics::counter;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use campaign_core::{
    config::models::HealthConfig,
    models::{ResourceHealthSnapshot, ResourceRecord, ResourceRole, UsageLog},
    traits::{HealthProbe, ResourceRepository, UsageLogRepository},
    CampaignError, CampaignResult,
};

const RECENT_WEIGHT: f64 = 0.6;
const LIFETIME_WEIGHT: f64 = 0.3;
const LATENCY_WEIGHT: f64 = 0.1;

/// 健康跟踪配置
#[derive(Debug, Clone)]
pub struct HealthTrackerConfig {
    /// 未指定阈值时（如定时探测）使用的最大连续失败次数
    pub default_max_failures: u32,
    /// 计算近期成功率时读取的使用日志条数
    pub usage_window: usize,
}

impl Default for HealthTrackerConfig {
    fn default() -> Self {
        Self {
            default_max_failures: 3,
            usage_window: 20,
        }
    }
}

impl From<&HealthConfig> for HealthTrackerConfig {
    fn from(config: &HealthConfig) -> Self {
        Self {
            default_max_failures: config.default_max_failures,
            usage_window: config.usage_window,
        }
    }
}

/// 资源健康跟踪器
///
/// 计数器的修改全部下推到仓储层的原子操作，跟踪器自身只维护一份
/// "本进程观察到的不健康资源" 集合，用来判断何时广播恢复通知。
pub struct ResourceHealthTracker {
    resources: Arc<dyn ResourceRepository>,
    usage_logs: Arc<dyn UsageLogRepository>,
    probe: Arc<dyn HealthProbe>,
    config: HealthTrackerConfig,
    unhealthy: Mutex<HashSet<i64>>,
    recovered_tx: broadcast::Sender<ResourceRole>,
}

impl ResourceHealthTracker {
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        usage_logs: Arc<dyn UsageLogRepository>,
        probe: Arc<dyn HealthProbe>,
        config: HealthTrackerConfig,
    ) -> Self {
        let (recovered_tx, _) = broadcast::channel(64);
        Self {
            resources,
            usage_logs,
            probe,
            config,
            unhealthy: Mutex::new(HashSet::new()),
            recovered_tx,
        }
    }

    pub fn resources(&self) -> &Arc<dyn ResourceRepository> {
        &self.resources
    }

    pub fn default_max_failures(&self) -> u32 {
        self.config.default_max_failures
    }

    /// 订阅资源恢复通知，消息内容是恢复资源所属的角色
    pub fn subscribe_recovery(&self) -> broadcast::Receiver<ResourceRole> {
        self.recovered_tx.subscribe()
    }

    pub async fn record_success(
        &self,
        resource_id: i64,
        response_time_ms: f64,
    ) -> CampaignResult<ResourceRecord> {
        let resource = self
            .resources
            .record_success(resource_id, response_time_ms, Utc::now())
            .await?;

        if self.forget_unhealthy(resource_id) {
            info!("资源 {} ({}) 使用成功，已恢复健康", resource.id, resource.role);
            self.notify_recovered(&resource);
        }
        Ok(resource)
    }

    /// 记录一次失败；`max_failures` 为空时使用默认阈值
    pub async fn record_failure(
        &self,
        resource_id: i64,
        max_failures: Option<u32>,
    ) -> CampaignResult<ResourceRecord> {
        let threshold = max_failures.unwrap_or(self.config.default_max_failures);
        let resource = self
            .resources
            .record_failure(resource_id, threshold, Utc::now())
            .await?;

        if !resource.is_healthy {
            self.remember_unhealthy(&resource, threshold);
        } else {
            debug!(
                "资源 {} 失败 {}/{}",
                resource.id, resource.consecutive_failure_count, threshold
            );
        }
        Ok(resource)
    }

    /// 对资源执行一次探测，与正常使用无关
    pub async fn health_check(
        &self,
        resource_id: i64,
        max_failures: Option<u32>,
    ) -> CampaignResult<ResourceRecord> {
        let before = self
            .resources
            .get(resource_id)
            .await?
            .ok_or(CampaignError::ResourceNotFound { id: resource_id })?;
        let threshold = max_failures.unwrap_or(self.config.default_max_failures);

        let started = Instant::now();
        let outcome = self.probe.probe(&before).await;
        let passed = match &outcome {
            Ok(latency) => {
                debug!("资源 {} 探测成功，耗时 {:?}", before.endpoint(), latency);
                true
            }
            Err(e) => {
                warn!(
                    "资源 {} 探测失败 ({}ms): {}",
                    before.endpoint(),
                    started.elapsed().as_millis(),
                    e
                );
                false
            }
        };
        counter!(
            "campaign_health_checks_total",
            "role" => before.role.as_str(),
            "outcome" => if passed { "passed" } else { "failed" }
        )
        .increment(1);

        let after = self
            .resources
            .record_health_check(resource_id, passed, threshold, Utc::now())
            .await?;

        if passed {
            let was_tracked = self.forget_unhealthy(resource_id);
            if was_tracked || !before.is_healthy {
                info!("资源 {} ({}) 探测通过，已恢复健康", after.id, after.role);
                self.notify_recovered(&after);
            }
        } else if !after.is_healthy {
            self.remember_unhealthy(&after, threshold);
        }

        Ok(after)
    }

    /// 性能分，只用于选择时的排序
    pub async fn performance_score(&self, resource_id: i64) -> CampaignResult<f64> {
        let resource = self
            .resources
            .get(resource_id)
            .await?
            .ok_or(CampaignError::ResourceNotFound { id: resource_id })?;
        self.score_for(&resource).await
    }

    pub async fn score_for(&self, resource: &ResourceRecord) -> CampaignResult<f64> {
        let recent = self
            .usage_logs
            .recent_for_resource(resource.id, self.config.usage_window)
            .await?;
        Ok(compute_score(resource, &recent))
    }

    /// 资源健康快照（附带性能分）；`role` 为空时返回全部
    pub async fn snapshot(
        &self,
        role: Option<ResourceRole>,
    ) -> CampaignResult<Vec<ResourceHealthSnapshot>> {
        let resources = self.resources.list(role).await?;
        let mut snapshots = Vec::with_capacity(resources.len());
        for resource in resources {
            let performance_score = self.score_for(&resource).await?;
            snapshots.push(ResourceHealthSnapshot {
                resource,
                performance_score,
            });
        }
        Ok(snapshots)
    }

    pub async fn activate(&self, resource_id: i64) -> CampaignResult<ResourceRecord> {
        let resource = self.resources.set_active(resource_id, true).await?;
        info!("资源 {} 已启用", resource_id);
        if resource.is_eligible() {
            self.notify_recovered(&resource);
        }
        Ok(resource)
    }

    pub async fn deactivate(&self, resource_id: i64) -> CampaignResult<ResourceRecord> {
        let resource = self.resources.set_active(resource_id, false).await?;
        info!("资源 {} 已停用", resource_id);
        Ok(resource)
    }

    fn remember_unhealthy(&self, resource: &ResourceRecord, threshold: u32) {
        let newly = self
            .unhealthy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(resource.id);
        if newly {
            warn!(
                "资源 {} ({}) 连续失败 {} 次，标记为不健康",
                resource.endpoint(),
                resource.role,
                threshold
            );
            counter!("campaign_resources_marked_unhealthy_total", "role" => resource.role.as_str())
                .increment(1);
        }
    }

    fn forget_unhealthy(&self, resource_id: i64) -> bool {
        self.unhealthy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&resource_id)
    }

    fn notify_recovered(&self, resource: &ResourceRecord) {
        // 没有订阅者时发送失败是正常情况
        let _ = self.recovered_tx.send(resource.role);
    }
}

/// 0.6 * 近期成功率 + 0.3 * 平滑后的总成功率 + 0.1 * 延迟因子
///
/// 没有近期日志时近期成功率取平滑后的总成功率，没有延迟数据时延迟因子取 0.5。
pub fn compute_score(resource: &ResourceRecord, recent: &[UsageLog]) -> f64 {
    let lifetime =
        (resource.successful_requests as f64 + 1.0) / (resource.total_requests as f64 + 2.0);

    let recent_rate = if recent.is_empty() {
        lifetime
    } else {
        recent.iter().filter(|log| log.success).count() as f64 / recent.len() as f64
    };

    let latency = resource
        .average_response_time
        .map(|ms| 1.0 / (1.0 + ms.max(0.0) / 1000.0))
        .unwrap_or(0.5);

    RECENT_WEIGHT * recent_rate + LIFETIME_WEIGHT * lifetime + LATENCY_WEIGHT * latency
}
