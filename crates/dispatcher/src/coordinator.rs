//! 投递协调器
//!
//! 每个投递单元的流程：
//!
//! 1. 按启用的角色各选出一个资源（代理、中继）
//! 2. 等待到 `上一次投递时间 + 延迟`
//! 3. 目标号码限速（推迟，不丢弃），占用名额后立即发送
//! 4. 在 `send_timeout` 内发送
//! 5. 按失败归因回写每个使用过的资源，并追加使用日志
//!
//! 单个资源失败不会让单元失败，而是换一个资源重试，直到达到单元的尝试上限。
//! 某个必需角色的资源池整体不可用时返回 `NoResourceAvailable`，由任务暂停等待恢复。

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use campaign_core::{
    config::models::DeliveryConfig,
    models::{
        DeliveryReceipt, DeliveryRoute, DeliveryUnit, EffectiveDeliverySettings, FailureBlame,
        ResourceRecord, ResourceRole, SendFailure, UsageLog,
    },
    traits::{OutboundTransport, UsageLogRepository},
    CampaignError, CampaignResult,
};

use crate::{
    delay::DeliveryDelay, health::ResourceHealthTracker, rate_limit::DestinationRateLimiter,
    selector::RotationSelector,
};

/// 单个投递单元的结果
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered {
        receipt: DeliveryReceipt,
        attempts: u32,
    },
    /// 单元级失败，计入结果统计，不会让任务失败
    Failed {
        blame: FailureBlame,
        reason: String,
        attempts: u32,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts, .. } | DeliveryOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

pub struct DeliveryCoordinator {
    selector: Arc<RotationSelector>,
    tracker: Arc<ResourceHealthTracker>,
    usage_logs: Arc<dyn UsageLogRepository>,
    transport: Arc<dyn OutboundTransport>,
    rate_limiter: Arc<DestinationRateLimiter>,
    config: DeliveryConfig,
}

impl DeliveryCoordinator {
    pub fn new(
        selector: Arc<RotationSelector>,
        tracker: Arc<ResourceHealthTracker>,
        usage_logs: Arc<dyn UsageLogRepository>,
        transport: Arc<dyn OutboundTransport>,
        config: DeliveryConfig,
    ) -> Self {
        info!("投递协调器使用传输通道: {}", transport.name());
        Self {
            selector,
            tracker,
            usage_logs,
            transport,
            rate_limiter: Arc::new(DestinationRateLimiter::new()),
            config,
        }
    }

    /// 为一个任务开启投递会话；设置快照在会话期间不变
    pub fn session(self: &Arc<Self>, job_id: Uuid, settings: EffectiveDeliverySettings) -> DeliverySession {
        DeliverySession {
            coordinator: Arc::clone(self),
            job_id,
            delay: DeliveryDelay::from_settings(&settings),
            settings,
            next_dispatch_at: None,
        }
    }

    pub fn pool_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.config.pool_recheck_interval_seconds)
    }

    fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.config.send_timeout_seconds)
    }

    /// 等待某个角色的资源池重新出现可用资源
    ///
    /// 由恢复通知唤醒，同时按 `pool_recheck_interval` 定期复查，
    /// 以覆盖其他进程或重启前就已恢复的资源。
    pub async fn wait_for_pool(
        &self,
        role: ResourceRole,
        cancel: &CancellationToken,
    ) -> CampaignResult<()> {
        let mut recovered = self.tracker.subscribe_recovery();
        loop {
            if self.selector.has_eligible(role).await? {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(CampaignError::Cancelled),
                message = recovered.recv() => match message {
                    Ok(recovered_role) if recovered_role != role => continue,
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        debug!("收到 {} 资源恢复通知，重新检查资源池", role);
                    }
                    Err(RecvError::Closed) => {
                        tokio::time::sleep(self.pool_recheck_interval()).await;
                    }
                },
                _ = tokio::time::sleep(self.pool_recheck_interval()) => {}
            }
        }
    }
}

/// 单个任务的投递会话，保存延迟随机序列和上一次投递时间
pub struct DeliverySession {
    coordinator: Arc<DeliveryCoordinator>,
    job_id: Uuid,
    settings: EffectiveDeliverySettings,
    delay: DeliveryDelay,
    next_dispatch_at: Option<Instant>,
}

impl DeliverySession {
    pub fn settings(&self) -> &EffectiveDeliverySettings {
        &self.settings
    }

    pub fn required_roles(&self) -> Vec<ResourceRole> {
        ResourceRole::ALL
            .into_iter()
            .filter(|role| self.settings.role_enabled(*role))
            .collect()
    }

    pub async fn wait_for_pool(
        &self,
        role: ResourceRole,
        cancel: &CancellationToken,
    ) -> CampaignResult<()> {
        self.coordinator.wait_for_pool(role, cancel).await
    }

    /// 投递一个单元
    ///
    /// 返回 `Err(NoResourceAvailable)` 表示资源池耗尽，`Err(Cancelled)` 表示任务被取消；
    /// 其余发送失败都折叠进 `DeliveryOutcome::Failed`。
    pub async fn deliver(
        &mut self,
        unit: &DeliveryUnit,
        cancel: &CancellationToken,
    ) -> CampaignResult<DeliveryOutcome> {
        let max_attempts = self.coordinator.config.max_attempts_per_unit.max(1);
        let mut last_failure: Option<SendFailure> = None;
        let mut attempts = 0;

        while attempts < max_attempts {
            if cancel.is_cancelled() {
                return Err(CampaignError::Cancelled);
            }

            let route = self.select_route().await?;
            self.wait_for_slot(unit, cancel).await?;

            attempts += 1;
            counter!("campaign_delivery_attempts_total").increment(1);

            let started = Instant::now();
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(CampaignError::Cancelled),
                result = tokio::time::timeout(
                    self.coordinator.send_timeout(),
                    self.coordinator.transport.send(unit, &route),
                ) => result,
            };
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            let result = result.unwrap_or_else(|_| {
                Err(SendFailure::transient(
                    FailureBlame::Route,
                    format!("发送超时 ({}s)", self.coordinator.config.send_timeout_seconds),
                ))
            });

            match result {
                Ok(receipt) => {
                    // 单元已经送达，记账失败不能让任务失败后重发
                    for resource in route.used() {
                        if let Err(e) = self.record_success(resource, receipt.response_time).await {
                            warn!(
                                "任务 {} 单元 {} 已投递，记录资源 {} 的使用情况失败: {}",
                                self.job_id, unit.sequence, resource.id, e
                            );
                        }
                    }
                    counter!("campaign_delivery_units_total", "outcome" => "delivered").increment(1);
                    debug!(
                        "任务 {} 单元 {} 投递成功 (第 {} 次尝试)",
                        self.job_id, unit.sequence, attempts
                    );
                    return Ok(DeliveryOutcome::Delivered { receipt, attempts });
                }
                Err(failure) => {
                    for resource in route.used() {
                        if failure.blame.blames(resource.role) {
                            self.record_failure(resource, &failure).await?;
                        } else {
                            self.record_success(resource, elapsed_ms).await?;
                        }
                    }
                    warn!(
                        "任务 {} 单元 {} 第 {} 次发送失败: {}",
                        self.job_id, unit.sequence, attempts, failure
                    );
                    let retryable = failure.retryable;
                    last_failure = Some(failure);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        counter!("campaign_delivery_units_total", "outcome" => "failed").increment(1);
        let (blame, reason) = last_failure
            .map(|f| (f.blame, f.message))
            .unwrap_or((FailureBlame::Route, "没有进行任何发送尝试".to_string()));
        Ok(DeliveryOutcome::Failed {
            blame,
            reason,
            attempts,
        })
    }

    async fn select_route(&self) -> CampaignResult<DeliveryRoute> {
        let mut route = DeliveryRoute::default();
        for role in self.required_roles() {
            let strategy = self.settings.strategy_for(role);
            let resource = match self.coordinator.selector.select_for_role(role, strategy).await {
                Ok(resource) => resource,
                Err(e @ CampaignError::NoResourceAvailable { .. }) => {
                    counter!("campaign_pool_exhausted_total", "role" => role.as_str()).increment(1);
                    return Err(e);
                }
                Err(e) => return Err(e),
            };
            match role {
                ResourceRole::Proxy => route.proxy = Some(resource),
                ResourceRole::Relay => route.relay = Some(resource),
            }
        }
        Ok(route)
    }

    /// 延迟与限速两个可取消的等待点
    ///
    /// 限速名额必须在延迟之后占用，名额的时间戳即实际发送时间。
    async fn wait_for_slot(
        &mut self,
        unit: &DeliveryUnit,
        cancel: &CancellationToken,
    ) -> CampaignResult<()> {
        if let Some(at) = self.next_dispatch_at {
            tokio::select! {
                _ = cancel.cancelled() => return Err(CampaignError::Cancelled),
                _ = tokio::time::sleep_until(at) => {}
            }
        }

        if let Some(limit) = self.settings.destination_rate_limit {
            tokio::select! {
                _ = cancel.cancelled() => return Err(CampaignError::Cancelled),
                _ = self.coordinator.rate_limiter.acquire(&unit.destination, limit) => {}
            }
        }

        let delay = self.delay.next_delay();
        self.next_dispatch_at = if delay.is_zero() {
            None
        } else {
            Some(Instant::now() + delay)
        };
        Ok(())
    }

    async fn record_success(&self, resource: &ResourceRecord, response_time_ms: f64) -> CampaignResult<()> {
        self.coordinator
            .tracker
            .record_success(resource.id, response_time_ms)
            .await?;
        self.coordinator
            .usage_logs
            .append(&UsageLog::success(
                self.job_id,
                resource.id,
                resource.role,
                response_time_ms,
            ))
            .await
    }

    async fn record_failure(&self, resource: &ResourceRecord, failure: &SendFailure) -> CampaignResult<()> {
        self.coordinator
            .tracker
            .record_failure(resource.id, Some(self.settings.max_failures_for(resource.role)))
            .await?;
        self.coordinator
            .usage_logs
            .append(&UsageLog::failure(
                self.job_id,
                resource.id,
                resource.role,
                failure.message.clone(),
            ))
            .await
    }
}
