use std::time::Duration;

use async_trait::async_trait;

use crate::{
    models::{
        DeliveryReceipt, DeliveryRoute, DeliveryUnit, JobEventEnvelope, ResourceRecord, SendFailure,
    },
    CampaignResult,
};

/// 外发通道（短信网关、中继等）
///
/// 实现方负责把失败归因到具体的资源角色，协调器据此更新健康状态。
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    async fn send(
        &self,
        unit: &DeliveryUnit,
        route: &DeliveryRoute,
    ) -> Result<DeliveryReceipt, SendFailure>;

    fn name(&self) -> &str;
}

/// 独立于正常流量的轻量健康探测，成功时返回耗时
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, resource: &ResourceRecord) -> CampaignResult<Duration>;
}

/// 任务事件发布端
///
/// 发布是尽力而为的：没有订阅者时事件直接丢弃，不会阻塞任务执行。
pub trait JobEventPublisher: Send + Sync {
    fn publish(&self, envelope: JobEventEnvelope);
}
