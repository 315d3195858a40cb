//! 短信外呼活动执行器

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use campaign_core::{
    models::{categories, CampaignDeliverySettings, DeliveryUnit, FailureBlame},
    CampaignError, CampaignResult,
};
use campaign_dispatcher::{DeliveryCoordinator, DeliveryOutcome, SettingsService};

use crate::context::JobContext;
use crate::executor::JobExecutor;
use crate::executors::phone::{normalize_e164, MAX_QUANTITY};

const MAX_MESSAGE_LENGTH: usize = 1_600;
/// 结果中保留的失败明细条数
const FAILURE_DETAIL_LIMIT: usize = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsCampaignParams {
    pub recipients: Vec<String>,
    pub message: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub default_country_code: Option<String>,
    /// 活动级投递覆盖，优先于所有者的轮换设置
    #[serde(default)]
    pub delivery: CampaignDeliverySettings,
}

impl SmsCampaignParams {
    pub fn parse(payload: &Value) -> CampaignResult<Self> {
        let params: Self = serde_json::from_value(payload.clone())
            .map_err(|e| CampaignError::validation(format!("短信活动参数无效: {e}")))?;
        if params.recipients.is_empty() {
            return Err(CampaignError::validation("收件人列表不能为空"));
        }
        if params.recipients.len() as u64 > MAX_QUANTITY {
            return Err(CampaignError::validation(format!(
                "收件人不能超过 {MAX_QUANTITY} 个"
            )));
        }
        if params.message.trim().is_empty() {
            return Err(CampaignError::validation("短信内容不能为空"));
        }
        if params.message.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(CampaignError::validation(format!(
                "短信内容不能超过 {MAX_MESSAGE_LENGTH} 个字符"
            )));
        }
        params.delivery.validate()?;
        Ok(params)
    }
}

#[derive(Debug, Default)]
struct CampaignTally {
    delivered: u64,
    failed: u64,
    attempts: u64,
    pauses: u64,
    failures: Vec<Value>,
}

impl CampaignTally {
    fn record_failure(&mut self, destination: &str, reason: impl Into<String>, blame: FailureBlame) {
        self.failed += 1;
        if self.failures.len() < FAILURE_DETAIL_LIMIT {
            self.failures.push(json!({
                "destination": destination,
                "reason": reason.into(),
                "blame": blame,
            }));
        }
    }
}

/// 逐个投递短信；单条失败计入结果，资源池耗尽时任务暂停等待恢复
pub struct SmsCampaignExecutor {
    coordinator: Arc<DeliveryCoordinator>,
    settings: Arc<SettingsService>,
}

impl SmsCampaignExecutor {
    pub fn new(coordinator: Arc<DeliveryCoordinator>, settings: Arc<SettingsService>) -> Self {
        Self {
            coordinator,
            settings,
        }
    }
}

#[async_trait]
impl JobExecutor for SmsCampaignExecutor {
    fn category(&self) -> &str {
        categories::SMS_CAMPAIGN
    }

    fn validate(&self, payload: &Value) -> CampaignResult<()> {
        SmsCampaignParams::parse(payload).map(|_| ())
    }

    async fn execute(&self, ctx: &JobContext) -> CampaignResult<Value> {
        let params = SmsCampaignParams::parse(ctx.payload())?;
        let effective = self.settings.resolve(ctx.owner(), &params.delivery).await?;
        let mut session = self.coordinator.session(ctx.job_id(), effective);
        let cancel = ctx.cancel_token();

        let total = params.recipients.len() as u64;
        let mut tally = CampaignTally::default();
        ctx.report_counts(0, total, "投递短信").await?;

        for (index, recipient) in params.recipients.iter().enumerate() {
            ctx.checkpoint()?;

            let destination =
                match normalize_e164(recipient, params.default_country_code.as_deref()) {
                    Ok(number) => number,
                    Err(reason) => {
                        tally.record_failure(recipient, reason, FailureBlame::Destination);
                        ctx.report_counts(index as u64 + 1, total, "投递短信").await?;
                        continue;
                    }
                };
            let unit = DeliveryUnit {
                job_id: ctx.job_id(),
                sequence: index as u64,
                destination,
                message: params.message.clone(),
                sender_id: params.sender_id.clone(),
            };

            let outcome = loop {
                match session.deliver(&unit, cancel).await {
                    Err(CampaignError::NoResourceAvailable { role }) => {
                        tally.pauses += 1;
                        ctx.pause(role, format!("{role}资源池中没有可用资源，等待恢复"))
                            .await?;
                        session.wait_for_pool(role, cancel).await?;
                        ctx.resume().await?;
                    }
                    other => break other?,
                }
            };

            tally.attempts += u64::from(outcome.attempts());
            match outcome {
                DeliveryOutcome::Delivered { .. } => tally.delivered += 1,
                DeliveryOutcome::Failed { blame, reason, .. } => {
                    tally.record_failure(&unit.destination, reason, blame)
                }
            }
            ctx.report_counts(index as u64 + 1, total, "投递短信").await?;
        }

        if tally.failed > 0 {
            warn!("任务 {} 有 {} 条短信投递失败", ctx.job_id(), tally.failed);
        }
        info!(
            "任务 {} 投递完成: 成功 {} / 失败 {} / 共 {}",
            ctx.job_id(),
            tally.delivered,
            tally.failed,
            total
        );
        Ok(json!({
            "total": total,
            "delivered": tally.delivered,
            "failed": tally.failed,
            "attempts": tally.attempts,
            "pauses": tally.pauses,
            "failures": tally.failures,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_validation() {
        assert!(SmsCampaignParams::parse(&json!({
            "recipients": ["+14155550100"],
            "message": "hello"
        }))
        .is_ok());
        assert!(SmsCampaignParams::parse(&json!({"recipients": [], "message": "hello"})).is_err());
        assert!(SmsCampaignParams::parse(&json!({
            "recipients": ["+14155550100"],
            "message": "   "
        }))
        .is_err());
        assert!(SmsCampaignParams::parse(&json!({
            "recipients": ["+14155550100"],
            "message": "hello",
            "delivery": {"custom_delay_min": 5.0, "custom_delay_max": 1.0}
        }))
        .is_err());
        assert!(SmsCampaignParams::parse(&json!({
            "recipients": ["+14155550100"],
            "message": "hello",
            "delivery": {"destination_rate_limit": 0}
        }))
        .is_err());
    }
}
