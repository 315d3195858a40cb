use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ResourceProtocol, ResourceRecord, ResourceRole};
use crate::{CampaignError, CampaignResult};

/// 资源轮换策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    Random,
    LeastUsed,
    BestPerformance,
}

impl RotationStrategy {
    pub const ALL: [RotationStrategy; 4] = [
        RotationStrategy::RoundRobin,
        RotationStrategy::Random,
        RotationStrategy::LeastUsed,
        RotationStrategy::BestPerformance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RotationStrategy::RoundRobin => "round_robin",
            RotationStrategy::Random => "random",
            RotationStrategy::LeastUsed => "least_used",
            RotationStrategy::BestPerformance => "best_performance",
        }
    }
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RotationStrategy {
    type Err = CampaignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RotationStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| {
                CampaignError::validation(format!(
                    "无效的轮换策略: {s}，支持的策略: round_robin, random, least_used, best_performance"
                ))
            })
    }
}

/// 每个所有者的默认轮换设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RotationSettings {
    pub owner: String,
    pub proxy_enabled: bool,
    pub proxy_strategy: RotationStrategy,
    /// 秒
    pub proxy_health_check_interval: u64,
    pub proxy_max_failures: u32,
    pub relay_enabled: bool,
    pub relay_strategy: RotationStrategy,
    /// 秒
    pub relay_health_check_interval: u64,
    pub relay_max_failures: u32,
    pub delay_enabled: bool,
    /// 秒
    pub delay_min: f64,
    /// 秒
    pub delay_max: f64,
    pub random_seed: Option<u64>,
    /// 每个目标号码每分钟最多投递次数
    pub destination_rate_limit: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl RotationSettings {
    pub fn defaults_for(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            proxy_enabled: true,
            proxy_strategy: RotationStrategy::RoundRobin,
            proxy_health_check_interval: 300,
            proxy_max_failures: 3,
            relay_enabled: true,
            relay_strategy: RotationStrategy::RoundRobin,
            relay_health_check_interval: 300,
            relay_max_failures: 3,
            delay_enabled: false,
            delay_min: 1.0,
            delay_max: 5.0,
            random_seed: None,
            destination_rate_limit: None,
            updated_at: Utc::now(),
        }
    }

    pub fn strategy_for(&self, role: ResourceRole) -> RotationStrategy {
        match role {
            ResourceRole::Proxy => self.proxy_strategy,
            ResourceRole::Relay => self.relay_strategy,
        }
    }

    pub fn max_failures_for(&self, role: ResourceRole) -> u32 {
        match role {
            ResourceRole::Proxy => self.proxy_max_failures,
            ResourceRole::Relay => self.relay_max_failures,
        }
    }

    pub fn health_check_interval_for(&self, role: ResourceRole) -> u64 {
        match role {
            ResourceRole::Proxy => self.proxy_health_check_interval,
            ResourceRole::Relay => self.relay_health_check_interval,
        }
    }

    pub fn validate(&self) -> CampaignResult<()> {
        if self.owner.trim().is_empty() {
            return Err(CampaignError::validation("所有者不能为空"));
        }
        if self.proxy_max_failures == 0 || self.relay_max_failures == 0 {
            return Err(CampaignError::validation("最大失败次数必须大于0"));
        }
        if self.proxy_health_check_interval == 0 || self.relay_health_check_interval == 0 {
            return Err(CampaignError::validation("健康检查间隔必须大于0"));
        }
        validate_delay_range(self.delay_min, self.delay_max)?;
        validate_rate_limit(self.destination_rate_limit)
    }
}

fn validate_delay_range(min: f64, max: f64) -> CampaignResult<()> {
    if !min.is_finite() || !max.is_finite() || min < 0.0 || max < 0.0 {
        return Err(CampaignError::validation("延迟必须是非负数"));
    }
    if min > max {
        return Err(CampaignError::validation(format!(
            "最小延迟 {min} 不能大于最大延迟 {max}"
        )));
    }
    Ok(())
}

fn validate_rate_limit(limit: Option<u32>) -> CampaignResult<()> {
    if limit == Some(0) {
        return Err(CampaignError::validation("目标限速必须大于0"));
    }
    Ok(())
}

/// 活动级别的投递覆盖设置，存在的字段优先于所有者默认值
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CampaignDeliverySettings {
    #[serde(default)]
    pub proxy_enabled: Option<bool>,
    #[serde(default)]
    pub proxy_strategy: Option<RotationStrategy>,
    #[serde(default)]
    pub relay_enabled: Option<bool>,
    #[serde(default)]
    pub relay_strategy: Option<RotationStrategy>,
    #[serde(default)]
    pub custom_delay_enabled: Option<bool>,
    #[serde(default)]
    pub custom_delay_min: Option<f64>,
    #[serde(default)]
    pub custom_delay_max: Option<f64>,
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default)]
    pub destination_rate_limit: Option<u32>,
}

impl CampaignDeliverySettings {
    /// 合并到所有者默认设置之上，得到任务启动时的不可变快照
    pub fn merge_over(&self, base: &RotationSettings) -> EffectiveDeliverySettings {
        // 只给出了一侧的自定义延迟时，视为固定延迟
        let (delay_min, delay_max) = match (self.custom_delay_min, self.custom_delay_max) {
            (Some(min), Some(max)) => (min, max),
            (Some(value), None) | (None, Some(value)) => (value, value),
            (None, None) => (base.delay_min, base.delay_max),
        };
        let delay_enabled = self.custom_delay_enabled.unwrap_or(
            base.delay_enabled || self.custom_delay_min.is_some() || self.custom_delay_max.is_some(),
        );

        EffectiveDeliverySettings {
            proxy_enabled: self.proxy_enabled.unwrap_or(base.proxy_enabled),
            proxy_strategy: self.proxy_strategy.unwrap_or(base.proxy_strategy),
            proxy_max_failures: base.proxy_max_failures,
            relay_enabled: self.relay_enabled.unwrap_or(base.relay_enabled),
            relay_strategy: self.relay_strategy.unwrap_or(base.relay_strategy),
            relay_max_failures: base.relay_max_failures,
            delay_enabled,
            delay_min,
            delay_max,
            random_seed: self.random_seed.or(base.random_seed),
            destination_rate_limit: self.destination_rate_limit.or(base.destination_rate_limit),
        }
    }

    pub fn validate(&self) -> CampaignResult<()> {
        if let (Some(min), Some(max)) = (self.custom_delay_min, self.custom_delay_max) {
            validate_delay_range(min, max)?;
        }
        for value in [self.custom_delay_min, self.custom_delay_max].into_iter().flatten() {
            validate_delay_range(value, value)?;
        }
        validate_rate_limit(self.destination_rate_limit)
    }
}

/// 合并后的投递设置快照
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectiveDeliverySettings {
    pub proxy_enabled: bool,
    pub proxy_strategy: RotationStrategy,
    pub proxy_max_failures: u32,
    pub relay_enabled: bool,
    pub relay_strategy: RotationStrategy,
    pub relay_max_failures: u32,
    pub delay_enabled: bool,
    pub delay_min: f64,
    pub delay_max: f64,
    pub random_seed: Option<u64>,
    pub destination_rate_limit: Option<u32>,
}

impl EffectiveDeliverySettings {
    pub fn role_enabled(&self, role: ResourceRole) -> bool {
        match role {
            ResourceRole::Proxy => self.proxy_enabled,
            ResourceRole::Relay => self.relay_enabled,
        }
    }

    pub fn strategy_for(&self, role: ResourceRole) -> RotationStrategy {
        match role {
            ResourceRole::Proxy => self.proxy_strategy,
            ResourceRole::Relay => self.relay_strategy,
        }
    }

    pub fn max_failures_for(&self, role: ResourceRole) -> u32 {
        match role {
            ResourceRole::Proxy => self.proxy_max_failures,
            ResourceRole::Relay => self.relay_max_failures,
        }
    }

    pub fn validate(&self) -> CampaignResult<()> {
        if self.delay_enabled {
            validate_delay_range(self.delay_min, self.delay_max)?;
        }
        validate_rate_limit(self.destination_rate_limit)
    }
}

/// 导出的资源条目，不含凭据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceExport {
    pub role: ResourceRole,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub protocol: ResourceProtocol,
    pub is_active: bool,
}

impl From<&ResourceRecord> for ResourceExport {
    fn from(resource: &ResourceRecord) -> Self {
        Self {
            role: resource.role,
            name: resource.name.clone(),
            address: resource.address.clone(),
            port: resource.port,
            protocol: resource.protocol,
            is_active: resource.is_active,
        }
    }
}

impl ResourceExport {
    pub fn into_record(self) -> ResourceRecord {
        let mut record =
            ResourceRecord::new(self.role, self.name, self.address, self.port, self.protocol);
        record.is_active = self.is_active;
        record
    }
}

/// 完整配置文档（设置 + 资源池成员）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationDocument {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub settings: RotationSettings,
    pub resources: Vec<ResourceExport>,
}

impl ConfigurationDocument {
    pub const CURRENT_VERSION: u32 = 1;
}
