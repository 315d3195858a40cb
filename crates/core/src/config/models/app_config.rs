use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    database::DatabaseConfig,
    health_maintenance::{HealthConfig, MaintenanceConfig, NotificationConfig},
    runner_delivery::{DeliveryConfig, RunnerConfig},
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub runner: RunnerConfig,
    pub delivery: DeliveryConfig,
    pub health: HealthConfig,
    pub maintenance: MaintenanceConfig,
    pub notifications: NotificationConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: CAMPAIGN_, nested keys joined by `__`,
    ///    e.g. `CAMPAIGN_RUNNER__MAX_CONCURRENT_JOBS=16`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/campaign.toml", "campaign.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CAMPAIGN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.runner.validate().context("任务执行配置验证失败")?;
        self.delivery.validate().context("投递配置验证失败")?;
        self.health.validate().context("健康检查配置验证失败")?;
        self.maintenance.validate().context("维护配置验证失败")?;
        self.notifications.validate().context("通知配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        // 探测和发送超时必须严格短于任务超时
        if self.health.probe_timeout_seconds >= self.runner.job_timeout_seconds {
            return Err(anyhow::anyhow!(
                "探测超时 ({}s) 必须小于任务超时 ({}s)",
                self.health.probe_timeout_seconds,
                self.runner.job_timeout_seconds
            ));
        }
        if self.delivery.send_timeout_seconds >= self.runner.job_timeout_seconds {
            return Err(anyhow::anyhow!(
                "发送超时 ({}s) 必须小于任务超时 ({}s)",
                self.delivery.send_timeout_seconds,
                self.runner.job_timeout_seconds
            ));
        }

        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.runner.job_timeout_seconds)
    }
}
