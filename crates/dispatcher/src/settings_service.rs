use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use campaign_core::{
    models::{
        CampaignDeliverySettings, ConfigurationDocument, EffectiveDeliverySettings,
        ResourceExport, RotationSettings,
    },
    traits::SettingsRepository,
    CampaignError, CampaignResult,
};

use crate::health::ResourceHealthTracker;

/// 配置导入结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: Vec<String>,
}

/// 轮换设置读写与配置导入导出
pub struct SettingsService {
    settings: Arc<dyn SettingsRepository>,
    tracker: Arc<ResourceHealthTracker>,
}

impl SettingsService {
    pub fn new(settings: Arc<dyn SettingsRepository>, tracker: Arc<ResourceHealthTracker>) -> Self {
        Self { settings, tracker }
    }

    /// 所有者没有保存过设置时返回默认值
    pub async fn get(&self, owner: &str) -> CampaignResult<RotationSettings> {
        Ok(self
            .settings
            .get(owner)
            .await?
            .unwrap_or_else(|| RotationSettings::defaults_for(owner)))
    }

    /// 所有者保存过的全部设置，不含默认值
    pub async fn list_saved(&self) -> CampaignResult<Vec<RotationSettings>> {
        self.settings.list().await
    }

    #[instrument(skip(self, settings), fields(owner = %owner))]
    pub async fn put(&self, owner: &str, mut settings: RotationSettings) -> CampaignResult<RotationSettings> {
        settings.owner = owner.to_string();
        settings.updated_at = Utc::now();
        settings.validate()?;
        self.settings.save(&settings).await?;
        info!("所有者 {} 的轮换设置已更新", owner);
        Ok(settings)
    }

    /// 任务启动时读取的不可变设置快照
    pub async fn resolve(
        &self,
        owner: &str,
        overrides: &CampaignDeliverySettings,
    ) -> CampaignResult<EffectiveDeliverySettings> {
        overrides.validate()?;
        let effective = overrides.merge_over(&self.get(owner).await?);
        effective.validate()?;
        Ok(effective)
    }

    pub async fn export(&self, owner: &str) -> CampaignResult<ConfigurationDocument> {
        let settings = self.get(owner).await?;
        let resources = self.tracker.resources().list(None).await?;
        Ok(ConfigurationDocument {
            version: ConfigurationDocument::CURRENT_VERSION,
            exported_at: Utc::now(),
            settings,
            resources: resources.iter().map(ResourceExport::from).collect(),
        })
    }

    /// 导入配置文档
    ///
    /// 设置整体覆盖；资源按 角色+地址+端口 去重，已存在的只同步启用状态，
    /// 计数器和健康状态保持不变。
    #[instrument(skip(self, document), fields(owner = %owner, resources = document.resources.len()))]
    pub async fn import(&self, owner: &str, document: ConfigurationDocument) -> CampaignResult<ImportReport> {
        if document.version == 0 || document.version > ConfigurationDocument::CURRENT_VERSION {
            return Err(CampaignError::validation(format!(
                "不支持的配置文档版本: {}",
                document.version
            )));
        }
        self.put(owner, document.settings).await?;

        let resources = self.tracker.resources();
        let mut report = ImportReport::default();
        for entry in document.resources {
            if entry.address.trim().is_empty() || entry.port == 0 {
                warn!("跳过无效的资源条目: {}:{}", entry.address, entry.port);
                report.skipped.push(format!("{}:{}", entry.address, entry.port));
                continue;
            }
            let is_active = entry.is_active;
            let candidate = entry.into_record();
            match resources.find_by_endpoint(&candidate).await? {
                Some(existing) if existing.is_active == is_active => report.unchanged += 1,
                Some(existing) => {
                    if is_active {
                        self.tracker.activate(existing.id).await?;
                    } else {
                        self.tracker.deactivate(existing.id).await?;
                    }
                    report.updated += 1;
                }
                None => {
                    resources.create(&candidate).await?;
                    report.created += 1;
                }
            }
        }

        info!(
            "配置导入完成: 新增 {}，更新 {}，未变 {}，跳过 {}",
            report.created,
            report.updated,
            report.unchanged,
            report.skipped.len()
        );
        Ok(report)
    }
}
