use std::collections::HashMap;

use async_trait::async_trait;
use campaign_core::{models::RotationSettings, traits::SettingsRepository, CampaignResult};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemorySettingsRepository {
    settings: RwLock<HashMap<String, RotationSettings>>,
}

impl InMemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn get(&self, owner: &str) -> CampaignResult<Option<RotationSettings>> {
        Ok(self.settings.read().await.get(owner).cloned())
    }

    async fn save(&self, settings: &RotationSettings) -> CampaignResult<()> {
        self.settings
            .write()
            .await
            .insert(settings.owner.clone(), settings.clone());
        Ok(())
    }

    async fn list(&self) -> CampaignResult<Vec<RotationSettings>> {
        let mut all: Vec<RotationSettings> = self.settings.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.owner.cmp(&b.owner));
        Ok(all)
    }
}
